//! Periodic background tasks: the emergency sweep and the expiry reaper.
//!
//! Each task owns a [`TickGuard`]. A tick that finds the previous run of the
//! same task still in flight is skipped rather than queued. The guard is
//! not shared between tasks, and request-triggered allocations never take
//! it. All loops stop when the scheduler's [`CancellationToken`] fires.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::emergency::EmergencySweep;
use crate::reaper::ExpiryReaper;

/// Non-blocking "already running" flag for one periodic task.
#[derive(Debug, Clone, Default)]
pub struct TickGuard {
    running: Arc<AtomicBool>,
}

impl TickGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard if nobody holds it. The permit releases on drop.
    pub fn try_acquire(&self) -> Option<TickPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickPermit {
                running: Arc::clone(&self.running),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct TickPermit {
    running: Arc<AtomicBool>,
}

impl Drop for TickPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Run `task` every `period` until `cancel` fires. Each run is spawned so a
/// slow run never delays the timer; the guard turns overlapping ticks into
/// no-ops.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    guard: TickGuard,
    cancel: CancellationToken,
    task: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(task = name, interval_secs = period.as_secs(), "Periodic task started");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(task = name, "Periodic task stopping");
                    break;
                }
                _ = interval.tick() => {
                    let Some(permit) = guard.try_acquire() else {
                        debug!(task = name, "Previous run still in flight; skipping tick");
                        continue;
                    };
                    let run = task();
                    tokio::spawn(async move {
                        let _permit = permit;
                        run.await;
                    });
                }
            }
        }
    })
}

/// Owns the re-entrancy state of the background tasks.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    sweep_guard: TickGuard,
    reap_guard: TickGuard,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard shared with on-demand sweep requests.
    pub fn sweep_guard(&self) -> TickGuard {
        self.sweep_guard.clone()
    }

    pub fn reap_guard(&self) -> TickGuard {
        self.reap_guard.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn start(
        &self,
        sweep: EmergencySweep,
        reaper: ExpiryReaper,
        sweep_every: Duration,
        reap_every: Duration,
    ) -> Vec<JoinHandle<()>> {
        let sweep_task = spawn_periodic(
            "emergency_sweep",
            sweep_every,
            self.sweep_guard.clone(),
            self.cancel.clone(),
            move || {
                let sweep = sweep.clone();
                async move {
                    if let Err(e) = sweep.run_sweep().await {
                        error!(error = %e, "Emergency sweep failed");
                    }
                }
            },
        );

        let reap_task = spawn_periodic(
            "expiry_reaper",
            reap_every,
            self.reap_guard.clone(),
            self.cancel.clone(),
            move || {
                let reaper = reaper.clone();
                async move {
                    if let Err(e) = reaper.reap().await {
                        error!(error = %e, "Expiry reaper failed");
                    }
                }
            },
        );

        vec![sweep_task, reap_task]
    }
}
