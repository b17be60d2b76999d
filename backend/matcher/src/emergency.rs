//! Emergency dispatch: force allocation for donations whose urgency has
//! reached [`UrgencyLevel::Emergency`].
//!
//! Two entry points share the same rules:
//!
//! * [`EmergencySweep::run_sweep`] rescans every available donation, run
//!   periodically by the scheduler or on demand.
//! * [`EmergencySweep::check_and_trigger`] evaluates a single donation right
//!   after intake.
//!
//! The persisted `is_auto_assigned` flag is the only record of a
//! system-dispatched allocation; it is set by the engine when called with
//! [`AllocateOptions::auto`].

use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::allocation::{AllocateOptions, Allocation, AllocationEngine};
use crate::db;
use crate::errors::Result;
use crate::models::{Donation, DonationStatus};
use crate::urgency::{calculate_urgency, UrgencyAssessment, UrgencyLevel};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignedDetail {
    pub donation_id: i64,
    pub organization_id: i64,
    pub organization_name: String,
    pub urgency_score: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub scanned_items: usize,
    pub emergency_found: usize,
    pub auto_assigned_count: usize,
    pub scan_duration_ms: u64,
    pub assigned_details: Vec<AssignedDetail>,
}

/// Result of evaluating one donation on intake.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerOutcome {
    pub auto_triggered: bool,
    pub urgency: UrgencyAssessment,
    /// The allocation made, if the trigger fired and succeeded.
    pub allocation: Option<Allocation>,
    /// Why a fired trigger produced no match.
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct EmergencySweep {
    engine: AllocationEngine,
}

impl EmergencySweep {
    pub fn new(engine: AllocationEngine) -> Self {
        Self { engine }
    }

    /// Scan all available donations and auto-assign the emergencies.
    ///
    /// A failure on one donation is logged and the scan moves on.
    pub async fn run_sweep(&self) -> Result<SweepReport> {
        let started = Instant::now();
        let donations = db::list_donations(self.engine.pool(), Some(DonationStatus::Available)).await?;

        let mut report = SweepReport {
            scanned_items: donations.len(),
            ..SweepReport::default()
        };
        info!(scanned = report.scanned_items, "Emergency sweep starting");

        for donation in &donations {
            let urgency = self.urgency_of(donation);
            if urgency.level != UrgencyLevel::Emergency {
                continue;
            }
            report.emergency_found += 1;

            if donation.is_auto_assigned {
                continue;
            }

            info!(
                donation_id = donation.id,
                urgency_score = urgency.score,
                "Emergency donation found; attempting auto-assign"
            );

            match self.engine.allocate(donation.id, AllocateOptions::auto()).await {
                Ok(Allocation {
                    matched: Some(details),
                    ..
                }) => {
                    report.auto_assigned_count += 1;
                    report.assigned_details.push(AssignedDetail {
                        donation_id: donation.id,
                        organization_id: details.organization.id,
                        organization_name: details.organization.name.clone(),
                        urgency_score: urgency.score,
                    });
                }
                Ok(_) => {
                    warn!(donation_id = donation.id, "Could not auto-assign emergency donation");
                }
                Err(e) => {
                    error!(
                        donation_id = donation.id,
                        code = e.code(),
                        error = %e,
                        "Emergency sweep failed on donation"
                    );
                }
            }
        }

        report.scan_duration_ms = started.elapsed().as_millis() as u64;
        info!(
            scanned = report.scanned_items,
            emergencies = report.emergency_found,
            auto_assigned = report.auto_assigned_count,
            duration_ms = report.scan_duration_ms,
            "Emergency sweep completed"
        );
        Ok(report)
    }

    /// Auto-assign `donation` if it is available and already an emergency.
    /// Allocation errors are reported in the outcome rather than returned.
    pub async fn check_and_trigger(&self, donation: &Donation) -> TriggerOutcome {
        let urgency = self.urgency_of(donation);

        if !urgency.is_emergency() || donation.status != DonationStatus::Available {
            return TriggerOutcome {
                auto_triggered: false,
                urgency,
                allocation: None,
                reason: None,
            };
        }

        info!(
            donation_id = donation.id,
            urgency_score = urgency.score,
            "Emergency on intake; auto-rescuing donation"
        );

        match self.engine.allocate(donation.id, AllocateOptions::auto()).await {
            Ok(allocation) if allocation.is_matched() => TriggerOutcome {
                auto_triggered: true,
                urgency,
                allocation: Some(allocation),
                reason: None,
            },
            Ok(_) => TriggerOutcome {
                auto_triggered: true,
                urgency,
                allocation: None,
                reason: Some("NO_ORGANIZATION_AVAILABLE".to_string()),
            },
            Err(e) => {
                error!(donation_id = donation.id, error = %e, "Emergency trigger failed");
                TriggerOutcome {
                    auto_triggered: true,
                    urgency,
                    allocation: None,
                    reason: Some(e.code().to_string()),
                }
            }
        }
    }

    fn urgency_of(&self, donation: &Donation) -> UrgencyAssessment {
        calculate_urgency(donation.expires_at_utc(), donation.quantity, self.engine.now())
    }
}
