//! Donation matcher entry point.
//!
//! Starts the periodic emergency sweep and expiry reaper, and exposes the
//! engine over a small Axum REST API. Ctrl-C stops the background loops and
//! drains in-flight requests.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use matcher::allocation::AllocationEngine;
use matcher::api::{self, ApiState};
use matcher::clock::{Clock, SystemClock};
use matcher::config::Config;
use matcher::db;
use matcher::emergency::EmergencySweep;
use matcher::reaper::ExpiryReaper;
use matcher::scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = AllocationEngine::new(pool.clone(), Arc::clone(&clock));

    // ─── Background tasks ─────────────────────────────────
    let scheduler = Scheduler::new();
    let tasks = scheduler.start(
        EmergencySweep::new(engine.clone()),
        ExpiryReaper::new(pool, clock),
        Duration::from_secs(config.sweep_interval_secs),
        Duration::from_secs(config.reap_interval_secs),
    );

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(ApiState::new(engine, scheduler.sweep_guard()));
    let app = api::router(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let shutdown = scheduler.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            shutdown.shutdown();
        })
        .await?;

    for task in tasks {
        let _ = task.await;
    }
    info!("Background tasks stopped");

    Ok(())
}
