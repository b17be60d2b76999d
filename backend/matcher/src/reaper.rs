//! Expiry reaper: reclaim donations whose deadline has passed.
//!
//! One run is a single transaction. Overdue donations become `expired`, their
//! pending/accepted matches become `expired`, and each affected organization
//! gets its capacity back in one aggregated update. Any failure rolls the
//! whole batch back.

use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::db;
use crate::errors::{EngineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub expired_donations: u64,
    pub expired_matches: u64,
    /// `(organization_id, units released)`, ordered by organization.
    pub released_capacity: Vec<(i64, i64)>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.expired_donations == 0 && self.expired_matches == 0
    }
}

#[derive(Clone)]
pub struct ExpiryReaper {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl ExpiryReaper {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn reap(&self) -> Result<ReapReport> {
        let now = self.clock.now().timestamp();
        let mut tx = db::begin_write(&self.pool).await?;

        let released = db::overdue_active_match_counts(&mut tx, now).await?;
        let expired_matches = db::expire_overdue_matches(&mut tx, now).await?;

        for &(organization_id, count) in &released {
            if !db::apply_capacity_delta(&mut tx, organization_id, count).await? {
                return Err(EngineError::CapacityConflict { organization_id });
            }
        }

        let expired_donations = db::expire_overdue_donations(&mut tx, now).await?;

        tx.commit().await?;

        let report = ReapReport {
            expired_donations,
            expired_matches,
            released_capacity: released,
        };

        if report.is_empty() {
            debug!("Expiry reaper: nothing overdue");
        } else {
            info!(
                expired_donations = report.expired_donations,
                expired_matches = report.expired_matches,
                organizations_released = report.released_capacity.len(),
                "Expiry reaper reclaimed overdue donations"
            );
        }

        Ok(report)
    }
}
