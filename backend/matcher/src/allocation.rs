//! Allocation engine: pick the best organization for a donation and reserve
//! one unit of its capacity, and drive match status transitions.
//!
//! Both operations run inside a single SQLite transaction. Shared state
//! (`donations.status`, `organizations.capacity`, `matches.status`) is only
//! ever changed through the conditional helpers in [`crate::db`]; when one of
//! them reports that no row matched its precondition the operation returns a
//! conflict error and the transaction is dropped, rolling back every earlier
//! write in the unit.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::db;
use crate::errors::{EngineError, Result};
use crate::models::{
    Donation, DonationStatus, Match, MatchDetails, MatchStatus, Organization,
};
use crate::scoring::{calculate_score, ScoreBreakdown};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocateOptions {
    /// Mark the donation as system-dispatched (emergency path).
    pub auto_assign: bool,
}

impl AllocateOptions {
    pub fn auto() -> Self {
        Self { auto_assign: true }
    }
}

/// Outcome of [`AllocationEngine::allocate`]. Both fields are `None` when the
/// donation was no longer available or no organization could take it; that
/// is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    #[serde(rename = "match")]
    pub matched: Option<MatchDetails>,
    pub score: Option<f64>,
}

impl Allocation {
    pub fn none() -> Self {
        Self {
            matched: None,
            score: None,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.matched.is_some()
    }
}

#[derive(Clone)]
pub struct AllocationEngine {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl AllocationEngine {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Match `donation_id` to the highest-scoring eligible organization.
    ///
    /// Errors: `NotFound` if the donation does not exist; `AssignmentConflict`
    /// or `CapacityConflict` if a concurrent writer won a race. Conflicts are
    /// safe to retry while the donation is still available.
    pub async fn allocate(&self, donation_id: i64, options: AllocateOptions) -> Result<Allocation> {
        let now = self.clock.now();
        let mut tx = db::begin_write(&self.pool).await?;

        let donation = db::get_donation(&mut *tx, donation_id)
            .await?
            .ok_or_else(|| EngineError::not_found("donation", donation_id))?;

        if donation.status != DonationStatus::Available {
            debug!(
                donation_id,
                status = donation.status.as_str(),
                "Donation no longer available; skipping allocation"
            );
            return Ok(Allocation::none());
        }

        // Past its deadline but not yet reaped: leave it for the reaper.
        if donation.expires_at <= now.timestamp() {
            debug!(donation_id, "Donation past its deadline; skipping allocation");
            return Ok(Allocation::none());
        }

        let candidates = db::list_eligible_organizations(&mut tx).await?;
        if candidates.is_empty() {
            info!(donation_id, "No organization available for donation");
            return Ok(Allocation::none());
        }

        let ids: Vec<i64> = candidates.iter().map(|o| o.id).collect();
        let active_counts = db::active_match_counts(&mut tx, &ids).await?;

        let Some((winner, score)) = select_best(&donation, &candidates, &active_counts, now) else {
            return Ok(Allocation::none());
        };
        let organization_id = winner.id;

        if !db::claim_donation(&mut tx, donation_id, organization_id, options.auto_assign).await? {
            warn!(donation_id, "Donation was claimed concurrently");
            return Err(EngineError::AssignmentConflict(format!(
                "donation {donation_id} is no longer available"
            )));
        }

        if !db::apply_capacity_delta(&mut tx, organization_id, -1).await? {
            warn!(donation_id, organization_id, "Capacity exhausted concurrently");
            return Err(EngineError::CapacityConflict { organization_id });
        }

        let record =
            db::insert_match(&mut tx, donation_id, organization_id, &score, now.timestamp())
                .await?;
        let details = load_details(&mut tx, record).await?;

        tx.commit().await?;

        info!(
            donation_id,
            organization_id,
            match_id = details.record.id,
            total_score = score.total_score,
            distance_km = score.distance_km,
            auto_assigned = options.auto_assign,
            "Donation allocated"
        );

        Ok(Allocation {
            matched: Some(details),
            score: Some(score.total_score),
        })
    }

    /// Move a match to `new_status`, releasing or re-reserving capacity and
    /// updating the donation in the same transaction.
    ///
    /// Setting the status a match already has returns it unchanged.
    pub async fn set_match_status(
        &self,
        match_id: i64,
        new_status: MatchStatus,
    ) -> Result<MatchDetails> {
        let now = self.clock.now();
        let mut tx = db::begin_write(&self.pool).await?;

        let current = db::get_match(&mut *tx, match_id)
            .await?
            .ok_or_else(|| EngineError::not_found("match", match_id))?;
        let previous = current.status;

        if previous == new_status {
            return load_details(&mut tx, current).await;
        }

        if !previous.can_transition_to(new_status) {
            return Err(EngineError::InvalidTransition {
                from: previous.to_string(),
                to: new_status.to_string(),
            });
        }

        let organization_id = current.organization_id;
        let delta = capacity_delta(previous, new_status);
        if delta != 0 && !db::apply_capacity_delta(&mut tx, organization_id, delta).await? {
            return Err(EngineError::CapacityConflict { organization_id });
        }

        let completed_at = (new_status == MatchStatus::Completed).then(|| now.timestamp());
        if !db::transition_match(&mut tx, match_id, previous, new_status, completed_at).await? {
            return Err(EngineError::AssignmentConflict(format!(
                "match {match_id} changed concurrently"
            )));
        }

        if let Some(donation_status) = donation_status_after(new_status) {
            let moved = db::transition_donation(
                &mut tx,
                current.donation_id,
                DonationStatus::Assigned,
                donation_status,
            )
            .await?;
            if !moved {
                return Err(EngineError::AssignmentConflict(format!(
                    "donation {} is no longer assigned",
                    current.donation_id
                )));
            }
        }

        let updated = db::get_match(&mut *tx, match_id)
            .await?
            .ok_or_else(|| EngineError::not_found("match", match_id))?;
        let details = load_details(&mut tx, updated).await?;

        tx.commit().await?;

        info!(
            match_id,
            from = previous.as_str(),
            to = new_status.as_str(),
            capacity_delta = delta,
            "Match status updated"
        );

        Ok(details)
    }

    /// Fetch a match joined with its donation and organization.
    pub async fn match_details(&self, match_id: i64) -> Result<MatchDetails> {
        let mut conn = self.pool.acquire().await?;
        let record = db::get_match(&mut *conn, match_id)
            .await?
            .ok_or_else(|| EngineError::not_found("match", match_id))?;
        load_details(&mut conn, record).await
    }
}

/// Highest `total_score` wins; on equal totals the first candidate seen keeps
/// the slot.
pub fn select_best<'a>(
    donation: &Donation,
    candidates: &'a [Organization],
    active_counts: &HashMap<i64, i64>,
    now: DateTime<Utc>,
) -> Option<(&'a Organization, ScoreBreakdown)> {
    let mut best: Option<(&Organization, ScoreBreakdown)> = None;

    for organization in candidates {
        let active = active_counts.get(&organization.id).copied().unwrap_or(0);
        let score = calculate_score(donation, organization, active, now);

        let better = match &best {
            Some((_, current)) => score.total_score > current.total_score,
            None => true,
        };
        if better {
            best = Some((organization, score));
        }
    }

    best
}

/// `+1` when a match leaves the active set, `-1` when it (re-)enters it.
pub fn capacity_delta(from: MatchStatus, to: MatchStatus) -> i64 {
    match (from.is_active(), to.is_active()) {
        (true, false) => 1,
        (false, true) => -1,
        _ => 0,
    }
}

fn donation_status_after(match_status: MatchStatus) -> Option<DonationStatus> {
    match match_status {
        MatchStatus::Rejected => Some(DonationStatus::Available),
        MatchStatus::Completed => Some(DonationStatus::Delivered),
        MatchStatus::Expired => Some(DonationStatus::Expired),
        MatchStatus::Pending | MatchStatus::Accepted => None,
    }
}

async fn load_details(conn: &mut SqliteConnection, record: Match) -> Result<MatchDetails> {
    let donation = db::get_donation(&mut *conn, record.donation_id)
        .await?
        .ok_or_else(|| EngineError::not_found("donation", record.donation_id))?;
    let organization = db::get_organization(&mut *conn, record.organization_id)
        .await?
        .ok_or_else(|| EngineError::not_found("organization", record.organization_id))?;
    Ok(MatchDetails {
        record,
        donation,
        organization,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FoodType, OrganizationStatus, QuantityUnit};

    const NOW: i64 = 1_750_000_000;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(NOW, 0).unwrap()
    }

    fn donation() -> Donation {
        Donation {
            id: 1,
            food_type: FoodType::Prepared,
            quantity: 20.0,
            unit: QuantityUnit::Portions,
            description: None,
            lat: 0.0,
            lng: 0.0,
            donor_name: None,
            donor_contact: None,
            notes: None,
            status: DonationStatus::Available,
            assigned_organization_id: None,
            is_auto_assigned: false,
            expires_at: NOW + 8 * 3600,
            created_at: NOW,
        }
    }

    fn organization(id: i64, lng: f64, capacity: i64) -> Organization {
        Organization {
            id,
            name: format!("org-{id}"),
            lat: 0.0,
            lng,
            contact: "555-0100".into(),
            email: None,
            capacity,
            avg_response_minutes: 15.0,
            status: OrganizationStatus::Active,
            created_at: NOW,
        }
    }

    #[test]
    fn picks_strictly_greatest_total() {
        let orgs = vec![
            organization(1, 0.1349, 5),
            organization(2, 0.008_993, 5),
            organization(3, 0.05, 5),
        ];
        let (winner, score) = select_best(&donation(), &orgs, &HashMap::new(), now()).unwrap();
        assert_eq!(winner.id, 2);
        assert!(score.distance_km < 1.1);
    }

    #[test]
    fn ties_keep_first_candidate() {
        let orgs = vec![organization(4, 0.0, 10), organization(5, 0.0, 10)];
        let (winner, _) = select_best(&donation(), &orgs, &HashMap::new(), now()).unwrap();
        assert_eq!(winner.id, 4);
    }

    #[test]
    fn load_breaks_otherwise_equal_candidates() {
        let orgs = vec![organization(4, 0.0, 10), organization(5, 0.0, 10)];
        let counts = HashMap::from([(4, 6)]);
        let (winner, score) = select_best(&donation(), &orgs, &counts, now()).unwrap();
        assert_eq!(winner.id, 5);
        assert_eq!(score.load_balance_score, 100.0);
    }

    #[test]
    fn empty_candidates_select_nothing() {
        assert!(select_best(&donation(), &[], &HashMap::new(), now()).is_none());
    }

    #[test]
    fn capacity_delta_follows_active_set() {
        use MatchStatus::*;
        assert_eq!(capacity_delta(Pending, Rejected), 1);
        assert_eq!(capacity_delta(Accepted, Completed), 1);
        assert_eq!(capacity_delta(Accepted, Expired), 1);
        assert_eq!(capacity_delta(Pending, Accepted), 0);
        assert_eq!(capacity_delta(Rejected, Pending), -1);
        assert_eq!(capacity_delta(Completed, Expired), 0);
    }

    #[test]
    fn donation_follows_match_outcome() {
        assert_eq!(
            donation_status_after(MatchStatus::Rejected),
            Some(DonationStatus::Available)
        );
        assert_eq!(
            donation_status_after(MatchStatus::Completed),
            Some(DonationStatus::Delivered)
        );
        assert_eq!(
            donation_status_after(MatchStatus::Expired),
            Some(DonationStatus::Expired)
        );
        assert_eq!(donation_status_after(MatchStatus::Accepted), None);
    }
}
