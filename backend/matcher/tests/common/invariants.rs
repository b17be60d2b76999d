//! Whole-database consistency checks run after engine operations.

use sqlx::SqlitePool;

/// Capacity conservation: for every organization, the capacity it was
/// registered with equals its current capacity plus its active matches.
pub async fn assert_capacity_conserved(pool: &SqlitePool, registered: &[(i64, i64)]) {
    for &(organization_id, initial) in registered {
        let (capacity,): (i64,) = sqlx::query_as("SELECT capacity FROM organizations WHERE id = ?1")
            .bind(organization_id)
            .fetch_one(pool)
            .await
            .expect("organization row");
        let (active,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM matches \
             WHERE organization_id = ?1 AND status IN ('pending', 'accepted')",
        )
        .bind(organization_id)
        .fetch_one(pool)
        .await
        .expect("active match count");

        assert!(capacity >= 0, "organization {organization_id} has negative capacity {capacity}");
        assert_eq!(
            capacity + active,
            initial,
            "capacity not conserved for organization {organization_id}: {capacity} + {active} != {initial}"
        );
    }
}

/// No donation ever has more than one pending/accepted match.
pub async fn assert_one_active_match_per_donation(pool: &SqlitePool) {
    let offenders: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT donation_id, COUNT(*) FROM matches \
         WHERE status IN ('pending', 'accepted') \
         GROUP BY donation_id HAVING COUNT(*) > 1",
    )
    .fetch_all(pool)
    .await
    .expect("active match groups");
    assert!(offenders.is_empty(), "donations with several active matches: {offenders:?}");
}

/// An `assigned` donation has exactly one active match, with the organization
/// recorded on the donation; any other donation has none.
pub async fn assert_assignment_consistent(pool: &SqlitePool) {
    let rows: Vec<(i64, String, Option<i64>, Option<i64>)> = sqlx::query_as(
        "SELECT d.id, d.status, d.assigned_organization_id, m.organization_id \
         FROM donations d \
         LEFT JOIN matches m \
           ON m.donation_id = d.id AND m.status IN ('pending', 'accepted')",
    )
    .fetch_all(pool)
    .await
    .expect("donation/match join");

    for (donation_id, status, assigned_to, matched_to) in rows {
        if status == "assigned" {
            assert!(matched_to.is_some(), "assigned donation {donation_id} has no active match");
            assert_eq!(
                assigned_to, matched_to,
                "donation {donation_id} assigned to {assigned_to:?} but matched to {matched_to:?}"
            );
        } else {
            assert!(
                matched_to.is_none(),
                "{status} donation {donation_id} still has an active match"
            );
        }
    }
}
