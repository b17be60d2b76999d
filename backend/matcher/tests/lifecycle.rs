mod common;

use assert_matches::assert_matches;

use common::Harness;
use matcher::allocation::AllocateOptions;
use matcher::errors::EngineError;
use matcher::models::{DonationStatus, MatchStatus};

async fn allocated(h: &mut Harness, capacity: i64) -> (i64, i64, i64) {
    let org = h.organization("Riverside Shelter", 2.0, capacity).await;
    let donation = h.donation(12.0, 8 * 60).await;
    let allocation = h.engine.allocate(donation.id, AllocateOptions::default()).await.unwrap();
    let details = allocation.matched.expect("allocated");
    (donation.id, org.id, details.record.id)
}

#[tokio::test]
async fn rejection_returns_donation_and_capacity() {
    let mut h = Harness::new().await;
    let (donation_id, org_id, match_id) = allocated(&mut h, 5).await;
    assert_eq!(h.reload_organization(org_id).await.capacity, 4);

    let details = h.engine.set_match_status(match_id, MatchStatus::Rejected).await.unwrap();

    assert_eq!(details.record.status, MatchStatus::Rejected);
    assert_eq!(details.donation.status, DonationStatus::Available);
    assert_eq!(details.donation.assigned_organization_id, None);
    assert_eq!(details.organization.capacity, 5);
    h.check_invariants().await;

    // Back in the pool, so it can be matched again.
    let again = h.engine.allocate(donation_id, AllocateOptions::default()).await.unwrap();
    assert!(again.is_matched());
    h.check_invariants().await;
}

#[tokio::test]
async fn accept_then_complete_delivers() {
    let mut h = Harness::new().await;
    let (donation_id, org_id, match_id) = allocated(&mut h, 3).await;

    let accepted = h.engine.set_match_status(match_id, MatchStatus::Accepted).await.unwrap();
    assert_eq!(accepted.record.status, MatchStatus::Accepted);
    assert_eq!(accepted.organization.capacity, 2);

    h.advance_hours(1);
    let completed = h.engine.set_match_status(match_id, MatchStatus::Completed).await.unwrap();
    assert_eq!(completed.record.status, MatchStatus::Completed);
    assert_eq!(completed.record.completed_at, Some(h.now().timestamp()));
    assert_eq!(completed.donation.status, DonationStatus::Delivered);
    assert_eq!(completed.donation.assigned_organization_id, Some(org_id));
    assert_eq!(h.reload_organization(org_id).await.capacity, 3);
    assert_eq!(h.reload_donation(donation_id).await.status, DonationStatus::Delivered);

    h.check_invariants().await;
}

#[tokio::test]
async fn repeating_a_status_changes_nothing() {
    let mut h = Harness::new().await;
    let (_, org_id, match_id) = allocated(&mut h, 3).await;

    let first = h.engine.set_match_status(match_id, MatchStatus::Accepted).await.unwrap();
    let second = h.engine.set_match_status(match_id, MatchStatus::Accepted).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.reload_organization(org_id).await.capacity, 2);
    h.check_invariants().await;
}

#[tokio::test]
async fn backwards_and_skipping_transitions_are_rejected() {
    let mut h = Harness::new().await;
    let (_, org_id, match_id) = allocated(&mut h, 3).await;

    assert_matches!(
        h.engine.set_match_status(match_id, MatchStatus::Completed).await,
        Err(EngineError::InvalidTransition { from, to }) if from == "pending" && to == "completed"
    );

    h.engine.set_match_status(match_id, MatchStatus::Rejected).await.unwrap();
    assert_matches!(
        h.engine.set_match_status(match_id, MatchStatus::Pending).await,
        Err(EngineError::InvalidTransition { .. })
    );
    assert_matches!(
        h.engine.set_match_status(match_id, MatchStatus::Accepted).await,
        Err(EngineError::InvalidTransition { .. })
    );

    // Failed transitions leave capacity alone.
    assert_eq!(h.reload_organization(org_id).await.capacity, 3);
    h.check_invariants().await;
}

#[tokio::test]
async fn reaper_expires_overdue_donations_and_releases_capacity() {
    let mut h = Harness::new().await;
    let (donation_id, org_id, match_id) = allocated(&mut h, 4).await;
    h.engine.set_match_status(match_id, MatchStatus::Accepted).await.unwrap();
    let idle = h.donation(3.0, 8 * 60).await;
    let fresh_later = h.donation(3.0, 48 * 60).await;

    // Nothing is due yet.
    assert!(h.reaper.reap().await.unwrap().is_empty());

    h.advance_hours(9);
    let report = h.reaper.reap().await.unwrap();

    assert_eq!(report.expired_donations, 2);
    assert_eq!(report.expired_matches, 1);
    assert_eq!(report.released_capacity, vec![(org_id, 1)]);

    let expired = h.reload_donation(donation_id).await;
    assert_eq!(expired.status, DonationStatus::Expired);
    assert_eq!(expired.assigned_organization_id, None);
    assert_eq!(h.reload_donation(idle.id).await.status, DonationStatus::Expired);
    assert_eq!(h.reload_donation(fresh_later.id).await.status, DonationStatus::Available);

    let record = h.engine.match_details(match_id).await.unwrap().record;
    assert_eq!(record.status, MatchStatus::Expired);
    assert_eq!(h.reload_organization(org_id).await.capacity, 4);
    h.check_invariants().await;

    // A second run finds nothing left to do.
    assert!(h.reaper.reap().await.unwrap().is_empty());
    assert_eq!(h.reload_organization(org_id).await.capacity, 4);
}

#[tokio::test]
async fn delivered_donations_survive_the_reaper() {
    let mut h = Harness::new().await;
    let (donation_id, org_id, match_id) = allocated(&mut h, 2).await;
    h.engine.set_match_status(match_id, MatchStatus::Accepted).await.unwrap();
    h.engine.set_match_status(match_id, MatchStatus::Completed).await.unwrap();

    h.advance_hours(24);
    let report = h.reaper.reap().await.unwrap();

    assert!(report.is_empty());
    assert_eq!(h.reload_donation(donation_id).await.status, DonationStatus::Delivered);
    assert_eq!(h.reload_organization(org_id).await.capacity, 2);
    h.check_invariants().await;
}

#[tokio::test]
async fn capacity_is_conserved_across_mixed_operations() {
    let mut h = Harness::new().await;
    h.organization("Alpha", 1.0, 3).await;
    h.organization("Beta", 5.0, 2).await;
    h.organization("Gamma", 9.0, 4).await;

    let mut match_ids = Vec::new();
    for _ in 0..7 {
        let donation = h.donation(8.0, 8 * 60).await;
        if let Some(details) = h
            .engine
            .allocate(donation.id, AllocateOptions::default())
            .await
            .unwrap()
            .matched
        {
            match_ids.push(details.record.id);
        }
        h.check_invariants().await;
    }
    assert_eq!(match_ids.len(), 7);

    h.engine.set_match_status(match_ids[0], MatchStatus::Rejected).await.unwrap();
    h.engine.set_match_status(match_ids[1], MatchStatus::Accepted).await.unwrap();
    h.engine.set_match_status(match_ids[1], MatchStatus::Completed).await.unwrap();
    h.engine.set_match_status(match_ids[2], MatchStatus::Accepted).await.unwrap();
    h.engine.set_match_status(match_ids[3], MatchStatus::Expired).await.unwrap();
    h.check_invariants().await;

    h.advance_hours(10);
    h.reaper.reap().await.unwrap();
    h.check_invariants().await;

    let active = matcher::db::list_matches(&h.pool, Some(MatchStatus::Pending), None)
        .await
        .unwrap();
    assert!(active.is_empty());
}
