#![allow(dead_code)]

pub mod invariants;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tempfile::TempDir;

use matcher::allocation::AllocationEngine;
use matcher::clock::{Clock, ManualClock};
use matcher::db;
use matcher::emergency::EmergencySweep;
use matcher::intake::{self, Intake};
use matcher::models::{
    Donation, FoodType, NewDonation, NewOrganization, Organization, OrganizationStatus,
    QuantityUnit,
};
use matcher::reaper::ExpiryReaper;

/// Fixed start time for every test.
pub const T0: i64 = 1_750_000_000;

/// Roughly one kilometre of longitude at the equator.
pub const KM_LNG: f64 = 0.008_993;

pub struct Harness {
    pub pool: SqlitePool,
    pub clock: Arc<ManualClock>,
    pub engine: AllocationEngine,
    pub sweep: EmergencySweep,
    pub reaper: ExpiryReaper,
    pub intake: Intake,
    /// `(organization_id, capacity at registration)`
    pub registered: Vec<(i64, i64)>,
    _dir: Option<TempDir>,
}

impl Harness {
    pub async fn new() -> Self {
        let pool = db::init_memory_pool().await.expect("in-memory pool");
        Self::with_pool(pool, None)
    }

    /// A file database with several pooled connections, so engine calls from
    /// different tasks really do overlap.
    pub async fn on_file(connections: u32) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("matcher.db");
        let pool = db::init_pool(&path.to_string_lossy(), connections)
            .await
            .expect("file pool");
        Self::with_pool(pool, Some(dir))
    }

    fn with_pool(pool: SqlitePool, dir: Option<TempDir>) -> Self {
        let clock = Arc::new(ManualClock::new(at(T0)));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let engine = AllocationEngine::new(pool.clone(), Arc::clone(&dyn_clock));
        Self {
            sweep: EmergencySweep::new(engine.clone()),
            reaper: ExpiryReaper::new(pool.clone(), dyn_clock),
            intake: Intake::new(engine.clone()),
            engine,
            clock,
            pool,
            registered: Vec::new(),
            _dir: dir,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance_hours(&self, hours: i64) {
        self.clock.advance(Duration::hours(hours));
    }

    /// Active organization `km` kilometres east of the origin.
    pub async fn organization(&mut self, name: &str, km: f64, capacity: i64) -> Organization {
        let input = NewOrganization {
            name: name.to_string(),
            lat: 0.0,
            lng: km * KM_LNG,
            contact: "555-0100".to_string(),
            email: None,
            capacity,
            avg_response_minutes: 15.0,
            status: OrganizationStatus::Active,
        };
        let organization = intake::register_organization(&self.pool, &input, self.now())
            .await
            .expect("register organization");
        self.registered.push((organization.id, capacity));
        organization
    }

    /// Store a donation at the origin without attempting allocation.
    pub async fn donation(&self, quantity: f64, expires_in_minutes: i64) -> Donation {
        let input = new_donation(quantity, self.now().timestamp() + expires_in_minutes * 60);
        db::insert_donation(&self.pool, &input, self.now().timestamp())
            .await
            .expect("insert donation")
    }

    pub async fn reload_donation(&self, id: i64) -> Donation {
        db::get_donation(&self.pool, id)
            .await
            .expect("query donation")
            .expect("donation exists")
    }

    pub async fn reload_organization(&self, id: i64) -> Organization {
        db::get_organization(&self.pool, id)
            .await
            .expect("query organization")
            .expect("organization exists")
    }

    pub async fn check_invariants(&self) {
        invariants::assert_capacity_conserved(&self.pool, &self.registered).await;
        invariants::assert_one_active_match_per_donation(&self.pool).await;
        invariants::assert_assignment_consistent(&self.pool).await;
    }
}

pub fn at(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).expect("valid timestamp")
}

pub fn new_donation(quantity: f64, expires_at: i64) -> NewDonation {
    NewDonation {
        food_type: FoodType::Cooked,
        quantity,
        unit: QuantityUnit::Portions,
        description: Some("jollof rice".to_string()),
        lat: 0.0,
        lng: 0.0,
        donor_name: Some("Corner Bistro".to_string()),
        donor_contact: None,
        notes: None,
        expires_at,
    }
}
