//! Donation and organization intake.
//!
//! Input is validated before anything touches the database. A new donation
//! goes through the emergency trigger first and then, if that did not
//! already place it, through a regular allocation attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::allocation::{AllocateOptions, Allocation, AllocationEngine};
use crate::db;
use crate::emergency::{EmergencySweep, TriggerOutcome};
use crate::errors::{EngineError, Result};
use crate::models::{Donation, NewDonation, NewOrganization, Organization, OrganizationStatus};
use crate::urgency::UrgencyAssessment;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    /// The donation as stored after any allocation.
    pub donation: Donation,
    pub urgency: UrgencyAssessment,
    pub trigger: TriggerOutcome,
    pub allocation: Allocation,
}

/// Partial administrative update of an organization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrganizationUpdate {
    pub capacity: Option<i64>,
    pub status: Option<OrganizationStatus>,
    pub avg_response_minutes: Option<f64>,
}

#[derive(Clone)]
pub struct Intake {
    engine: AllocationEngine,
    sweep: EmergencySweep,
}

impl Intake {
    pub fn new(engine: AllocationEngine) -> Self {
        let sweep = EmergencySweep::new(engine.clone());
        Self { engine, sweep }
    }

    pub async fn submit_donation(&self, input: NewDonation) -> Result<Submission> {
        validate_donation(&input, self.engine.now())?;

        let created_at = self.engine.now().timestamp();
        let donation = db::insert_donation(self.engine.pool(), &input, created_at).await?;
        info!(
            donation_id = donation.id,
            food_type = ?donation.food_type,
            quantity = donation.quantity,
            "Donation received"
        );

        let trigger = self.sweep.check_and_trigger(&donation).await;

        let allocation = match &trigger.allocation {
            Some(placed) => placed.clone(),
            None => match self.engine.allocate(donation.id, AllocateOptions::default()).await {
                Ok(allocation) => allocation,
                // The donation stays available for the sweep to pick up.
                Err(e) if e.is_retryable() => {
                    warn!(donation_id = donation.id, error = %e, "Allocation on intake lost a race");
                    Allocation::none()
                }
                Err(e) => return Err(e),
            },
        };

        let donation = db::get_donation(self.engine.pool(), donation.id)
            .await?
            .ok_or_else(|| EngineError::not_found("donation", donation.id))?;

        Ok(Submission {
            donation,
            urgency: trigger.urgency,
            trigger,
            allocation,
        })
    }
}

pub async fn register_organization(
    pool: &SqlitePool,
    input: &NewOrganization,
    now: DateTime<Utc>,
) -> Result<Organization> {
    validate_organization(input)?;
    let organization = db::insert_organization(pool, input, now.timestamp()).await?;
    info!(
        organization_id = organization.id,
        capacity = organization.capacity,
        status = ?organization.status,
        "Organization registered"
    );
    Ok(organization)
}

pub async fn update_organization(
    pool: &SqlitePool,
    id: i64,
    update: &OrganizationUpdate,
) -> Result<Organization> {
    if matches!(update.capacity, Some(c) if c < 0) {
        return Err(EngineError::Validation("capacity must not be negative".into()));
    }
    if let Some(minutes) = update.avg_response_minutes {
        check_response_minutes(minutes)?;
    }

    db::update_organization(
        pool,
        id,
        update.capacity,
        update.status,
        update.avg_response_minutes,
    )
    .await?
    .ok_or_else(|| EngineError::not_found("organization", id))
}

pub fn validate_donation(input: &NewDonation, now: DateTime<Utc>) -> Result<()> {
    if !input.quantity.is_finite() || input.quantity <= 0.0 {
        return Err(EngineError::Validation(
            "quantity must be a positive number".into(),
        ));
    }
    check_coordinates(input.lat, input.lng)?;
    if input.expires_at <= now.timestamp() {
        return Err(EngineError::Validation(
            "expires_at must be in the future".into(),
        ));
    }
    Ok(())
}

pub fn validate_organization(input: &NewOrganization) -> Result<()> {
    if input.name.trim().is_empty() {
        return Err(EngineError::Validation("name is required".into()));
    }
    if input.contact.trim().is_empty() {
        return Err(EngineError::Validation("contact is required".into()));
    }
    check_coordinates(input.lat, input.lng)?;
    if input.capacity < 0 {
        return Err(EngineError::Validation("capacity must not be negative".into()));
    }
    check_response_minutes(input.avg_response_minutes)
}

fn check_coordinates(lat: f64, lng: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(EngineError::Validation(format!("latitude {lat} out of range")));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(EngineError::Validation(format!("longitude {lng} out of range")));
    }
    Ok(())
}

fn check_response_minutes(minutes: f64) -> Result<()> {
    if !minutes.is_finite() || minutes < 0.0 {
        return Err(EngineError::Validation(
            "avg_response_minutes must not be negative".into(),
        ));
    }
    Ok(())
}
