//! Persistent records for donations, recipient organizations and matches.
//!
//! Enum-valued columns are stored as lowercase `TEXT` and round-trip through
//! [`sqlx::Type`]; `as_str` gives the same identifier for logs and SQL literals.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────
// Enumerations
// ─────────────────────────────────────────────────────────

/// Lifecycle of a donation.
///
/// ```text
/// available ──► assigned ──► delivered
///     │   ◄──────┘ (rejected)
///     └──────────┴──► expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DonationStatus {
    Available,
    Assigned,
    Delivered,
    Expired,
}

impl DonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Assigned => "assigned",
            Self::Delivered => "delivered",
            Self::Expired => "expired",
        }
    }
}

/// Lifecycle of a match. `pending` and `accepted` are the active states and
/// count against the organization's capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Accepted,
    Rejected,
    Completed,
    Expired,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Forward-only transitions:
    ///   pending  -> accepted | rejected | expired
    ///   accepted -> completed | rejected | expired
    /// Terminal states never change.
    pub fn can_transition_to(&self, next: MatchStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Accepted)
                | (Self::Pending, Self::Rejected)
                | (Self::Pending, Self::Expired)
                | (Self::Accepted, Self::Completed)
                | (Self::Accepted, Self::Rejected)
                | (Self::Accepted, Self::Expired)
        )
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a status string names no known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for MatchStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "completed" => Ok(Self::Completed),
            "expired" => Ok(Self::Expired),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl FromStr for DonationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "assigned" => Ok(Self::Assigned),
            "delivered" => Ok(Self::Delivered),
            "expired" => Ok(Self::Expired),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OrganizationStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FoodType {
    Cooked,
    Raw,
    Packaged,
    Prepared,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum QuantityUnit {
    #[default]
    Kg,
    Liters,
    Portions,
    Boxes,
}

// ─────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────

/// A posted quantity of surplus food with a pickup location and deadline.
/// Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Donation {
    pub id: i64,
    pub food_type: FoodType,
    pub quantity: f64,
    pub unit: QuantityUnit,
    pub description: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub donor_name: Option<String>,
    pub donor_contact: Option<String>,
    pub notes: Option<String>,
    pub status: DonationStatus,
    pub assigned_organization_id: Option<i64>,
    /// Set when the emergency path dispatched this donation without a human.
    pub is_auto_assigned: bool,
    pub expires_at: i64,
    pub created_at: i64,
}

impl Donation {
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expires_at, 0)
    }
}

/// A recipient organization with finite intake capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub contact: String,
    pub email: Option<String>,
    /// Remaining intake capacity; never negative.
    pub capacity: i64,
    /// Average response time in minutes, a reliability proxy.
    pub avg_response_minutes: f64,
    pub status: OrganizationStatus,
    pub created_at: i64,
}

/// The allocation record binding one donation to one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Match {
    pub id: i64,
    pub donation_id: i64,
    pub organization_id: i64,
    pub total_score: f64,
    pub distance_score: f64,
    pub urgency_score: f64,
    pub capacity_score: f64,
    pub load_balance_score: f64,
    pub distance_km: f64,
    pub status: MatchStatus,
    pub assigned_at: i64,
    pub completed_at: Option<i64>,
}

/// A match joined with the donation and organization it binds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchDetails {
    #[serde(flatten)]
    pub record: Match,
    pub donation: Donation,
    pub organization: Organization,
}

// ─────────────────────────────────────────────────────────
// Inputs
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct NewDonation {
    pub food_type: FoodType,
    pub quantity: f64,
    #[serde(default)]
    pub unit: QuantityUnit,
    pub description: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub donor_name: Option<String>,
    pub donor_contact: Option<String>,
    pub notes: Option<String>,
    /// Unix seconds; must lie strictly in the future.
    pub expires_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrganization {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub contact: String,
    pub email: Option<String>,
    #[serde(default = "default_capacity")]
    pub capacity: i64,
    #[serde(default = "default_avg_response_minutes")]
    pub avg_response_minutes: f64,
    #[serde(default = "default_organization_status")]
    pub status: OrganizationStatus,
}

fn default_capacity() -> i64 {
    100
}

fn default_avg_response_minutes() -> f64 {
    15.0
}

fn default_organization_status() -> OrganizationStatus {
    OrganizationStatus::Inactive
}
