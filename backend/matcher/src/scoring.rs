//! Pair score for a (donation, organization) candidate.
//!
//! Every component sits on a 0-100 scale before weighting:
//!
//! | Component     | Weight | Formula                              |
//! |---------------|--------|--------------------------------------|
//! | distance      | 0.4    | `100 - 5 * km`, zero beyond 20 km    |
//! | urgency       | 0.3    | food-level urgency score             |
//! | capacity      | 0.2    | `min(100, 2 * remaining capacity)`   |
//! | load balance  | 0.1    | `max(0, 100 - 10 * active matches)`  |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::distance_km;
use crate::models::{Donation, Organization};
use crate::urgency::calculate_urgency;

pub const W_DISTANCE: f64 = 0.4;
pub const W_URGENCY: f64 = 0.3;
pub const W_CAPACITY: f64 = 0.2;
pub const W_LOAD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub total_score: f64,
    pub distance_score: f64,
    pub urgency_score: f64,
    pub capacity_score: f64,
    pub load_balance_score: f64,
    pub distance_km: f64,
}

pub fn distance_score(km: f64) -> f64 {
    if km.is_nan() || km <= 0.0 {
        return 100.0;
    }
    (100.0 - km * 5.0).clamp(0.0, 100.0)
}

pub fn capacity_score(capacity: i64) -> f64 {
    (capacity.max(0) as f64 * 2.0).min(100.0)
}

pub fn load_balance_score(active_matches: i64) -> f64 {
    (100.0 - active_matches.max(0) as f64 * 10.0).max(0.0)
}

/// Score `organization` as a destination for `donation` given how many active
/// matches the organization already carries.
pub fn calculate_score(
    donation: &Donation,
    organization: &Organization,
    active_matches: i64,
    now: DateTime<Utc>,
) -> ScoreBreakdown {
    let km = distance_km(donation.lat, donation.lng, organization.lat, organization.lng);

    let distance = distance_score(km);
    let urgency = calculate_urgency(donation.expires_at_utc(), donation.quantity, now).score as f64;
    let capacity = capacity_score(organization.capacity);
    let load = load_balance_score(active_matches);

    let total = distance * W_DISTANCE + urgency * W_URGENCY + capacity * W_CAPACITY + load * W_LOAD;

    ScoreBreakdown {
        total_score: round2(total),
        distance_score: round2(distance),
        urgency_score: urgency,
        capacity_score: capacity,
        load_balance_score: load,
        distance_km: round2(km),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
