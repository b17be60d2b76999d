//! Food-level urgency: how soon a donation must move, independent of which
//! organization ends up receiving it.
//!
//! The score blends time pressure (50%) and quantity (30%). The remaining 20%
//! is reserved for distance, which only exists once a candidate organization
//! is known, so it contributes zero here and is applied by [`crate::scoring`].
//! Short deadlines get a floor so that anything within two hours always
//! classifies as [`UrgencyLevel::Emergency`].

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Reported when a donation carries no usable deadline.
pub const NO_DEADLINE_HOURS: f64 = 999.0;

const TIME_WEIGHT: f64 = 0.5;
const QUANTITY_WEIGHT: f64 = 0.3;
const DISTANCE_WEIGHT: f64 = 0.2;

const EMERGENCY_FLOOR: f64 = 85.0;
const CRITICAL_FLOOR: f64 = 65.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UrgencyLevel {
    Stable,
    Watch,
    High,
    Critical,
    Emergency,
}

impl UrgencyLevel {
    /// Classify a rounded 0-100 score.
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => Self::Emergency,
            60..=79 => Self::Critical,
            40..=59 => Self::High,
            20..=39 => Self::Watch,
            _ => Self::Stable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "EMERGENCY",
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Watch => "WATCH",
            Self::Stable => "STABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UrgencyAssessment {
    pub score: u8,
    pub level: UrgencyLevel,
    /// Hours until the deadline, floored at zero and rounded to one decimal.
    pub hours_remaining: f64,
}

impl UrgencyAssessment {
    pub fn is_emergency(&self) -> bool {
        self.level == UrgencyLevel::Emergency
    }
}

/// Compute urgency for a donation expiring at `expires_at` holding `quantity`
/// units, as seen at `now`.
pub fn calculate_urgency(
    expires_at: Option<DateTime<Utc>>,
    quantity: f64,
    now: DateTime<Utc>,
) -> UrgencyAssessment {
    let Some(expires_at) = expires_at else {
        return UrgencyAssessment {
            score: 0,
            level: UrgencyLevel::Stable,
            hours_remaining: NO_DEADLINE_HOURS,
        };
    };

    let millis = (expires_at - now).num_milliseconds() as f64;
    let hours = (millis / 3_600_000.0).max(0.0);

    let time_score = time_score(hours);
    let quantity_score = quantity_score(quantity);
    let distance_score = 0.0;

    let mut score = time_score * TIME_WEIGHT
        + quantity_score * QUANTITY_WEIGHT
        + distance_score * DISTANCE_WEIGHT;

    if hours <= 2.0 {
        score = score.max(EMERGENCY_FLOOR);
    } else if hours <= 6.0 {
        score = score.max(CRITICAL_FLOOR);
    }

    let score = score.round().clamp(0.0, 100.0) as u8;

    UrgencyAssessment {
        score,
        level: UrgencyLevel::from_score(score),
        hours_remaining: (hours * 10.0).round() / 10.0,
    }
}

fn time_score(hours: f64) -> f64 {
    if hours <= 2.0 {
        100.0
    } else if hours <= 6.0 {
        80.0
    } else if hours <= 12.0 {
        60.0
    } else if hours <= 24.0 {
        40.0
    } else {
        20.0
    }
}

fn quantity_score(quantity: f64) -> f64 {
    if !quantity.is_finite() || quantity <= 0.0 {
        return 0.0;
    }
    (quantity * 2.0).min(100.0)
}
