//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A conditional update on a donation or match lost the race.
    #[error("Assignment conflict: {0}")]
    AssignmentConflict(String),

    /// A conditional capacity update found no headroom left.
    #[error("Capacity conflict: organization {organization_id} has no capacity to reserve")]
    CapacityConflict { organization_id: i64 },

    #[error("Invalid match status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl EngineError {
    /// Stable machine-readable code surfaced to collaborators.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migrate(_) => "MIGRATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AssignmentConflict(_) => "ASSIGNMENT_CONFLICT",
            Self::CapacityConflict { .. } => "CAPACITY_CONFLICT",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }

    /// Conflicts come from optimistic concurrency and may be retried.
    /// SQLite lock contention that outlived the busy timeout counts too.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AssignmentConflict(_) | Self::CapacityConflict { .. } => true,
            Self::Database(e) => is_lock_contention(e),
            _ => false,
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

/// `SQLITE_BUSY` (5) or `SQLITE_LOCKED` (6), including extended codes.
fn is_lock_contention(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

pub type Result<T> = std::result::Result<T, EngineError>;
