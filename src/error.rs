//! Error types for the schedule store

use rusqlite::ErrorCode;
use thiserror::Error;

/// Rejected schedule or override input. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid start time {0:?}: expected HH:MM with HH in 00-23 and MM in 00-59")]
    StartTime(String),

    #[error("Invalid days_of_week mask {0}: must be within 0..=127")]
    DaysOfWeek(u32),

    #[error("Invalid duration {0} minutes: must be within 1..=1440")]
    Duration(u32),

    #[error("Invalid max_concurrency {0}: must be within 1..=5")]
    MaxConcurrency(u32),

    #[error("Project name must be 1-50 characters, got {0}")]
    ProjectName(usize),

    #[error("Unknown override type: {0}")]
    OverrideType(String),

    #[error("Override lifetime must be positive, got {0} seconds")]
    OverrideTtl(i64),
}

/// Errors that can occur within the schedule store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Input that failed validation before reaching the database.
    #[error("Invalid input: {0}")]
    Invalid(#[from] ValidationError),

    /// Another writer held the store past the lock-wait budget. Retryable.
    #[error("Store is busy: {0}")]
    Busy(#[source] rusqlite::Error),

    /// A schema migration step failed. Startup must not proceed.
    #[error("Migration step '{step}' failed: {source}")]
    Migration {
        step: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(i64),

    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be mapped to its in-memory type.
    #[error("Corrupt row in {table}: {detail}")]
    Decode { table: &'static str, detail: String },
}

impl StoreError {
    /// Whether the caller may retry the operation after backing off.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Busy(_) => true,
            StoreError::Migration { source, .. } => is_busy(source),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if is_busy(&err) {
            StoreError::Busy(err)
        } else {
            StoreError::Database(err)
        }
    }
}

/// True for SQLITE_BUSY / SQLITE_LOCKED failures.
pub(crate) fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

pub type Result<T> = std::result::Result<T, StoreError>;
