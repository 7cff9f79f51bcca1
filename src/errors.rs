//! Unified error type for the points ledger.
//!
//! Variants fall into four groups: validation errors (rejected before anything is
//! written), transient errors (retried inside the ledger writer and surfaced only once
//! the retry budget is spent), integrity errors (drift between an aggregate and its
//! history) and infrastructure errors (database, configuration, I/O).
//!
//! Idempotent no-ops such as a replayed `operation_id` or undoing an entry twice are
//! *not* errors; they are reported through the ledger's outcome types instead.

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Error type shared by every module of the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A required identifier (class, student, operation, awarder) was empty.
    #[error("Identifier `{field}` must not be empty")]
    EmptyIdentifier {
        /// Name of the offending field
        field: &'static str,
    },

    /// The student name is a UI placeholder, meaning the caller's data was not loaded yet.
    #[error("Student name '{name}' is a placeholder, refusing to record it")]
    PlaceholderStudentName {
        /// The rejected name
        name: String,
    },

    /// A behavior or award carried a zero point value.
    #[error("Point value must be non-zero")]
    ZeroPoints,

    /// The sign of the point value disagrees with the behavior category.
    #[error("Point value {points} does not match category '{category}'")]
    CategoryMismatch {
        /// The signed point value
        points: i64,
        /// The declared category
        category: String,
    },

    /// A category string could not be parsed.
    #[error("Unknown behavior category '{value}'")]
    InvalidCategory {
        /// The raw value
        value: String,
    },

    /// A behavior name was empty or whitespace.
    #[error("Behavior name cannot be empty")]
    EmptyBehaviorName,

    /// The referenced catalog behavior does not exist (or belongs to another class).
    #[error("Behavior {id} not found")]
    BehaviorNotFound {
        /// Behavior id that was looked up
        id: i64,
    },

    /// An `operation_id` was replayed against a different class or student.
    #[error("Operation id '{operation_id}' was already used for a different student")]
    OperationIdReused {
        /// The conflicting idempotency key
        operation_id: String,
    },

    /// Write contention or a store timeout that outlived the retry budget.
    #[error("Transient failure after {attempts} attempts: {message}")]
    Transient {
        /// Number of attempts made
        attempts: u32,
        /// Description of the last failure
        message: String,
    },

    /// The stored aggregate disagrees with a replay of the history log.
    #[error(
        "Aggregate drift for student {student_id} in class {class_id}: stored total {stored_total}, replayed total {replayed_total}"
    )]
    Drift {
        /// Class of the drifted aggregate
        class_id: String,
        /// Student of the drifted aggregate
        student_id: String,
        /// Total currently stored
        stored_total: i64,
        /// Total obtained by replaying history
        replayed_total: i64,
    },

    /// Configuration could not be read or parsed.
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },

    /// Error reported by the database layer.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true when a caller may retry the same request (with the same `operation_id`).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns true for errors raised by input validation; these are never persisted or retried.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyIdentifier { .. }
                | Self::PlaceholderStudentName { .. }
                | Self::ZeroPoints
                | Self::CategoryMismatch { .. }
                | Self::InvalidCategory { .. }
                | Self::EmptyBehaviorName
                | Self::BehaviorNotFound { .. }
                | Self::OperationIdReused { .. }
        )
    }

    /// Whether this error is write contention that the ledger writer should retry.
    ///
    /// SQLite reports contention as `database is locked` / `SQLITE_BUSY`. A unique
    /// constraint violation inside the writer means a concurrent transaction inserted the
    /// same aggregate row or `operation_id` first; the retry observes its result.
    pub(crate) fn is_conflict(&self) -> bool {
        let Self::Database(db_err) = self else {
            return false;
        };

        if matches!(db_err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
            return true;
        }

        let message = db_err.to_string().to_lowercase();
        message.contains("database is locked")
            || message.contains("database table is locked")
            || message.contains("sqlite_busy")
            || message.contains("pool timed out")
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_retryable() {
        let err = Error::Transient {
            attempts: 5,
            message: "database is locked".to_string(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_validation());
    }

    #[test]
    fn test_validation_errors_are_not_retryable() {
        let err = Error::PlaceholderStudentName {
            name: "Loading...".to_string(),
        };
        assert!(err.is_validation());
        assert!(!err.is_retryable());
        assert!(Error::ZeroPoints.is_validation());
    }

    #[test]
    fn test_locked_database_is_conflict() {
        let err = Error::Database(DbErr::Custom("database is locked".to_string()));
        assert!(err.is_conflict());

        let err = Error::Database(DbErr::Custom("no such table: behaviors".to_string()));
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_drift_message_names_both_totals() {
        let err = Error::Drift {
            class_id: "class-1".to_string(),
            student_id: "s1".to_string(),
            stored_total: 7,
            replayed_total: 5,
        };
        let message = err.to_string();
        assert!(message.contains("stored total 7"));
        assert!(message.contains("replayed total 5"));
    }
}
