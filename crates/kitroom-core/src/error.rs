//! # Error Types
//!
//! Domain-specific error types for kitroom-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  kitroom-core errors (this file)                                       │
//! │  ├── CoreError        - Undo planning / row image failures             │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  kitroom-db errors (separate crate)                                    │
//! │  └── DbError          - Ledger, transaction, snapshot failures         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → routing layer           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain errors raised while interpreting action log entries.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The entry's action is not one of INSERT / UPDATE / DELETE.
    ///
    /// ## When This Occurs
    /// - A row written by an older or foreign writer
    /// - Manual edits to the `action_log` table
    #[error("Unsupported action '{action}' on table '{table}'")]
    UnsupportedAction { action: String, table: String },

    /// The entry targets a table the ledger does not track.
    #[error("Unknown table '{0}'")]
    UnknownTable(String),

    /// A before/after image is missing or does not match the table's columns.
    #[error("Malformed {side} image for {table}/{record_id}: {reason}")]
    MalformedImage {
        table: String,
        record_id: String,
        side: &'static str,
        reason: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any transaction is opened.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., path separators in a snapshot name).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::UnsupportedAction {
            action: "UPSERT".to_string(),
            table: "equipment".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported action 'UPSERT' on table 'equipment'"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "name".to_string(),
        };
        assert_eq!(err.to_string(), "name is required");

        let err = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        };
        assert_eq!(err.to_string(), "quantity must be positive");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "borrower_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
