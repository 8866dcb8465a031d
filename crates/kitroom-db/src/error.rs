//! # Store Error Types
//!
//! Error types for ledger, undo and snapshot operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)        Domain rule (stock, state)          │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  DbError storage variant           DbError domain variant              │
//! │       │                                   │                             │
//! │       └──────────────┬────────────────────┘                             │
//! │                      ▼                                                  │
//! │  UnitOfWork::finish ← storage errors become TransactionAborted,        │
//! │                       domain errors pass through unchanged             │
//! │                      │                                                  │
//! │                      ▼                                                  │
//! │  Routing layer maps kind → transport status                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use kitroom_core::ValidationError;
use thiserror::Error;

/// Store operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    // =========================================================================
    // Ledger
    // =========================================================================
    /// Missing item, borrow record, log entry or snapshot.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Borrow asked for more units than are on the shelf.
    #[error("Insufficient stock for {item_id}: available {available}, requested {requested}")]
    InsufficientStock {
        item_id: String,
        available: i64,
        requested: i64,
    },

    /// The row exists but is not in a state that allows the operation.
    ///
    /// ## When This Occurs
    /// - Returning an already returned record
    /// - A stock change that would leave `[0, total]`
    /// - Removing an item that still has borrow history
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Undo met an action log entry it cannot dispatch.
    #[error("Unsupported action '{action}' on table '{table}'")]
    UnsupportedAction { action: String, table: String },

    /// A sub-step of a unit of work failed; nothing was committed.
    #[error("Transaction '{operation}' aborted: {reason}")]
    TransactionAborted { operation: String, reason: String },

    /// Applying an inverse failed; the store and the log are unchanged.
    #[error("Rollback of action {entry_id} failed: {reason}")]
    RollbackFailed { entry_id: i64, reason: String },

    // =========================================================================
    // Snapshots
    // =========================================================================
    /// Creating a snapshot failed. The live store is untouched.
    #[error("Snapshot failed: {0}")]
    SnapshotFailed(String),

    /// Restore did not replace the store file; the original is open again.
    #[error("Restore from '{snapshot}' failed, store unchanged: {reason}")]
    RestoreFailed { snapshot: String, reason: String },

    /// The store file was replaced but could not be reopened.
    ///
    /// Manual intervention required. Every later call fails with
    /// [`DbError::StoreUnavailable`].
    #[error("Store inconsistent after restoring '{snapshot}', manual intervention required: {reason}")]
    RestoreInconsistent { snapshot: String, reason: String },

    /// The store handle is held by a restore, or was lost by one.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    // =========================================================================
    // Input / storage
    // =========================================================================
    /// Input failed validation before any transaction opened.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Unique constraint violation.
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// CHECK constraint violation (stock bounds, status/timestamp pairing).
    #[error("Check constraint violation: {message}")]
    CheckViolation { message: String },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem error outside of a snapshot/restore sequence.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates an InvalidState error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        DbError::InvalidState(message.into())
    }

    /// True for failures of the store itself rather than of a ledger rule.
    ///
    /// Inside a unit of work these become [`DbError::TransactionAborted`].
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            DbError::UniqueViolation { .. }
                | DbError::ForeignKeyViolation { .. }
                | DbError::CheckViolation { .. }
                | DbError::ConnectionFailed(_)
                | DbError::QueryFailed(_)
                | DbError::PoolExhausted
                | DbError::Io(_)
                | DbError::Internal(_)
        )
    }

    /// True when the store may be inconsistent and an operator must act.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DbError::RestoreInconsistent { .. })
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // SQLite constraint messages:
                // "UNIQUE constraint failed: <table>.<column>"
                // "FOREIGN KEY constraint failed"
                // "CHECK constraint failed: <expr>"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("CHECK constraint failed") {
                    DbError::CheckViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Internal(format!("row image serialization: {}", err))
    }
}

/// Result type for store operations.
pub type DbResult<T> = Result<T, DbError>;
