//! # Unit of Work
//!
//! One SQLite transaction covering a tracked mutation and the action log
//! entries that document it.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Unit of Work                                      │
//! │                                                                         │
//! │  UnitOfWork::begin(pool, "borrow")   ← new batch_id                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  first statement is a write          ← takes SQLite's write lock;      │
//! │       │                                competing writers wait on       │
//! │       │                                busy_timeout                     │
//! │       ▼                                                                 │
//! │  more reads / writes on uow.conn()                                     │
//! │  uow.record(kind, table, id, before, after)                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  uow.finish(result)                                                    │
//! │       ├── Ok  → COMMIT                                                 │
//! │       └── Err → ROLLBACK, storage errors become TransactionAborted     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Opening with a write matters: a transaction that reads first and writes
//! later holds a read snapshot, and in WAL mode a later write from a stale
//! snapshot fails with SQLITE_BUSY immediately instead of waiting.

use sqlx::sqlite::SqliteConnection;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::action_log;
use kitroom_core::{ActionKind, TrackedTable};

/// An open transaction plus the batch id its log entries share.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
    batch_id: String,
    operation: &'static str,
}

impl UnitOfWork {
    /// Opens a transaction for `operation` (used in logs and errors).
    pub async fn begin(pool: &SqlitePool, operation: &'static str) -> DbResult<Self> {
        let tx = pool.begin().await.map_err(|e| DbError::TransactionAborted {
            operation: operation.to_string(),
            reason: format!("begin: {}", e),
        })?;

        let batch_id = Uuid::new_v4().to_string();
        debug!(operation, batch_id = %batch_id, "Unit of work started");

        Ok(UnitOfWork {
            tx,
            batch_id,
            operation,
        })
    }

    /// The connection every statement of this unit must run on.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Logs one tracked mutation under this unit's batch.
    pub async fn record(
        &mut self,
        kind: ActionKind,
        table: TrackedTable,
        record_id: &str,
        before_state: Option<String>,
        after_state: Option<String>,
    ) -> DbResult<i64> {
        action_log::append(
            &mut self.tx,
            &self.batch_id,
            kind,
            table,
            record_id,
            before_state.as_deref(),
            after_state.as_deref(),
        )
        .await
    }

    /// Commits, or rolls back when `result` is an error.
    ///
    /// Domain errors (not found, insufficient stock, invalid state) come back
    /// unchanged; storage errors are reported as
    /// [`DbError::TransactionAborted`].
    pub async fn finish<T>(self, result: DbResult<T>) -> DbResult<T> {
        let operation = self.operation;

        match result {
            Ok(value) => {
                self.tx.commit().await.map_err(|e| DbError::TransactionAborted {
                    operation: operation.to_string(),
                    reason: format!("commit: {}", e),
                })?;
                debug!(operation, batch_id = %self.batch_id, "Unit of work committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.tx.rollback().await {
                    warn!(operation, error = %rollback_err, "Rollback failed");
                }
                debug!(operation, error = %err, "Unit of work rolled back");

                if err.is_storage() {
                    Err(DbError::TransactionAborted {
                        operation: operation.to_string(),
                        reason: err.to_string(),
                    })
                } else {
                    Err(err)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_failed_unit_leaves_no_log_entries() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = UnitOfWork::begin(db.pool(), "test").await.unwrap();
        uow.record(ActionKind::Insert, TrackedTable::Equipment, "e-1", None, Some("{}".into()))
            .await
            .unwrap();
        let result: DbResult<()> = Err(DbError::QueryFailed("disk I/O error".into()));
        let err = uow.finish(result).await.unwrap_err();

        assert!(matches!(err, DbError::TransactionAborted { ref operation, .. } if operation == "test"));
        assert_eq!(db.action_log().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_domain_errors_pass_through() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let uow = UnitOfWork::begin(db.pool(), "test").await.unwrap();
        let err = uow
            .finish::<()>(Err(DbError::invalid_state("already returned")))
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_entries_share_batch_id() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = UnitOfWork::begin(db.pool(), "test").await.unwrap();
        let batch_id = uow.batch_id().to_string();
        let first = uow
            .record(ActionKind::Update, TrackedTable::Equipment, "e-1", Some("{}".into()), Some("{}".into()))
            .await
            .unwrap();
        let second = uow
            .record(ActionKind::Insert, TrackedTable::Borrowings, "b-1", None, Some("{}".into()))
            .await
            .unwrap();
        uow.finish(Ok(())).await.unwrap();

        assert!(second > first);
        let batch = db.action_log().batch(&batch_id).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].table_name, "equipment");
        assert_eq!(batch[1].action, "INSERT");
    }
}
