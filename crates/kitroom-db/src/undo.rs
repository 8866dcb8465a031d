//! # Undo Engine
//!
//! Reverses the most recent logged mutation.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        undo_last()                                      │
//! │                                                                         │
//! │  Idle                                                                   │
//! │   │  BEGIN; move newest batch to action_log_undone                     │
//! │   ▼                                                                     │
//! │  Fetch ──── log empty ────────────────────────────► NotFound           │
//! │   │                                                                     │
//! │   ▼                                                                     │
//! │  Dispatch  Inverse::plan per entry                                     │
//! │   │   └── unknown action / table ─────────────────► UnsupportedAction  │
//! │   ▼                                                                     │
//! │  Apply     newest entry first                                          │
//! │   │   └── statement fails / row gone ────────────► RollbackFailed      │
//! │   ▼                                                                     │
//! │  Done      COMMIT (inverse + log move together)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One logical operation (a borrow writes two entries) is one batch, and the
//! whole batch is undone at once. Every failure rolls back, leaving both the
//! store and the log as they were.
//!
//! Undo is single-step and global: there is no redo, and a second call
//! reverses whatever batch is newest by then, related or not.

use sqlx::sqlite::SqliteConnection;
use sqlx::SqlitePool;
use tracing::{debug, info, instrument, warn};

use crate::error::{DbError, DbResult};
use crate::repository::{action_log, borrowing, equipment};
use crate::transaction::UnitOfWork;
use kitroom_core::{ActionLogEntry, CoreError, Inverse};

/// What one successful undo reversed.
#[derive(Debug, Clone)]
pub struct UndoOutcome {
    /// Batch the reversed entries belonged to.
    pub batch_id: String,
    /// The consumed entries, newest first.
    pub reversed: Vec<ActionLogEntry>,
}

/// Applies inverses of logged mutations.
#[derive(Debug, Clone)]
pub struct UndoEngine {
    pool: SqlitePool,
}

impl UndoEngine {
    /// Creates a new UndoEngine.
    pub fn new(pool: SqlitePool) -> Self {
        UndoEngine { pool }
    }

    /// Reverses the newest batch of the action log.
    ///
    /// ## Errors
    /// - `NotFound` if the log is empty
    /// - `UnsupportedAction` if an entry names an unknown action or table
    /// - `RollbackFailed` if an inverse cannot be applied
    ///
    /// On any error the store and the log are unchanged.
    #[instrument(skip(self))]
    pub async fn undo_last(&self) -> DbResult<UndoOutcome> {
        let mut uow = UnitOfWork::begin(&self.pool, "undo").await?;
        let result = undo_in(uow.conn()).await;
        let outcome = uow.finish(result).await?;

        info!(
            batch_id = %outcome.batch_id,
            entries = outcome.reversed.len(),
            "Undo applied"
        );
        Ok(outcome)
    }
}

async fn undo_in(conn: &mut SqliteConnection) -> DbResult<UndoOutcome> {
    let entries = action_log::take_latest_batch(&mut *conn).await?;

    let Some(newest) = entries.first() else {
        debug!("Action log is empty, nothing to undo");
        return Err(DbError::not_found("ActionLogEntry", "latest"));
    };
    let batch_id = newest.batch_id.clone();

    // Plan everything before touching any row.
    let mut plan = Vec::with_capacity(entries.len());
    for entry in &entries {
        plan.push((entry.id, Inverse::plan(entry).map_err(|e| plan_error(entry, e))?));
    }

    for (entry_id, inverse) in &plan {
        let (table, record_id) = inverse.target();
        debug!(entry_id, table = %table, record_id, "Applying inverse");

        apply(&mut *conn, inverse).await.map_err(|e| {
            warn!(entry_id, error = %e, "Inverse failed");
            DbError::RollbackFailed {
                entry_id: *entry_id,
                reason: e.to_string(),
            }
        })?;
    }

    Ok(UndoOutcome {
        batch_id,
        reversed: entries,
    })
}

fn plan_error(entry: &ActionLogEntry, err: CoreError) -> DbError {
    match err {
        CoreError::UnsupportedAction { action, table } => {
            DbError::UnsupportedAction { action, table }
        }
        CoreError::UnknownTable(table) => DbError::UnsupportedAction {
            action: entry.action.clone(),
            table,
        },
        other => DbError::RollbackFailed {
            entry_id: entry.id,
            reason: other.to_string(),
        },
    }
}

/// Applies one inverse. Fails if the target row is not where the log says.
async fn apply(conn: &mut SqliteConnection, inverse: &Inverse) -> DbResult<()> {
    let affected = match inverse {
        Inverse::DeleteEquipment { id } => equipment::delete_by_id(conn, id).await?,
        Inverse::DeleteBorrowing { id } => borrowing::delete_by_id(conn, id).await?,
        Inverse::PatchEquipment { id, patch } => equipment::apply_patch(conn, id, patch).await?,
        Inverse::PatchBorrowing { id, patch } => borrowing::apply_patch(conn, id, patch).await?,
        Inverse::ReinsertEquipment(item) => {
            equipment::insert(conn, item).await?;
            1
        }
        Inverse::ReinsertBorrowing(record) => {
            borrowing::insert(conn, record).await?;
            1
        }
    };

    if affected == 0 {
        let (table, record_id) = inverse.target();
        return Err(DbError::not_found(table.as_str(), record_id));
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use kitroom_core::BorrowStatus;

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_undo_on_empty_log_is_not_found() {
        let db = db().await;

        let err = db.undo().undo_last().await.unwrap_err();

        assert!(matches!(err, DbError::NotFound { .. }));
        assert_eq!(db.equipment().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_undo_borrow_restores_pre_borrow_state() {
        let db = db().await;
        let item = db.ledger().add_item("Tripod", "Camera", 5).await.unwrap();
        let log_before = db.action_log().count().await.unwrap();

        let record = db.ledger().borrow(&item.id, 3, "user-1").await.unwrap();
        let outcome = db.undo().undo_last().await.unwrap();

        assert_eq!(outcome.reversed.len(), 2);
        assert_eq!(outcome.reversed[0].record_id, record.id);
        assert_eq!(db.equipment().get_by_id(&item.id).await.unwrap(), Some(item));
        assert!(db.borrowings().get_by_id(&record.id).await.unwrap().is_none());
        assert_eq!(db.action_log().count().await.unwrap(), log_before);
    }

    #[tokio::test]
    async fn test_undone_batch_stays_in_audit_trail() {
        let db = db().await;
        let item = db.ledger().add_item("Tripod", "Camera", 5).await.unwrap();
        db.ledger().borrow(&item.id, 3, "user-1").await.unwrap();

        let outcome = db.undo().undo_last().await.unwrap();

        let undone = db.action_log().undone(10).await.unwrap();
        assert_eq!(undone, outcome.reversed);
        assert!(undone.iter().all(|e| e.batch_id == outcome.batch_id));
    }

    #[tokio::test]
    async fn test_undo_return_restores_captured_fields() {
        let db = db().await;
        let item = db.ledger().add_item("Tripod", "Camera", 5).await.unwrap();
        let record = db.ledger().borrow(&item.id, 2, "user-1").await.unwrap();
        db.ledger().return_borrowing(&record.id).await.unwrap();

        db.undo().undo_last().await.unwrap();

        let restored = db.borrowings().get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(restored.status, BorrowStatus::Borrowed);
        assert!(restored.returned_at.is_none());
        assert_eq!(restored, record);
        let item = db.equipment().get_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(item.available_stock, 3);
    }

    #[tokio::test]
    async fn test_second_undo_reverses_previous_batch() {
        let db = db().await;
        let item = db.ledger().add_item("Tripod", "Camera", 1).await.unwrap();
        db.ledger().borrow(&item.id, 1, "user-1").await.unwrap();

        db.undo().undo_last().await.unwrap();
        let outcome = db.undo().undo_last().await.unwrap();

        assert_eq!(outcome.reversed.len(), 1);
        assert_eq!(outcome.reversed[0].action, "INSERT");
        assert!(db.equipment().get_by_id(&item.id).await.unwrap().is_none());
        assert!(matches!(
            db.undo().undo_last().await.unwrap_err(),
            DbError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_undo_remove_reinserts_row() {
        let db = db().await;
        let item = db.ledger().add_item("Projector", "AV", 2).await.unwrap();
        db.ledger().remove_item(&item.id).await.unwrap();

        db.undo().undo_last().await.unwrap();

        assert_eq!(db.equipment().get_by_id(&item.id).await.unwrap(), Some(item));
    }

    #[tokio::test]
    async fn test_undo_restock_restores_both_counters() {
        let db = db().await;
        let item = db.ledger().add_item("Projector", "AV", 2).await.unwrap();
        db.ledger().restock(&item.id, 4).await.unwrap();

        db.undo().undo_last().await.unwrap();

        let item = db.equipment().get_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!((item.total_stock, item.available_stock), (2, 2));
    }

    #[tokio::test]
    async fn test_unsupported_action_leaves_log_unchanged() {
        let db = db().await;
        action_log::append_raw(db.pool(), "batch-x", "TRUNCATE", "equipment", "e-1")
            .await
            .unwrap();

        let err = db.undo().undo_last().await.unwrap_err();

        assert!(matches!(err, DbError::UnsupportedAction { ref action, .. } if action == "TRUNCATE"));
        assert_eq!(db.action_log().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_table_is_unsupported() {
        let db = db().await;
        action_log::append_raw(db.pool(), "batch-x", "INSERT", "users", "u-1")
            .await
            .unwrap();

        let err = db.undo().undo_last().await.unwrap_err();
        assert!(matches!(err, DbError::UnsupportedAction { ref table, .. } if table == "users"));
    }

    #[tokio::test]
    async fn test_failed_inverse_is_rollback_failed() {
        let db = db().await;
        let item = db.ledger().add_item("Projector", "AV", 2).await.unwrap();
        sqlx::query("DELETE FROM equipment WHERE id = ?1")
            .bind(&item.id)
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.undo().undo_last().await.unwrap_err();

        assert!(matches!(err, DbError::RollbackFailed { .. }));
        assert_eq!(db.action_log().count().await.unwrap(), 1);
        assert!(db.action_log().undone(10).await.unwrap().is_empty());
    }
}
