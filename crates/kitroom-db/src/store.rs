//! # Store
//!
//! The one entry point the routing layer calls. Owns the store handle, and
//! is the only place that closes or swaps it.
//!
//! ## Handle Locking
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 RwLock<Option<Database>>                                │
//! │                                                                         │
//! │  borrow / return / undo / reads          create_snapshot / restore     │
//! │  ───────────────────────────────          ─────────────────────────    │
//! │  read guard (shared)                      write guard (exclusive)      │
//! │  wait up to unavailable_timeout,          waits for in-flight work     │
//! │  then StoreUnavailable                    to drain                     │
//! │       │                                         │                       │
//! │       ▼                                         ▼                       │
//! │  SQLite serialises the writers            checkpoint + copy, or        │
//! │  (write-first units of work)              close → replace → reopen     │
//! │                                                                         │
//! │  Slot is None only after a restore could not reopen the store:         │
//! │  every call then fails with StoreUnavailable until a restore succeeds. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each call runs on its own task, holding its guard. A caller that goes
//! away does not cut a transaction or a restore short.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{error, info, instrument, warn};

use crate::config::KitroomConfig;
use crate::error::{DbError, DbResult};
use crate::pool::{Database, DbConfig};
use crate::snapshot::SnapshotManager;
use crate::undo::UndoOutcome;
use kitroom_core::validation::validate_snapshot_name;
use kitroom_core::{ActionLogEntry, BorrowRecord, InventoryItem, Snapshot};

/// Shared handle on the store file and its backups.
///
/// Cheap to clone; clones share the handle.
#[derive(Debug, Clone)]
pub struct Store {
    db: Arc<RwLock<Option<Database>>>,
    db_config: DbConfig,
    snapshots: SnapshotManager,
    unavailable_timeout: Duration,
}

impl Store {
    /// Opens the store described by `config`.
    pub async fn open(config: &KitroomConfig) -> DbResult<Self> {
        Self::open_with(
            config.db_config(),
            config.backup_dir(),
            config.unavailable_timeout(),
        )
        .await
    }

    /// Opens the store from explicit settings.
    pub async fn open_with(
        db_config: DbConfig,
        backup_dir: impl Into<PathBuf>,
        unavailable_timeout: Duration,
    ) -> DbResult<Self> {
        let snapshots = SnapshotManager::new(backup_dir);
        let db = Database::new(db_config.clone()).await?;

        info!(
            path = %db_config.database_path.display(),
            backup_dir = %snapshots.backup_dir().display(),
            "Store opened"
        );

        Ok(Store {
            db: Arc::new(RwLock::new(Some(db))),
            db_config,
            snapshots,
            unavailable_timeout,
        })
    }

    pub fn database_path(&self) -> &Path {
        &self.db_config.database_path
    }

    pub fn backup_dir(&self) -> &Path {
        self.snapshots.backup_dir()
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    /// Lends `quantity` units of `item_id` to `borrower_id`.
    pub async fn borrow(
        &self,
        item_id: &str,
        quantity: i64,
        borrower_id: &str,
    ) -> DbResult<BorrowRecord> {
        let (item_id, borrower_id) = (item_id.to_string(), borrower_id.to_string());
        self.run(move |db| async move { db.ledger().borrow(&item_id, quantity, &borrower_id).await })
            .await
    }

    /// Returns the units of a borrow record.
    pub async fn return_borrowing(&self, borrowing_id: &str) -> DbResult<BorrowRecord> {
        let borrowing_id = borrowing_id.to_string();
        self.run(move |db| async move { db.ledger().return_borrowing(&borrowing_id).await })
            .await
    }

    /// Reverses the newest logged operation.
    pub async fn undo_last(&self) -> DbResult<UndoOutcome> {
        self.run(|db| async move { db.undo().undo_last().await }).await
    }

    pub async fn add_item(
        &self,
        name: &str,
        category: &str,
        total_stock: i64,
    ) -> DbResult<InventoryItem> {
        let (name, category) = (name.to_string(), category.to_string());
        self.run(move |db| async move { db.ledger().add_item(&name, &category, total_stock).await })
            .await
    }

    pub async fn restock(&self, item_id: &str, delta: i64) -> DbResult<InventoryItem> {
        let item_id = item_id.to_string();
        self.run(move |db| async move { db.ledger().restock(&item_id, delta).await })
            .await
    }

    pub async fn remove_item(&self, item_id: &str) -> DbResult<InventoryItem> {
        let item_id = item_id.to_string();
        self.run(move |db| async move { db.ledger().remove_item(&item_id).await })
            .await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_item(&self, item_id: &str) -> DbResult<InventoryItem> {
        let item_id = item_id.to_string();
        self.run(move |db| async move {
            db.equipment()
                .get_by_id(&item_id)
                .await?
                .ok_or_else(|| DbError::not_found("Equipment", item_id.as_str()))
        })
        .await
    }

    pub async fn list_items(&self, category: Option<&str>) -> DbResult<Vec<InventoryItem>> {
        let category = category.map(str::to_string);
        self.run(move |db| async move { db.equipment().list(category.as_deref()).await })
            .await
    }

    pub async fn get_borrowing(&self, borrowing_id: &str) -> DbResult<BorrowRecord> {
        let borrowing_id = borrowing_id.to_string();
        self.run(move |db| async move {
            db.borrowings()
                .get_by_id(&borrowing_id)
                .await?
                .ok_or_else(|| DbError::not_found("Borrowing", borrowing_id.as_str()))
        })
        .await
    }

    pub async fn borrowings_for_borrower(
        &self,
        borrower_id: &str,
        open_only: bool,
    ) -> DbResult<Vec<BorrowRecord>> {
        let borrower_id = borrower_id.to_string();
        self.run(move |db| async move { db.borrowings().for_borrower(&borrower_id, open_only).await })
            .await
    }

    pub async fn open_borrowings_for_item(&self, item_id: &str) -> DbResult<Vec<BorrowRecord>> {
        let item_id = item_id.to_string();
        self.run(move |db| async move { db.borrowings().open_for_item(&item_id).await })
            .await
    }

    /// The newest action log entry, `NotFound` when the log is empty.
    pub async fn latest_action(&self) -> DbResult<ActionLogEntry> {
        self.run(|db| async move {
            db.action_log()
                .latest()
                .await?
                .ok_or_else(|| DbError::not_found("ActionLogEntry", "latest"))
        })
        .await
    }

    /// Up to `limit` action log entries, newest first.
    pub async fn recent_actions(&self, limit: i64) -> DbResult<Vec<ActionLogEntry>> {
        self.run(move |db| async move { db.action_log().recent(limit.max(0)).await })
            .await
    }

    /// Up to `limit` entries consumed by undo, most recently undone first.
    pub async fn undone_actions(&self, limit: i64) -> DbResult<Vec<ActionLogEntry>> {
        self.run(move |db| async move { db.action_log().undone(limit.max(0)).await })
            .await
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Copies the store file into the backup directory.
    ///
    /// Waits for in-flight operations, and holds new ones back, while the
    /// WAL is checkpointed and the file copied.
    #[instrument(skip(self))]
    pub async fn create_snapshot(&self) -> DbResult<Snapshot> {
        if self.db_config.is_in_memory() {
            return Err(DbError::SnapshotFailed("in-memory store has no file".into()));
        }

        let slot = self.db.clone().write_owned().await;
        let snapshots = self.snapshots.clone();
        let db_path = self.db_config.database_path.clone();

        self.spawn(async move {
            let db = (*slot)
                .as_ref()
                .ok_or_else(|| DbError::StoreUnavailable(LOST_HANDLE.to_string()))?;
            snapshots.create(db, &db_path).await
        })
        .await
    }

    /// Snapshots in the backup directory, newest first.
    pub async fn list_snapshots(&self) -> DbResult<Vec<Snapshot>> {
        self.snapshots.list().await
    }

    /// Replaces the live store with a snapshot.
    ///
    /// Everything written after the snapshot was taken is discarded,
    /// including the action log.
    ///
    /// ## Errors
    /// - `NotFound` if the snapshot does not exist (store untouched)
    /// - `RestoreFailed` if the file could not be replaced, or the snapshot
    ///   is not a readable Kitroom store; the original store is open again
    /// - `RestoreInconsistent` if the store could not be reopened; every
    ///   later call fails with `StoreUnavailable` until a restore succeeds
    #[instrument(skip(self))]
    pub async fn restore(&self, name: &str) -> DbResult<()> {
        validate_snapshot_name(name)?;
        if self.db_config.is_in_memory() {
            return Err(DbError::RestoreFailed {
                snapshot: name.to_string(),
                reason: "in-memory store has no file".into(),
            });
        }

        let slot = self.db.clone().write_owned().await;
        let snapshots = self.snapshots.clone();
        let db_config = self.db_config.clone();
        let name = name.to_string();

        self.spawn(restore_in(slot, snapshots, db_config, name)).await
    }

    /// Closes the store. Later calls fail with `StoreUnavailable`.
    pub async fn close(&self) {
        let mut slot = self.db.write().await;
        if let Some(db) = slot.take() {
            db.close().await;
        }
    }

    // =========================================================================
    // Handle access
    // =========================================================================

    /// Runs `op` against the open database on its own task, holding a shared
    /// guard until it finishes.
    async fn run<T, F, Fut>(&self, op: F) -> DbResult<T>
    where
        F: FnOnce(Database) -> Fut + Send + 'static,
        Fut: Future<Output = DbResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.read_handle().await?;
        let db = (*guard)
            .as_ref()
            .cloned()
            .ok_or_else(|| DbError::StoreUnavailable(LOST_HANDLE.to_string()))?;

        self.spawn(async move {
            let result = op(db).await;
            drop(guard);
            result
        })
        .await
    }

    async fn read_handle(&self) -> DbResult<OwnedRwLockReadGuard<Option<Database>>> {
        tokio::time::timeout(self.unavailable_timeout, self.db.clone().read_owned())
            .await
            .map_err(|_| {
                warn!(
                    timeout_ms = self.unavailable_timeout.as_millis() as u64,
                    "Store handle busy, giving up"
                );
                DbError::StoreUnavailable("a snapshot or restore is in progress".to_string())
            })
    }

    async fn spawn<T, Fut>(&self, work: Fut) -> DbResult<T>
    where
        Fut: Future<Output = DbResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(work)
            .await
            .map_err(|e| DbError::Internal(format!("store task failed: {}", e)))?
    }
}

const LOST_HANDLE: &str =
    "store is closed, or was not reopened after a failed restore (manual intervention required)";

/// close → replace → reopen, under the exclusive guard.
async fn restore_in(
    mut slot: OwnedRwLockWriteGuard<Option<Database>>,
    snapshots: SnapshotManager,
    db_config: DbConfig,
    name: String,
) -> DbResult<()> {
    let snapshot_path = snapshots.resolve(&name).await?;

    info!(snapshot = %name, "Restoring store from snapshot");

    // An empty slot is a store lost by an earlier restore; replacing the
    // file is how an operator recovers it.
    if let Some(db) = slot.take() {
        db.close().await;
    }

    if let Err(e) = snapshots
        .replace_store_file(&snapshot_path, &db_config.database_path)
        .await
    {
        warn!(snapshot = %name, error = %e, "Store file not replaced, reopening original");

        return match Database::new(db_config).await {
            Ok(db) => {
                *slot = Some(db);
                Err(DbError::RestoreFailed {
                    snapshot: name,
                    reason: e.to_string(),
                })
            }
            Err(reopen) => {
                error!(snapshot = %name, error = %reopen, "Original store could not be reopened");
                Err(DbError::RestoreInconsistent {
                    snapshot: name,
                    reason: format!("replace failed ({}), reopen failed ({})", e, reopen),
                })
            }
        };
    }

    match Database::new(db_config).await {
        Ok(db) => {
            *slot = Some(db);
            info!(snapshot = %name, "Store restored");
            Ok(())
        }
        Err(e) => {
            error!(
                snapshot = %name,
                error = %e,
                "Store file replaced but not reopened, manual intervention required"
            );
            Err(DbError::RestoreInconsistent {
                snapshot: name,
                reason: e.to_string(),
            })
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use kitroom_core::BorrowStatus;
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::{ConnectOptions, Connection};
    use uuid::Uuid;

    const GARBAGE_SNAPSHOT: &str = "snapshot-2026-01-01_00-00-00-000.db";

    /// Makes migrations refuse to open the store file at `path`.
    async fn break_migration_history(path: &Path) {
        let mut conn = SqliteConnectOptions::new().filename(path).connect().await.unwrap();
        sqlx::query("UPDATE _sqlx_migrations SET checksum = X'00'")
            .execute(&mut conn)
            .await
            .unwrap();
        conn.close().await.unwrap();
    }

    struct TempStore {
        dir: PathBuf,
        store: Store,
    }

    impl TempStore {
        async fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("kitroom-store-{}", Uuid::new_v4()));
            std::fs::create_dir_all(&dir).unwrap();
            let store = Store::open_with(
                DbConfig::new(dir.join("kitroom.db")),
                dir.join("backups"),
                Duration::from_millis(200),
            )
            .await
            .unwrap();
            TempStore { dir, store }
        }

        fn plant_garbage_snapshot(&self) {
            std::fs::create_dir_all(self.store.backup_dir()).unwrap();
            std::fs::write(
                self.store.backup_dir().join(GARBAGE_SNAPSHOT),
                b"not a sqlite file",
            )
            .unwrap();
        }

        async fn cleanup(self) {
            self.store.close().await;
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    #[tokio::test]
    async fn test_snapshot_restore_round_trip() {
        let t = TempStore::new().await;
        let store = &t.store;
        let item = store.add_item("Tripod", "Camera", 3).await.unwrap();
        let first = store.borrow(&item.id, 1, "user-1").await.unwrap();
        let log_at_snapshot = store.recent_actions(100).await.unwrap();

        let snapshot = store.create_snapshot().await.unwrap();

        store.return_borrowing(&first.id).await.unwrap();
        store.borrow(&item.id, 2, "user-2").await.unwrap();
        store.add_item("Projector", "AV", 1).await.unwrap();

        store.restore(&snapshot.name).await.unwrap();

        assert_eq!(store.get_item(&item.id).await.unwrap().available_stock, 2);
        assert_eq!(store.list_items(None).await.unwrap().len(), 1);
        let record = store.get_borrowing(&first.id).await.unwrap();
        assert_eq!(record.status, BorrowStatus::Borrowed);
        assert!(store.borrowings_for_borrower("user-2", false).await.unwrap().is_empty());
        assert_eq!(store.recent_actions(100).await.unwrap(), log_at_snapshot);

        t.cleanup().await;
    }

    #[tokio::test]
    async fn test_concurrent_borrows_of_last_unit() {
        let t = TempStore::new().await;
        let item = t.store.add_item("Tripod", "Camera", 1).await.unwrap();

        let (a, b) = tokio::join!(
            t.store.borrow(&item.id, 1, "user-a"),
            t.store.borrow(&item.id, 1, "user-b"),
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(DbError::InsufficientStock { .. })))
                .count(),
            1
        );
        assert_eq!(t.store.get_item(&item.id).await.unwrap().available_stock, 0);
        assert_eq!(t.store.open_borrowings_for_item(&item.id).await.unwrap().len(), 1);

        t.cleanup().await;
    }

    #[tokio::test]
    async fn test_many_concurrent_borrows_never_oversell() {
        let t = TempStore::new().await;
        let item = t.store.add_item("Cable", "Cables", 5).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..12 {
            let store = t.store.clone();
            let item_id = item.id.clone();
            tasks.push(tokio::spawn(async move {
                store.borrow(&item_id, 1, &format!("user-{}", i)).await
            }));
        }

        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(DbError::InsufficientStock { .. }) => {}
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        assert_eq!(ok, 5);
        assert_eq!(t.store.get_item(&item.id).await.unwrap().available_stock, 0);

        t.cleanup().await;
    }

    #[tokio::test]
    async fn test_restore_missing_snapshot_is_not_found() {
        let t = TempStore::new().await;
        let item = t.store.add_item("Tripod", "Camera", 1).await.unwrap();

        let err = t
            .store
            .restore("snapshot-2020-01-01_00-00-00-000.db")
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::NotFound { .. }));
        assert!(t.store.get_item(&item.id).await.is_ok());

        t.cleanup().await;
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_original_store() {
        let t = TempStore::new().await;
        let snapshot = t.store.create_snapshot().await.unwrap();
        let item = t.store.add_item("Tripod", "Camera", 1).await.unwrap();
        // a directory where the staging copy should go makes the copy fail
        std::fs::create_dir(t.dir.join("kitroom.db.restore")).unwrap();

        let err = t.store.restore(&snapshot.name).await.unwrap_err();

        assert!(matches!(err, DbError::RestoreFailed { .. }));
        assert_eq!(t.store.get_item(&item.id).await.unwrap(), item);

        t.cleanup().await;
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_leaves_store_untouched() {
        let t = TempStore::new().await;
        let item = t.store.add_item("Tripod", "Camera", 1).await.unwrap();
        t.plant_garbage_snapshot();

        let err = t.store.restore(GARBAGE_SNAPSHOT).await.unwrap_err();

        assert!(matches!(err, DbError::RestoreFailed { .. }));
        assert!(!err.is_fatal());
        assert_eq!(t.store.get_item(&item.id).await.unwrap(), item);
        assert_ne!(std::fs::read(t.dir.join("kitroom.db")).unwrap(), b"not a sqlite file");
        assert!(!t.dir.join("kitroom.db.restore").exists());

        t.cleanup().await;
    }

    #[tokio::test]
    async fn test_replaced_store_that_will_not_reopen_is_fatal() {
        let t = TempStore::new().await;
        let good = t.store.create_snapshot().await.unwrap();
        let item = t.store.add_item("Tripod", "Camera", 1).await.unwrap();
        let bad = t.store.create_snapshot().await.unwrap();
        break_migration_history(&bad.path).await;

        let err = t.store.restore(&bad.name).await.unwrap_err();

        assert!(matches!(err, DbError::RestoreInconsistent { .. }));
        assert!(err.is_fatal());
        assert!(matches!(
            t.store.get_item(&item.id).await,
            Err(DbError::StoreUnavailable(_))
        ));
        assert!(matches!(
            t.store.borrow(&item.id, 1, "user-1").await,
            Err(DbError::StoreUnavailable(_))
        ));

        // a usable snapshot brings the store back
        t.store.restore(&good.name).await.unwrap();
        assert!(t.store.list_items(None).await.unwrap().is_empty());

        t.cleanup().await;
    }

    #[tokio::test]
    async fn test_failed_replace_and_failed_reopen_is_fatal() {
        let t = TempStore::new().await;
        let item = t.store.add_item("Tripod", "Camera", 1).await.unwrap();
        let live = t.dir.join("kitroom.db");
        t.plant_garbage_snapshot();
        {
            let guard = t.store.db.read().await;
            let pool = (*guard).as_ref().unwrap().pool();
            sqlx::query("UPDATE _sqlx_migrations SET checksum = X'00'")
                .execute(pool)
                .await
                .unwrap();
        }

        let err = t.store.restore(GARBAGE_SNAPSHOT).await.unwrap_err();

        match &err {
            DbError::RestoreInconsistent { reason, .. } => {
                assert!(reason.contains("replace failed"), "{}", reason)
            }
            other => panic!("expected RestoreInconsistent, got {}", other),
        }
        assert!(err.is_fatal());
        assert!(matches!(
            t.store.get_item(&item.id).await,
            Err(DbError::StoreUnavailable(_))
        ));
        assert_ne!(std::fs::read(&live).unwrap(), b"not a sqlite file");

        t.cleanup().await;
    }

    #[tokio::test]
    async fn test_list_snapshots_newest_first() {
        let t = TempStore::new().await;
        let first = t.store.create_snapshot().await.unwrap();
        let second = t.store.create_snapshot().await.unwrap();
        std::fs::write(t.store.backup_dir().join("snapshot-bogus.db"), b"x").unwrap();

        let names: Vec<String> = t
            .store
            .list_snapshots()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();

        assert!(second.created_at > first.created_at);
        assert_eq!(names, vec![second.name, first.name]);

        t.cleanup().await;
    }

    #[tokio::test]
    async fn test_requests_during_restore_time_out() {
        let t = TempStore::new().await;
        let held = t.store.db.clone().write_owned().await;

        let err = t.store.list_items(None).await.unwrap_err();
        assert!(matches!(err, DbError::StoreUnavailable(_)));

        drop(held);
        assert!(t.store.list_items(None).await.is_ok());

        t.cleanup().await;
    }

    #[tokio::test]
    async fn test_lost_handle_is_unavailable_until_restored() {
        let t = TempStore::new().await;
        let snapshot = t.store.create_snapshot().await.unwrap();
        if let Some(db) = t.store.db.write().await.take() {
            db.close().await;
        }

        let err = t.store.undo_last().await.unwrap_err();
        assert!(matches!(err, DbError::StoreUnavailable(_)));

        t.store.restore(&snapshot.name).await.unwrap();
        assert!(t.store.list_items(None).await.unwrap().is_empty());

        t.cleanup().await;
    }

    #[tokio::test]
    async fn test_undo_after_borrow_through_store() {
        let t = TempStore::new().await;
        let item = t.store.add_item("Tripod", "Camera", 5).await.unwrap();
        t.store.borrow(&item.id, 3, "user-1").await.unwrap();

        let outcome = t.store.undo_last().await.unwrap();

        assert_eq!(outcome.reversed.len(), 2);
        assert_eq!(t.store.get_item(&item.id).await.unwrap().available_stock, 5);
        assert_eq!(t.store.latest_action().await.unwrap().action, "INSERT");

        t.cleanup().await;
    }
}
