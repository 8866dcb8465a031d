//! # Snapshot Manager
//!
//! Point-in-time copies of the store file in the backup directory.
//!
//! ## Naming
//! ```text
//! snapshot-2026-10-19_14-03-22-123.db
//!          └──date──┘ └─time─┘ └ms┘      UTC
//! ```
//! Names sort the same as their timestamps. A name that does not parse is
//! not a snapshot and never shows up in a listing.
//!
//! ## Consistency
//! The store runs in WAL mode, so the main file alone can lag behind the
//! last commit. [`SnapshotManager::create`] checkpoints the WAL first; the
//! caller holds the store handle exclusively so no commit lands in between.
//!
//! The manager only touches files. Closing and reopening the store around a
//! restore is [`crate::store::Store`]'s job.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use kitroom_core::Snapshot;

const PREFIX: &str = "snapshot-";
const SUFFIX: &str = ".db";
const STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Tables a file must carry to be taken for a Kitroom store.
const STORE_TABLES: [&str; 3] = ["equipment", "borrowings", "action_log"];

/// Builds the file name for a snapshot taken at `at`.
pub fn snapshot_name(at: DateTime<Utc>) -> String {
    format!("{PREFIX}{}{SUFFIX}", at.format("%Y-%m-%d_%H-%M-%S-%3f"))
}

/// Reads the timestamp back out of a snapshot file name.
///
/// ## Example
/// ```rust
/// use kitroom_db::snapshot::parse_snapshot_name;
///
/// assert!(parse_snapshot_name("snapshot-2026-10-19_14-03-22-123.db").is_some());
/// assert!(parse_snapshot_name("snapshot-latest.db").is_none());
/// ```
pub fn parse_snapshot_name(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    let (seconds, millis) = stamp.rsplit_once('-')?;

    if millis.len() != 3 || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let millis: i64 = millis.parse().ok()?;

    let naive = NaiveDateTime::parse_from_str(seconds, STAMP_FORMAT).ok()?;
    Some(naive.and_utc() + ChronoDuration::milliseconds(millis))
}

/// `<path><suffix>`, e.g. `kitroom.db-wal`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Removes a file, treating "already gone" as success.
async fn remove_if_present(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Owns the backup directory.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    backup_dir: PathBuf,
}

impl SnapshotManager {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        SnapshotManager {
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Copies the store file into the backup directory.
    ///
    /// The caller must hold the store handle exclusively. Creates the backup
    /// directory if needed. A clash with an existing name moves the stamp
    /// forward by a millisecond until it is free.
    pub async fn create(&self, db: &Database, db_path: &Path) -> DbResult<Snapshot> {
        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|e| snapshot_failed("create backup directory", e))?;

        db.checkpoint().await?;

        let mut created_at = Utc::now().trunc_subsecs(3);
        let mut path = self.backup_dir.join(snapshot_name(created_at));
        while tokio::fs::try_exists(&path)
            .await
            .map_err(|e| snapshot_failed("check snapshot name", e))?
        {
            created_at += ChronoDuration::milliseconds(1);
            path = self.backup_dir.join(snapshot_name(created_at));
        }

        let size_bytes = tokio::fs::copy(db_path, &path)
            .await
            .map_err(|e| snapshot_failed("copy store file", e))?;

        let name = snapshot_name(created_at);
        info!(snapshot = %name, size_bytes, "Snapshot created");

        Ok(Snapshot {
            name,
            path,
            created_at,
            size_bytes,
        })
    }

    /// Lists snapshots newest first. Files whose names do not parse are
    /// skipped; a missing backup directory lists as empty.
    pub async fn list(&self) -> DbResult<Vec<Snapshot>> {
        let mut dir = match tokio::fs::read_dir(&self.backup_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let Some(created_at) = parse_snapshot_name(&name) else {
                debug!(file = %name, "Skipping file with malformed snapshot name");
                continue;
            };
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            snapshots.push(Snapshot {
                path: entry.path(),
                name,
                created_at,
                size_bytes: metadata.len(),
            });
        }

        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.name.cmp(&a.name)));
        Ok(snapshots)
    }

    /// Path of an existing snapshot.
    ///
    /// `NotFound` for a name that is not a snapshot name or has no file.
    pub async fn resolve(&self, name: &str) -> DbResult<PathBuf> {
        if parse_snapshot_name(name).is_none() {
            return Err(DbError::not_found("Snapshot", name));
        }

        let path = self.backup_dir.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            Ok(_) => Err(DbError::not_found("Snapshot", name)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DbError::not_found("Snapshot", name))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Puts the snapshot's bytes at `db_path`.
    ///
    /// The store must be closed. The copy goes to a temporary sibling, is
    /// checked to be a readable Kitroom store, and is renamed over the store
    /// file as the last step, so an error means the original file is still
    /// in place.
    pub async fn replace_store_file(&self, snapshot: &Path, db_path: &Path) -> DbResult<()> {
        let staging = sibling(db_path, ".restore");

        let staged = match tokio::fs::copy(snapshot, &staging).await {
            Ok(_) => verify_store_file(&staging).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = staged {
            discard_staging(&staging).await;
            return Err(e);
        }

        // WAL and shared-memory files belong to the file being replaced
        remove_if_present(&sibling(db_path, "-wal")).await?;
        remove_if_present(&sibling(db_path, "-shm")).await?;

        tokio::fs::rename(&staging, db_path).await?;
        Ok(())
    }
}

/// Opens `path` without writing to it and checks it is an intact SQLite
/// file holding the ledger tables.
pub async fn verify_store_file(path: &Path) -> DbResult<()> {
    let unusable = |reason: String| {
        DbError::SnapshotFailed(format!("{} is not a usable store: {}", path.display(), reason))
    };

    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .immutable(true)
        .connect()
        .await
        .map_err(|e| unusable(e.to_string()))?;

    let checked = check_store(&mut conn).await.map_err(unusable);

    if let Err(e) = conn.close().await {
        debug!(path = %path.display(), error = %e, "Closing verification connection failed");
    }
    checked
}

async fn check_store(conn: &mut SqliteConnection) -> Result<(), String> {
    let report: Vec<String> = sqlx::query_scalar("PRAGMA quick_check")
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| e.to_string())?;
    if report != ["ok"] {
        return Err(report.join("; "));
    }

    let tables: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN (?1, ?2, ?3)",
    )
    .bind(STORE_TABLES[0])
    .bind(STORE_TABLES[1])
    .bind(STORE_TABLES[2])
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| e.to_string())?;
    if tables != STORE_TABLES.len() as i64 {
        return Err("ledger tables missing".to_string());
    }

    Ok(())
}

async fn discard_staging(staging: &Path) {
    for path in [staging.to_path_buf(), sibling(staging, "-wal"), sibling(staging, "-shm")] {
        if let Err(cleanup) = remove_if_present(&path).await {
            warn!(path = %path.display(), error = %cleanup, "Could not remove restore staging file");
        }
    }
}

fn snapshot_failed(step: &str, err: io::Error) -> DbError {
    DbError::SnapshotFailed(format!("{}: {}", step, err))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("kitroom-snap-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_name_round_trip() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 14, 3, 22).unwrap()
            + ChronoDuration::milliseconds(7);

        let name = snapshot_name(at);

        assert_eq!(name, "snapshot-2026-10-19_14-03-22-007.db");
        assert_eq!(parse_snapshot_name(&name), Some(at));
    }

    #[test]
    fn test_malformed_names() {
        for name in [
            "snapshot-2026-10-19_14-03-22.db",
            "snapshot-2026-10-19_14-03-22-12.db",
            "snapshot-2026-13-19_14-03-22-123.db",
            "snapshot-2026-10-19_14-03-22-12a.db",
            "backup-2026-10-19_14-03-22-123.db",
            "snapshot-2026-10-19_14-03-22-123.db.tmp",
            "notes.txt",
        ] {
            assert!(parse_snapshot_name(name).is_none(), "{} should not parse", name);
        }
    }

    #[test]
    fn test_names_sort_like_timestamps() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = early + ChronoDuration::milliseconds(1);
        assert!(snapshot_name(early) < snapshot_name(late));
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let manager = SnapshotManager::new(temp_dir());
        assert!(manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_newest_first_skipping_malformed() {
        let dir = temp_dir();
        tokio::fs::create_dir_all(&dir).await.unwrap();
        for name in [
            "snapshot-2026-01-01_00-00-00-000.db",
            "snapshot-2026-03-01_00-00-00-000.db",
            "snapshot-2026-02-01_00-00-00-000.db",
            "snapshot-garbage.db",
            "readme.txt",
        ] {
            tokio::fs::write(dir.join(name), b"x").await.unwrap();
        }
        tokio::fs::create_dir(dir.join("snapshot-2026-04-01_00-00-00-000.db"))
            .await
            .unwrap();

        let names: Vec<String> = SnapshotManager::new(&dir)
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();

        assert_eq!(
            names,
            vec![
                "snapshot-2026-03-01_00-00-00-000.db",
                "snapshot-2026-02-01_00-00-00-000.db",
                "snapshot-2026-01-01_00-00-00-000.db",
            ]
        );
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_missing_is_not_found() {
        let manager = SnapshotManager::new(temp_dir());

        let err = manager
            .resolve("snapshot-2026-01-01_00-00-00-000.db")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));

        let err = manager.resolve("kitroom.db").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    /// Writes an empty, migrated store at `path`.
    async fn write_store(path: &Path) {
        let db = Database::new(crate::pool::DbConfig::new(path)).await.unwrap();
        db.checkpoint().await.unwrap();
        db.close().await;
    }

    #[tokio::test]
    async fn test_replace_store_file_drops_wal() {
        let dir = temp_dir();
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let db_path = dir.join("kitroom.db");
        let snap = dir.join("snapshot-2026-01-01_00-00-00-000.db");
        tokio::fs::write(&db_path, b"live").await.unwrap();
        tokio::fs::write(sibling(&db_path, "-wal"), b"stale").await.unwrap();
        write_store(&snap).await;

        SnapshotManager::new(&dir)
            .replace_store_file(&snap, &db_path)
            .await
            .unwrap();

        assert_eq!(
            tokio::fs::read(&db_path).await.unwrap(),
            tokio::fs::read(&snap).await.unwrap()
        );
        assert!(!tokio::fs::try_exists(sibling(&db_path, "-wal")).await.unwrap());
        assert!(!tokio::fs::try_exists(sibling(&db_path, ".restore")).await.unwrap());
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_rejects_file_that_is_not_a_store() {
        let dir = temp_dir();
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let db_path = dir.join("kitroom.db");
        tokio::fs::write(&db_path, b"live").await.unwrap();
        let manager = SnapshotManager::new(&dir);

        let garbage = dir.join("snapshot-2026-01-01_00-00-00-000.db");
        tokio::fs::write(&garbage, b"not a sqlite file").await.unwrap();
        let err = manager.replace_store_file(&garbage, &db_path).await.unwrap_err();
        assert!(matches!(err, DbError::SnapshotFailed(_)));

        // a valid SQLite file without the ledger tables
        let foreign = dir.join("snapshot-2026-01-02_00-00-00-000.db");
        let mut conn = SqliteConnectOptions::new()
            .filename(&foreign)
            .create_if_missing(true)
            .connect()
            .await
            .unwrap();
        sqlx::query("CREATE TABLE notes (body TEXT)")
            .execute(&mut conn)
            .await
            .unwrap();
        conn.close().await.unwrap();
        let err = manager.replace_store_file(&foreign, &db_path).await.unwrap_err();
        assert!(matches!(err, DbError::SnapshotFailed(_)));

        assert_eq!(tokio::fs::read(&db_path).await.unwrap(), b"live");
        assert!(!tokio::fs::try_exists(sibling(&db_path, ".restore")).await.unwrap());
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
