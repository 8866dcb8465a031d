//! # Action Log Repository
//!
//! The append-only audit trail behind undo.
//!
//! ## Log Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  id  batch_id  action  table_name  record_id  before       after       │
//! │  ──  ────────  ──────  ──────────  ─────────  ───────────  ─────────── │
//! │  41  b-7f..    UPDATE  equipment   e-12       {avail: 3}   {avail: 2}  │
//! │  42  b-7f..    INSERT  borrowings  r-88       null         {row}       │
//! │  43  b-c2..    UPDATE  borrowings  r-88       {borrowed}   {returned}  │
//! │  44  b-c2..    UPDATE  equipment   e-12       {avail: 2}   {avail: 3}  │
//! │                                                                         │
//! │  Rows are appended by UnitOfWork::record. Undo moves the newest batch  │
//! │  to action_log_undone, unchanged, in the same transaction.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::sqlite::SqliteConnection;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use kitroom_core::{ActionKind, ActionLogEntry, TrackedTable};

const COLUMNS: &str =
    "id, batch_id, action, table_name, record_id, before_state, after_state, recorded_at";

/// Repository for action log reads.
#[derive(Debug, Clone)]
pub struct ActionLogRepository {
    pool: SqlitePool,
}

impl ActionLogRepository {
    /// Creates a new ActionLogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ActionLogRepository { pool }
    }

    /// The newest entry, if any.
    pub async fn latest(&self) -> DbResult<Option<ActionLogEntry>> {
        let entry = sqlx::query_as::<_, ActionLogEntry>(&format!(
            "SELECT {COLUMNS} FROM action_log ORDER BY id DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Up to `limit` entries, newest first.
    pub async fn recent(&self, limit: i64) -> DbResult<Vec<ActionLogEntry>> {
        let entries = sqlx::query_as::<_, ActionLogEntry>(&format!(
            "SELECT {COLUMNS} FROM action_log ORDER BY id DESC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Entries of one batch in the order they were written.
    pub async fn batch(&self, batch_id: &str) -> DbResult<Vec<ActionLogEntry>> {
        let entries = sqlx::query_as::<_, ActionLogEntry>(&format!(
            "SELECT {COLUMNS} FROM action_log WHERE batch_id = ?1 ORDER BY id"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Up to `limit` entries consumed by undo, most recently undone first.
    pub async fn undone(&self, limit: i64) -> DbResult<Vec<ActionLogEntry>> {
        let entries = sqlx::query_as::<_, ActionLogEntry>(&format!(
            "SELECT {COLUMNS} FROM action_log_undone ORDER BY undone_at DESC, id DESC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Counts all entries.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM action_log")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// In-transaction writes
// =============================================================================

/// Appends one entry. Returns its sequence number.
pub(crate) async fn append(
    conn: &mut SqliteConnection,
    batch_id: &str,
    kind: ActionKind,
    table: TrackedTable,
    record_id: &str,
    before_state: Option<&str>,
    after_state: Option<&str>,
) -> DbResult<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO action_log (
            batch_id, action, table_name, record_id, before_state, after_state, recorded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        RETURNING id
        "#,
    )
    .bind(batch_id)
    .bind(kind.as_str())
    .bind(table.as_str())
    .bind(record_id)
    .bind(before_state)
    .bind(after_state)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;

    debug!(id, batch_id, action = %kind, table = %table, record_id, "Action logged");
    Ok(id)
}

/// Moves the newest batch to `action_log_undone` and returns its entries
/// newest first.
///
/// Opens with a DELETE, so it also takes the write lock for the
/// transaction it runs in. An empty log yields an empty vector.
pub(crate) async fn take_latest_batch(conn: &mut SqliteConnection) -> DbResult<Vec<ActionLogEntry>> {
    let mut entries = sqlx::query_as::<_, ActionLogEntry>(&format!(
        r#"
        DELETE FROM action_log
        WHERE batch_id = (SELECT batch_id FROM action_log ORDER BY id DESC LIMIT 1)
        RETURNING {COLUMNS}
        "#
    ))
    .fetch_all(&mut *conn)
    .await?;

    if entries.is_empty() {
        return Ok(entries);
    }

    let undone_at = Utc::now();
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("INSERT INTO action_log_undone ({COLUMNS}, undone_at) "));
    builder.push_values(&entries, |mut row, entry| {
        row.push_bind(entry.id)
            .push_bind(entry.batch_id.clone())
            .push_bind(entry.action.clone())
            .push_bind(entry.table_name.clone())
            .push_bind(entry.record_id.clone())
            .push_bind(entry.before_state.clone())
            .push_bind(entry.after_state.clone())
            .push_bind(entry.recorded_at)
            .push_bind(undone_at);
    });
    builder.build().execute(&mut *conn).await?;

    // RETURNING order is unspecified
    entries.sort_by(|a, b| b.id.cmp(&a.id));
    Ok(entries)
}

/// Appends a raw row, bypassing the typed action/table. Test-only: lets
/// tests plant entries the ledger would never write.
#[cfg(test)]
pub(crate) async fn append_raw(
    pool: &SqlitePool,
    batch_id: &str,
    action: &str,
    table_name: &str,
    record_id: &str,
) -> DbResult<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO action_log (batch_id, action, table_name, record_id, recorded_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        RETURNING id
        "#,
    )
    .bind(batch_id)
    .bind(action)
    .bind(table_name)
    .bind(record_id)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(id)
}
