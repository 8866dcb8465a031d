//! # Borrowing Repository
//!
//! Borrow records. A record is created `borrowed` and flipped exactly once
//! to `returned`; the flip is a conditional update so two concurrent returns
//! of the same record cannot both succeed.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use kitroom_core::{BorrowRecord, BorrowingPatch};

const COLUMNS: &str = "id, equipment_id, borrower_id, quantity, status, borrowed_at, returned_at";

/// Repository for borrow record reads.
#[derive(Debug, Clone)]
pub struct BorrowingRepository {
    pool: SqlitePool,
}

impl BorrowingRepository {
    /// Creates a new BorrowingRepository.
    pub fn new(pool: SqlitePool) -> Self {
        BorrowingRepository { pool }
    }

    /// Gets a borrow record by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<BorrowRecord>> {
        let record = sqlx::query_as::<_, BorrowRecord>(&format!(
            "SELECT {COLUMNS} FROM borrowings WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Lists a borrower's records, newest first.
    ///
    /// ## Arguments
    /// * `borrower_id` - Borrower to list for
    /// * `open_only` - Skip records already returned
    pub async fn for_borrower(
        &self,
        borrower_id: &str,
        open_only: bool,
    ) -> DbResult<Vec<BorrowRecord>> {
        let records = sqlx::query_as::<_, BorrowRecord>(&format!(
            r#"
            SELECT {COLUMNS} FROM borrowings
            WHERE borrower_id = ?1 AND (?2 = 0 OR status = 'borrowed')
            ORDER BY borrowed_at DESC, id
            "#
        ))
        .bind(borrower_id)
        .bind(open_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Lists the records of an item that are still out.
    pub async fn open_for_item(&self, equipment_id: &str) -> DbResult<Vec<BorrowRecord>> {
        let records = sqlx::query_as::<_, BorrowRecord>(&format!(
            r#"
            SELECT {COLUMNS} FROM borrowings
            WHERE equipment_id = ?1 AND status = 'borrowed'
            ORDER BY borrowed_at, id
            "#
        ))
        .bind(equipment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Sum of `quantity` over open records of an item.
    pub async fn quantity_on_loan(&self, equipment_id: &str) -> DbResult<i64> {
        let on_loan: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0) FROM borrowings
            WHERE equipment_id = ?1 AND status = 'borrowed'
            "#,
        )
        .bind(equipment_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(on_loan)
    }

    /// Counts all records.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM borrowings")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// In-transaction writes
// =============================================================================

/// Reads a record on the transaction's connection.
pub(crate) async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<BorrowRecord>> {
    let record = sqlx::query_as::<_, BorrowRecord>(&format!(
        "SELECT {COLUMNS} FROM borrowings WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;

    Ok(record)
}

/// Inserts a complete record, keeping its id and timestamps.
pub(crate) async fn insert(conn: &mut SqliteConnection, record: &BorrowRecord) -> DbResult<()> {
    debug!(
        id = %record.id,
        equipment_id = %record.equipment_id,
        quantity = record.quantity,
        "Inserting borrow record"
    );

    sqlx::query(
        r#"
        INSERT INTO borrowings (
            id, equipment_id, borrower_id, quantity, status, borrowed_at, returned_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&record.id)
    .bind(&record.equipment_id)
    .bind(&record.borrower_id)
    .bind(record.quantity)
    .bind(record.status)
    .bind(record.borrowed_at)
    .bind(record.returned_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Flips an open record to returned.
///
/// Returns the updated record, or `None` when it is missing or already
/// returned.
pub(crate) async fn mark_returned(
    conn: &mut SqliteConnection,
    id: &str,
    returned_at: DateTime<Utc>,
) -> DbResult<Option<BorrowRecord>> {
    let record = sqlx::query_as::<_, BorrowRecord>(&format!(
        r#"
        UPDATE borrowings
        SET status = 'returned', returned_at = ?2
        WHERE id = ?1 AND status = 'borrowed'
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(returned_at)
    .fetch_optional(conn)
    .await?;

    Ok(record)
}

/// Writes the fields present in `patch`. Returns rows affected.
pub(crate) async fn apply_patch(
    conn: &mut SqliteConnection,
    id: &str,
    patch: &BorrowingPatch,
) -> DbResult<u64> {
    if patch.is_empty() {
        let exists = fetch(conn, id).await?.is_some();
        return Ok(u64::from(exists));
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE borrowings SET ");
    let mut fields = builder.separated(", ");
    if let Some(status) = patch.status {
        fields.push("status = ").push_bind_unseparated(status);
    }
    if let Some(returned_at) = patch.returned_at {
        fields.push("returned_at = ").push_bind_unseparated(returned_at);
    }
    if let Some(quantity) = patch.quantity {
        fields.push("quantity = ").push_bind_unseparated(quantity);
    }
    builder.push(" WHERE id = ").push_bind(id.to_string());

    let result = builder.build().execute(conn).await?;
    Ok(result.rows_affected())
}

/// Deletes a record. Returns rows affected.
pub(crate) async fn delete_by_id(conn: &mut SqliteConnection, id: &str) -> DbResult<u64> {
    let result = sqlx::query("DELETE FROM borrowings WHERE id = ?1")
        .bind(id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}
