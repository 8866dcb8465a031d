//! # Equipment Repository
//!
//! Items and their two stock counters.
//!
//! Stock only ever moves through the conditional updates below. Each one
//! checks the bound in its WHERE clause, so a change that would leave
//! `0 <= available_stock <= total_stock` matches no row instead of writing.

use sqlx::sqlite::SqliteConnection;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use kitroom_core::{EquipmentPatch, InventoryItem, MAX_TOTAL_STOCK};

const COLUMNS: &str = "id, name, category, total_stock, available_stock, created_at";

/// Repository for equipment reads.
#[derive(Debug, Clone)]
pub struct EquipmentRepository {
    pool: SqlitePool,
}

impl EquipmentRepository {
    /// Creates a new EquipmentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EquipmentRepository { pool }
    }

    /// Gets an item by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<InventoryItem>> {
        let item = sqlx::query_as::<_, InventoryItem>(&format!(
            "SELECT {COLUMNS} FROM equipment WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    /// Lists items ordered by name, optionally within one category.
    pub async fn list(&self, category: Option<&str>) -> DbResult<Vec<InventoryItem>> {
        let items = match category {
            Some(category) => {
                sqlx::query_as::<_, InventoryItem>(&format!(
                    "SELECT {COLUMNS} FROM equipment WHERE category = ?1 ORDER BY name, id"
                ))
                .bind(category)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, InventoryItem>(&format!(
                    "SELECT {COLUMNS} FROM equipment ORDER BY name, id"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(items)
    }

    /// Counts all items.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM equipment")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// In-transaction writes
// =============================================================================

/// Reads an item on the transaction's connection.
pub(crate) async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<InventoryItem>> {
    let item = sqlx::query_as::<_, InventoryItem>(&format!(
        "SELECT {COLUMNS} FROM equipment WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;

    Ok(item)
}

/// Inserts a complete row, keeping its id and timestamps.
pub(crate) async fn insert(conn: &mut SqliteConnection, item: &InventoryItem) -> DbResult<()> {
    debug!(id = %item.id, name = %item.name, "Inserting equipment");

    sqlx::query(
        r#"
        INSERT INTO equipment (id, name, category, total_stock, available_stock, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(&item.id)
    .bind(&item.name)
    .bind(&item.category)
    .bind(item.total_stock)
    .bind(item.available_stock)
    .bind(item.created_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Takes `quantity` units off the shelf.
///
/// Returns the new available stock, or `None` when the item is missing or
/// has fewer than `quantity` units available.
pub(crate) async fn take_stock(
    conn: &mut SqliteConnection,
    id: &str,
    quantity: i64,
) -> DbResult<Option<i64>> {
    let available: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE equipment
        SET available_stock = available_stock - ?2
        WHERE id = ?1 AND available_stock >= ?2
        RETURNING available_stock
        "#,
    )
    .bind(id)
    .bind(quantity)
    .fetch_optional(conn)
    .await?;

    Ok(available)
}

/// Puts `quantity` units back on the shelf.
///
/// Returns the new available stock, or `None` when the item is missing or
/// the shelf would hold more than `total_stock`.
pub(crate) async fn release_stock(
    conn: &mut SqliteConnection,
    id: &str,
    quantity: i64,
) -> DbResult<Option<i64>> {
    let available: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE equipment
        SET available_stock = available_stock + ?2
        WHERE id = ?1 AND available_stock + ?2 <= total_stock
        RETURNING available_stock
        "#,
    )
    .bind(id)
    .bind(quantity)
    .fetch_optional(conn)
    .await?;

    Ok(available)
}

/// Moves both counters by `delta` (positive: new units, negative: write-off).
///
/// Returns `(total_stock, available_stock)` after the change, or `None` when
/// the item is missing or the change would break the stock bounds.
pub(crate) async fn adjust_stock(
    conn: &mut SqliteConnection,
    id: &str,
    delta: i64,
) -> DbResult<Option<(i64, i64)>> {
    let stock: Option<(i64, i64)> = sqlx::query_as(
        r#"
        UPDATE equipment
        SET total_stock = total_stock + ?2,
            available_stock = available_stock + ?2
        WHERE id = ?1
          AND available_stock + ?2 >= 0
          AND total_stock + ?2 <= ?3
        RETURNING total_stock, available_stock
        "#,
    )
    .bind(id)
    .bind(delta)
    .bind(MAX_TOTAL_STOCK)
    .fetch_optional(conn)
    .await?;

    Ok(stock)
}

/// Deletes an item and returns the removed row.
pub(crate) async fn delete(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<InventoryItem>> {
    let item = sqlx::query_as::<_, InventoryItem>(&format!(
        "DELETE FROM equipment WHERE id = ?1 RETURNING {COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;

    Ok(item)
}

/// Writes the fields present in `patch`. Returns rows affected.
///
/// An empty patch writes nothing and reports the row as matched if it
/// exists.
pub(crate) async fn apply_patch(
    conn: &mut SqliteConnection,
    id: &str,
    patch: &EquipmentPatch,
) -> DbResult<u64> {
    if patch.is_empty() {
        let exists = fetch(conn, id).await?.is_some();
        return Ok(u64::from(exists));
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE equipment SET ");
    let mut fields = builder.separated(", ");
    if let Some(name) = &patch.name {
        fields.push("name = ").push_bind_unseparated(name.clone());
    }
    if let Some(category) = &patch.category {
        fields.push("category = ").push_bind_unseparated(category.clone());
    }
    if let Some(total_stock) = patch.total_stock {
        fields.push("total_stock = ").push_bind_unseparated(total_stock);
    }
    if let Some(available_stock) = patch.available_stock {
        fields
            .push("available_stock = ")
            .push_bind_unseparated(available_stock);
    }
    builder.push(" WHERE id = ").push_bind(id.to_string());

    let result = builder.build().execute(conn).await?;
    Ok(result.rows_affected())
}

/// Deletes an item without returning it. Returns rows affected.
pub(crate) async fn delete_by_id(conn: &mut SqliteConnection, id: &str) -> DbResult<u64> {
    let result = sqlx::query("DELETE FROM equipment WHERE id = ?1")
        .bind(id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}
