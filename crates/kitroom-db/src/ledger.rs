//! # Ledger
//!
//! Borrow, return and equipment administration. Every operation is one
//! [`UnitOfWork`]: the row changes and their action log entries commit
//! together or not at all.
//!
//! ## Borrow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  borrow(item, qty, borrower)                                           │
//! │                                                                         │
//! │  1. UPDATE equipment SET available -= qty                              │
//! │        WHERE id = item AND available >= qty   ← write lock taken here  │
//! │     └── no row? → NotFound / InsufficientStock, rolled back            │
//! │  2. INSERT borrowings (status = borrowed)                              │
//! │  3. log UPDATE equipment   before {available} / after {available}      │
//! │  4. log INSERT borrowings  after {row}                                 │
//! │  5. COMMIT                                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Return
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  return_borrowing(id)                                                  │
//! │                                                                         │
//! │  1. UPDATE borrowings SET status = returned                            │
//! │        WHERE id = ? AND status = borrowed                              │
//! │     └── no row? → NotFound / InvalidState                              │
//! │  2. UPDATE equipment SET available += qty                              │
//! │        WHERE available + qty <= total                                  │
//! │     └── no row? → InvalidState (would exceed total)                    │
//! │  3. log UPDATE borrowings  before {borrowed, null} / after {returned}  │
//! │  4. log UPDATE equipment   before {available} / after {available}      │
//! │  5. COMMIT                                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::{borrowing, equipment};
use crate::transaction::UnitOfWork;
use kitroom_core::validation::{
    validate_id, validate_label, validate_quantity, validate_stock_delta, validate_total_stock,
};
use kitroom_core::{
    ActionKind, BorrowRecord, BorrowStatus, BorrowingPatch, EquipmentPatch, InventoryItem,
    TrackedTable,
};

/// Mutating ledger operations.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Creates a new Ledger.
    pub fn new(pool: SqlitePool) -> Self {
        Ledger { pool }
    }

    /// Lends `quantity` units of an item to a borrower.
    ///
    /// ## Errors
    /// - `NotFound` if the item does not exist
    /// - `InsufficientStock` if fewer than `quantity` units are available
    ///
    /// Either error leaves stock and borrow records unchanged.
    #[instrument(skip(self))]
    pub async fn borrow(
        &self,
        item_id: &str,
        quantity: i64,
        borrower_id: &str,
    ) -> DbResult<BorrowRecord> {
        validate_id("item_id", item_id)?;
        validate_id("borrower_id", borrower_id)?;
        validate_quantity(quantity)?;

        let mut uow = UnitOfWork::begin(&self.pool, "borrow").await?;
        let result = borrow_in(&mut uow, item_id, quantity, borrower_id).await;
        let record = uow.finish(result).await?;

        info!(
            borrowing_id = %record.id,
            item_id,
            quantity,
            borrower_id,
            "Equipment borrowed"
        );
        Ok(record)
    }

    /// Marks a borrow record returned and puts its units back on the shelf.
    ///
    /// ## Errors
    /// - `NotFound` if no record has this id
    /// - `InvalidState` if the record was already returned, or the units
    ///   would push available stock above total
    #[instrument(skip(self))]
    pub async fn return_borrowing(&self, borrowing_id: &str) -> DbResult<BorrowRecord> {
        validate_id("borrowing_id", borrowing_id)?;

        let mut uow = UnitOfWork::begin(&self.pool, "return").await?;
        let result = return_in(&mut uow, borrowing_id).await;
        let record = uow.finish(result).await?;

        info!(
            borrowing_id,
            item_id = %record.equipment_id,
            quantity = record.quantity,
            "Equipment returned"
        );
        Ok(record)
    }

    /// Registers a new item with all of its units available.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        name: &str,
        category: &str,
        total_stock: i64,
    ) -> DbResult<InventoryItem> {
        validate_label("name", name)?;
        validate_label("category", category)?;
        validate_total_stock(total_stock)?;

        let item = InventoryItem {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            category: category.trim().to_string(),
            total_stock,
            available_stock: total_stock,
            created_at: Utc::now(),
        };

        let mut uow = UnitOfWork::begin(&self.pool, "add_item").await?;
        let result = add_item_in(&mut uow, &item).await;
        uow.finish(result).await?;

        info!(item_id = %item.id, name = %item.name, total_stock, "Equipment added");
        Ok(item)
    }

    /// Adds units (`delta > 0`) or writes units off (`delta < 0`).
    ///
    /// Both counters move together, so units on loan are unaffected.
    ///
    /// ## Errors
    /// - `NotFound` if the item does not exist
    /// - `InvalidState` if fewer than `-delta` units are on the shelf
    #[instrument(skip(self))]
    pub async fn restock(&self, item_id: &str, delta: i64) -> DbResult<InventoryItem> {
        validate_id("item_id", item_id)?;
        validate_stock_delta(delta)?;

        let mut uow = UnitOfWork::begin(&self.pool, "restock").await?;
        let result = restock_in(&mut uow, item_id, delta).await;
        let item = uow.finish(result).await?;

        info!(
            item_id,
            delta,
            total_stock = item.total_stock,
            available_stock = item.available_stock,
            "Equipment restocked"
        );
        Ok(item)
    }

    /// Deletes an item that has never been borrowed.
    ///
    /// ## Errors
    /// - `NotFound` if the item does not exist
    /// - `InvalidState` if any borrow record references it
    #[instrument(skip(self))]
    pub async fn remove_item(&self, item_id: &str) -> DbResult<InventoryItem> {
        validate_id("item_id", item_id)?;

        let mut uow = UnitOfWork::begin(&self.pool, "remove_item").await?;
        let result = remove_item_in(&mut uow, item_id).await;
        let item = uow.finish(result).await?;

        info!(item_id, name = %item.name, "Equipment removed");
        Ok(item)
    }
}

// =============================================================================
// Transaction bodies
// =============================================================================

async fn borrow_in(
    uow: &mut UnitOfWork,
    item_id: &str,
    quantity: i64,
    borrower_id: &str,
) -> DbResult<BorrowRecord> {
    let Some(available) = equipment::take_stock(uow.conn(), item_id, quantity).await? else {
        return Err(match equipment::fetch(uow.conn(), item_id).await? {
            None => DbError::not_found("Equipment", item_id),
            Some(item) => DbError::InsufficientStock {
                item_id: item_id.to_string(),
                available: item.available_stock,
                requested: quantity,
            },
        });
    };

    let record = BorrowRecord {
        id: Uuid::new_v4().to_string(),
        equipment_id: item_id.to_string(),
        borrower_id: borrower_id.to_string(),
        quantity,
        status: BorrowStatus::Borrowed,
        borrowed_at: Utc::now(),
        returned_at: None,
    };
    borrowing::insert(uow.conn(), &record).await?;

    uow.record(
        ActionKind::Update,
        TrackedTable::Equipment,
        item_id,
        Some(serde_json::to_string(&EquipmentPatch::available(available + quantity))?),
        Some(serde_json::to_string(&EquipmentPatch::available(available))?),
    )
    .await?;
    uow.record(
        ActionKind::Insert,
        TrackedTable::Borrowings,
        &record.id,
        None,
        Some(serde_json::to_string(&record)?),
    )
    .await?;

    Ok(record)
}

async fn return_in(uow: &mut UnitOfWork, borrowing_id: &str) -> DbResult<BorrowRecord> {
    let returned_at = Utc::now();

    let Some(record) = borrowing::mark_returned(uow.conn(), borrowing_id, returned_at).await? else {
        return Err(match borrowing::fetch(uow.conn(), borrowing_id).await? {
            None => DbError::not_found("Borrowing", borrowing_id),
            Some(_) => DbError::invalid_state(format!(
                "borrowing {} is already returned",
                borrowing_id
            )),
        });
    };

    let Some(available) =
        equipment::release_stock(uow.conn(), &record.equipment_id, record.quantity).await?
    else {
        return Err(match equipment::fetch(uow.conn(), &record.equipment_id).await? {
            None => DbError::not_found("Equipment", record.equipment_id.as_str()),
            Some(item) => DbError::invalid_state(format!(
                "returning {} units would put available stock of {} above its total of {}",
                record.quantity, item.id, item.total_stock
            )),
        });
    };

    uow.record(
        ActionKind::Update,
        TrackedTable::Borrowings,
        &record.id,
        Some(serde_json::to_string(&BorrowingPatch::return_state(
            BorrowStatus::Borrowed,
            None,
        ))?),
        Some(serde_json::to_string(&BorrowingPatch::return_state(
            BorrowStatus::Returned,
            Some(returned_at),
        ))?),
    )
    .await?;
    uow.record(
        ActionKind::Update,
        TrackedTable::Equipment,
        &record.equipment_id,
        Some(serde_json::to_string(&EquipmentPatch::available(available - record.quantity))?),
        Some(serde_json::to_string(&EquipmentPatch::available(available))?),
    )
    .await?;

    Ok(record)
}

async fn add_item_in(uow: &mut UnitOfWork, item: &InventoryItem) -> DbResult<()> {
    equipment::insert(uow.conn(), item).await?;

    uow.record(
        ActionKind::Insert,
        TrackedTable::Equipment,
        &item.id,
        None,
        Some(serde_json::to_string(item)?),
    )
    .await?;

    Ok(())
}

async fn restock_in(uow: &mut UnitOfWork, item_id: &str, delta: i64) -> DbResult<InventoryItem> {
    let Some((total, available)) = equipment::adjust_stock(uow.conn(), item_id, delta).await?
    else {
        return Err(match equipment::fetch(uow.conn(), item_id).await? {
            None => DbError::not_found("Equipment", item_id),
            Some(item) => DbError::invalid_state(format!(
                "cannot change stock of {} by {}: {} of {} units available",
                item_id, delta, item.available_stock, item.total_stock
            )),
        });
    };

    uow.record(
        ActionKind::Update,
        TrackedTable::Equipment,
        item_id,
        Some(serde_json::to_string(&EquipmentPatch::stock(total - delta, available - delta))?),
        Some(serde_json::to_string(&EquipmentPatch::stock(total, available))?),
    )
    .await?;

    equipment::fetch(uow.conn(), item_id)
        .await?
        .ok_or_else(|| DbError::not_found("Equipment", item_id))
}

async fn remove_item_in(uow: &mut UnitOfWork, item_id: &str) -> DbResult<InventoryItem> {
    let removed = match equipment::delete(uow.conn(), item_id).await {
        Ok(removed) => removed,
        Err(DbError::ForeignKeyViolation { .. }) => {
            return Err(DbError::invalid_state(format!(
                "equipment {} has borrow records and cannot be removed",
                item_id
            )))
        }
        Err(e) => return Err(e),
    };
    let item = removed.ok_or_else(|| DbError::not_found("Equipment", item_id))?;

    uow.record(
        ActionKind::Delete,
        TrackedTable::Equipment,
        item_id,
        Some(serde_json::to_string(&item)?),
        None,
    )
    .await?;

    Ok(item)
}

// =============================================================================
// Unit Tests
// =============================================================================
