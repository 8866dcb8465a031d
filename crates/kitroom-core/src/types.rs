//! # Domain Types
//!
//! Core domain types used throughout Kitroom.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  InventoryItem  │◄──│  BorrowRecord   │   │ ActionLogEntry  │       │
//! │  │  ─────────────  │ N:1  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (seq)       │       │
//! │  │  total_stock    │   │  equipment_id   │   │  batch_id       │       │
//! │  │  available      │   │  quantity       │   │  action/table   │       │
//! │  └─────────────────┘   │  status         │   │  before/after   │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  BorrowStatus   │   │   ActionKind    │   │  TrackedTable   │       │
//! │  │  Borrowed       │   │  Insert         │   │  Equipment      │       │
//! │  │  Returned       │   │  Update/Delete  │   │  Borrowings     │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Stock Invariant
//! `0 <= available_stock <= total_stock` holds for every committed
//! [`InventoryItem`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use ts_rs::TS;

// =============================================================================
// Inventory Item
// =============================================================================

/// A tracked piece of equipment and its stock levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InventoryItem {
    /// Unique identifier (UUID v4). Immutable.
    pub id: String,

    /// Display name shown on the dashboard.
    pub name: String,

    /// Category (e.g. "Laptops", "Cables").
    pub category: String,

    /// Units owned.
    pub total_stock: i64,

    /// Units on the shelf right now.
    pub available_stock: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl InventoryItem {
    /// Units currently out on loan.
    #[inline]
    pub fn on_loan(&self) -> i64 {
        self.total_stock - self.available_stock
    }

    /// Checks the stock invariant.
    pub fn stock_is_consistent(&self) -> bool {
        self.available_stock >= 0 && self.available_stock <= self.total_stock
    }

    /// Checks if `quantity` can be borrowed right now.
    pub fn can_lend(&self, quantity: i64) -> bool {
        quantity > 0 && quantity <= self.available_stock
    }
}

// =============================================================================
// Borrow Status
// =============================================================================

/// Lifecycle of a borrow record: created Borrowed, flipped once to Returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BorrowStatus {
    /// Equipment is out with the borrower.
    Borrowed,
    /// Equipment is back on the shelf.
    Returned,
}

impl BorrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BorrowStatus::Borrowed => "borrowed",
            BorrowStatus::Returned => "returned",
        }
    }
}

impl Default for BorrowStatus {
    fn default() -> Self {
        BorrowStatus::Borrowed
    }
}

impl fmt::Display for BorrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Borrow Record
// =============================================================================

/// One loan of `quantity` units of an item to a borrower.
///
/// Created on borrow, mutated once on return, never deleted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct BorrowRecord {
    pub id: String,
    /// The borrowed [`InventoryItem`].
    pub equipment_id: String,
    /// External identity of the borrower (user id from the session layer).
    pub borrower_id: String,
    pub quantity: i64,
    pub status: BorrowStatus,
    #[ts(as = "String")]
    pub borrowed_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub returned_at: Option<DateTime<Utc>>,
}

impl BorrowRecord {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == BorrowStatus::Borrowed
    }
}

// =============================================================================
// Action Kind
// =============================================================================

/// The kind of mutation an action log entry documents.
///
/// Persisted as `INSERT` / `UPDATE` / `DELETE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Insert,
    Update,
    Delete,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Insert => "INSERT",
            ActionKind::Update => "UPDATE",
            ActionKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(ActionKind::Insert),
            "UPDATE" => Ok(ActionKind::Update),
            "DELETE" => Ok(ActionKind::Delete),
            other => Err(format!("unknown action kind: {}", other)),
        }
    }
}

// =============================================================================
// Tracked Table
// =============================================================================

/// The closed set of tables whose mutations are logged and undoable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TrackedTable {
    /// `equipment` rows ([`InventoryItem`]).
    Equipment,
    /// `borrowings` rows ([`BorrowRecord`]).
    Borrowings,
}

impl TrackedTable {
    /// Name of the backing SQL table.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedTable::Equipment => "equipment",
            TrackedTable::Borrowings => "borrowings",
        }
    }
}

impl fmt::Display for TrackedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackedTable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equipment" => Ok(TrackedTable::Equipment),
            "borrowings" => Ok(TrackedTable::Borrowings),
            other => Err(format!("unknown table: {}", other)),
        }
    }
}

// =============================================================================
// Action Log Entry
// =============================================================================

/// One row of the append-only action log.
///
/// `action` and `table_name` are kept as persisted strings so that rows the
/// ledger cannot interpret can still be listed for audit; interpretation
/// happens in [`crate::inverse::Inverse::plan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ActionLogEntry {
    /// Insertion sequence number. Total order of the log.
    pub id: i64,
    /// Unit of work that wrote this entry.
    pub batch_id: String,
    pub action: String,
    pub table_name: String,
    pub record_id: String,
    /// JSON image before the mutation. `None` for inserts.
    pub before_state: Option<String>,
    /// JSON image after the mutation. `None` for deletes.
    pub after_state: Option<String>,
    #[ts(as = "String")]
    pub recorded_at: DateTime<Utc>,
}

impl ActionLogEntry {
    pub fn kind(&self) -> Option<ActionKind> {
        self.action.parse().ok()
    }

    pub fn table(&self) -> Option<TrackedTable> {
        self.table_name.parse().ok()
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// A full point-in-time copy of the store file in the backup directory.
///
/// Identity is the file name, which encodes `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Snapshot {
    /// File name, e.g. `snapshot-2026-10-19_14-03-22-123.db`.
    pub name: String,
    #[ts(as = "String")]
    pub path: PathBuf,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn item(total: i64, available: i64) -> InventoryItem {
        InventoryItem {
            id: "item-1".to_string(),
            name: "ThinkPad T14".to_string(),
            category: "Laptops".to_string(),
            total_stock: total,
            available_stock: available,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_stock_consistency() {
        assert!(item(5, 5).stock_is_consistent());
        assert!(item(5, 0).stock_is_consistent());
        assert!(!item(5, 6).stock_is_consistent());
        assert!(!item(5, -1).stock_is_consistent());
        assert_eq!(item(5, 2).on_loan(), 3);
    }

    #[test]
    fn test_can_lend() {
        let laptop = item(5, 2);
        assert!(laptop.can_lend(2));
        assert!(!laptop.can_lend(3));
        assert!(!laptop.can_lend(0));
    }

    #[test]
    fn test_action_kind_parsing() {
        assert_eq!("INSERT".parse::<ActionKind>().unwrap(), ActionKind::Insert);
        assert_eq!("UPDATE".parse::<ActionKind>().unwrap(), ActionKind::Update);
        assert_eq!("DELETE".parse::<ActionKind>().unwrap(), ActionKind::Delete);
        assert!("insert".parse::<ActionKind>().is_err());
        assert!("TRUNCATE".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_tracked_table_round_trip() {
        for table in [TrackedTable::Equipment, TrackedTable::Borrowings] {
            assert_eq!(table.as_str().parse::<TrackedTable>().unwrap(), table);
        }
        assert!("Users".parse::<TrackedTable>().is_err());
    }

    #[test]
    fn test_borrow_status_serde() {
        let json = serde_json::to_string(&BorrowStatus::Returned).unwrap();
        assert_eq!(json, "\"returned\"");
        assert_eq!(BorrowStatus::default(), BorrowStatus::Borrowed);
    }
}
