//! # Row Images and Inverse Planning
//!
//! Every logged mutation stores JSON images of the row it touched. This
//! module owns the shape of those images and turns one action log entry into
//! the single operation that undoes it.
//!
//! ## Entry → Inverse
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  action   table        image used          inverse                      │
//! │  ──────   ──────────   ─────────────────   ─────────────────────────    │
//! │  INSERT   equipment    (none)              DeleteEquipment { id }       │
//! │  INSERT   borrowings   (none)              DeleteBorrowing { id }       │
//! │  UPDATE   equipment    before (patch)      PatchEquipment { id, .. }    │
//! │  UPDATE   borrowings   before (patch)      PatchBorrowing { id, .. }    │
//! │  DELETE   equipment    after ?? before     ReinsertEquipment(row)       │
//! │  DELETE   borrowings   after ?? before     ReinsertBorrowing(row)       │
//! │  other    *            -                   UnsupportedAction            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Patches are typed per table, so an image can only ever name columns the
//! table really has (`deny_unknown_fields`). A field missing from a patch is
//! left untouched; a field present as `null` is written back as NULL.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{ActionKind, ActionLogEntry, BorrowRecord, BorrowStatus, InventoryItem, TrackedTable};

// =============================================================================
// Patches
// =============================================================================

/// Partial image of an `equipment` row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EquipmentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_stock: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_stock: Option<i64>,
}

impl EquipmentPatch {
    /// Image holding only `available_stock`.
    pub fn available(available_stock: i64) -> Self {
        EquipmentPatch {
            available_stock: Some(available_stock),
            ..Default::default()
        }
    }

    /// Image holding both stock columns.
    pub fn stock(total_stock: i64, available_stock: i64) -> Self {
        EquipmentPatch {
            total_stock: Some(total_stock),
            available_stock: Some(available_stock),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.category.is_none()
            && self.total_stock.is_none()
            && self.available_stock.is_none()
    }
}

/// Partial image of a `borrowings` row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BorrowingPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BorrowStatus>,
    /// `Some(None)` writes NULL back; `None` leaves the column alone.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub returned_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
}

impl BorrowingPatch {
    /// Image of the columns a return flips.
    pub fn return_state(status: BorrowStatus, returned_at: Option<DateTime<Utc>>) -> Self {
        BorrowingPatch {
            status: Some(status),
            returned_at: Some(returned_at),
            quantity: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.returned_at.is_none() && self.quantity.is_none()
    }
}

/// Distinguishes a present `null` from an absent key.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// =============================================================================
// Inverse
// =============================================================================

/// The operation that reverses exactly one logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inverse {
    DeleteEquipment { id: String },
    DeleteBorrowing { id: String },
    PatchEquipment { id: String, patch: EquipmentPatch },
    PatchBorrowing { id: String, patch: BorrowingPatch },
    ReinsertEquipment(InventoryItem),
    ReinsertBorrowing(BorrowRecord),
}

impl Inverse {
    /// Plans the inverse of `entry`.
    ///
    /// ## Errors
    /// - `UnsupportedAction` when the action is not INSERT/UPDATE/DELETE
    /// - `UnknownTable` when the table is not tracked
    /// - `MalformedImage` when the needed image is missing or unreadable
    pub fn plan(entry: &ActionLogEntry) -> CoreResult<Inverse> {
        let kind: ActionKind = entry
            .action
            .parse()
            .map_err(|_| CoreError::UnsupportedAction {
                action: entry.action.clone(),
                table: entry.table_name.clone(),
            })?;
        let table: TrackedTable = entry
            .table_name
            .parse()
            .map_err(|_| CoreError::UnknownTable(entry.table_name.clone()))?;
        let id = entry.record_id.clone();

        let inverse = match (kind, table) {
            (ActionKind::Insert, TrackedTable::Equipment) => Inverse::DeleteEquipment { id },
            (ActionKind::Insert, TrackedTable::Borrowings) => Inverse::DeleteBorrowing { id },
            (ActionKind::Update, TrackedTable::Equipment) => Inverse::PatchEquipment {
                patch: patch_image(entry, table)?,
                id,
            },
            (ActionKind::Update, TrackedTable::Borrowings) => Inverse::PatchBorrowing {
                patch: patch_image(entry, table)?,
                id,
            },
            (ActionKind::Delete, TrackedTable::Equipment) => {
                let row: InventoryItem = row_image(entry, table)?;
                ensure_same_id(entry, table, &row.id)?;
                Inverse::ReinsertEquipment(row)
            }
            (ActionKind::Delete, TrackedTable::Borrowings) => {
                let row: BorrowRecord = row_image(entry, table)?;
                ensure_same_id(entry, table, &row.id)?;
                Inverse::ReinsertBorrowing(row)
            }
        };

        Ok(inverse)
    }

    /// The row this inverse writes to.
    pub fn target(&self) -> (TrackedTable, &str) {
        match self {
            Inverse::DeleteEquipment { id } | Inverse::PatchEquipment { id, .. } => {
                (TrackedTable::Equipment, id)
            }
            Inverse::DeleteBorrowing { id } | Inverse::PatchBorrowing { id, .. } => {
                (TrackedTable::Borrowings, id)
            }
            Inverse::ReinsertEquipment(item) => (TrackedTable::Equipment, &item.id),
            Inverse::ReinsertBorrowing(record) => (TrackedTable::Borrowings, &record.id),
        }
    }
}

/// Reads the `before` image of an UPDATE. A missing image means nothing was
/// captured, which restores nothing.
fn patch_image<T>(entry: &ActionLogEntry, table: TrackedTable) -> CoreResult<T>
where
    T: DeserializeOwned + Default,
{
    match entry.before_state.as_deref() {
        None => Ok(T::default()),
        Some(json) => parse_image(entry, table, "before", json),
    }
}

/// Reads the full row image of a DELETE: `after` when present, else `before`.
fn row_image<T>(entry: &ActionLogEntry, table: TrackedTable) -> CoreResult<T>
where
    T: DeserializeOwned,
{
    let (side, json) = match (&entry.after_state, &entry.before_state) {
        (Some(after), _) => ("after", after),
        (None, Some(before)) => ("before", before),
        (None, None) => {
            return Err(CoreError::MalformedImage {
                table: table.to_string(),
                record_id: entry.record_id.clone(),
                side: "row",
                reason: "delete entry carries no row image".to_string(),
            })
        }
    };
    parse_image(entry, table, side, json)
}

fn parse_image<T>(
    entry: &ActionLogEntry,
    table: TrackedTable,
    side: &'static str,
    json: &str,
) -> CoreResult<T>
where
    T: DeserializeOwned,
{
    serde_json::from_str(json).map_err(|e| CoreError::MalformedImage {
        table: table.to_string(),
        record_id: entry.record_id.clone(),
        side,
        reason: e.to_string(),
    })
}

fn ensure_same_id(entry: &ActionLogEntry, table: TrackedTable, image_id: &str) -> CoreResult<()> {
    if image_id != entry.record_id {
        return Err(CoreError::MalformedImage {
            table: table.to_string(),
            record_id: entry.record_id.clone(),
            side: "row",
            reason: format!("image belongs to {}", image_id),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(action: &str, table: &str, before: Option<&str>, after: Option<&str>) -> ActionLogEntry {
        ActionLogEntry {
            id: 1,
            batch_id: "batch-1".to_string(),
            action: action.to_string(),
            table_name: table.to_string(),
            record_id: "rec-1".to_string(),
            before_state: before.map(str::to_string),
            after_state: after.map(str::to_string),
            recorded_at: Utc::now(),
        }
    }

    fn laptop() -> InventoryItem {
        InventoryItem {
            id: "rec-1".to_string(),
            name: "ThinkPad T14".to_string(),
            category: "Laptops".to_string(),
            total_stock: 4,
            available_stock: 4,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_inverts_to_delete() {
        let inverse = Inverse::plan(&entry("INSERT", "borrowings", None, Some("{}"))).unwrap();
        assert_eq!(
            inverse,
            Inverse::DeleteBorrowing {
                id: "rec-1".to_string()
            }
        );
    }

    #[test]
    fn test_update_restores_before_fields_only() {
        let before = serde_json::to_string(&EquipmentPatch::available(7)).unwrap();
        let inverse =
            Inverse::plan(&entry("UPDATE", "equipment", Some(&before), Some("{}"))).unwrap();

        match inverse {
            Inverse::PatchEquipment { id, patch } => {
                assert_eq!(id, "rec-1");
                assert_eq!(patch.available_stock, Some(7));
                assert!(patch.total_stock.is_none());
                assert!(patch.name.is_none());
            }
            other => panic!("unexpected inverse: {:?}", other),
        }
    }

    #[test]
    fn test_borrowing_patch_distinguishes_null_from_absent() {
        let patch: BorrowingPatch =
            serde_json::from_str(r#"{"status":"borrowed","returned_at":null}"#).unwrap();
        assert_eq!(patch.status, Some(BorrowStatus::Borrowed));
        assert_eq!(patch.returned_at, Some(None));

        let patch: BorrowingPatch = serde_json::from_str(r#"{"quantity":2}"#).unwrap();
        assert_eq!(patch.returned_at, None);
        assert_eq!(patch.quantity, Some(2));
    }

    #[test]
    fn test_return_state_serializes_null_timestamp() {
        let patch = BorrowingPatch::return_state(BorrowStatus::Borrowed, None);
        let json = serde_json::to_string(&patch).unwrap();
        assert_eq!(json, r#"{"status":"borrowed","returned_at":null}"#);
    }

    #[test]
    fn test_update_image_rejects_unknown_columns() {
        let err = Inverse::plan(&entry(
            "UPDATE",
            "equipment",
            Some(r#"{"AvailableStock":3}"#),
            None,
        ))
        .unwrap_err();
        assert!(matches!(err, CoreError::MalformedImage { side: "before", .. }));
    }

    #[test]
    fn test_update_without_before_is_empty_patch() {
        let inverse = Inverse::plan(&entry("UPDATE", "equipment", None, Some("{}"))).unwrap();
        match inverse {
            Inverse::PatchEquipment { patch, .. } => assert!(patch.is_empty()),
            other => panic!("unexpected inverse: {:?}", other),
        }
    }

    #[test]
    fn test_delete_reinserts_from_after_or_before() {
        let row = serde_json::to_string(&laptop()).unwrap();

        let from_before = Inverse::plan(&entry("DELETE", "equipment", Some(&row), None)).unwrap();
        let from_after = Inverse::plan(&entry("DELETE", "equipment", None, Some(&row))).unwrap();

        assert_eq!(from_before, from_after);
        assert!(matches!(from_after, Inverse::ReinsertEquipment(ref item) if item.total_stock == 4));
    }

    #[test]
    fn test_delete_without_image_is_malformed() {
        let err = Inverse::plan(&entry("DELETE", "equipment", None, None)).unwrap_err();
        assert!(matches!(err, CoreError::MalformedImage { .. }));
    }

    #[test]
    fn test_delete_image_must_match_record() {
        let mut other = laptop();
        other.id = "rec-2".to_string();
        let row = serde_json::to_string(&other).unwrap();

        let err = Inverse::plan(&entry("DELETE", "equipment", Some(&row), None)).unwrap_err();
        assert!(matches!(err, CoreError::MalformedImage { .. }));
    }

    #[test]
    fn test_unknown_action_is_unsupported() {
        let err = Inverse::plan(&entry("TRUNCATE", "equipment", None, None)).unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedAction { .. }));
    }

    #[test]
    fn test_unknown_table() {
        let err = Inverse::plan(&entry("INSERT", "Users", None, None)).unwrap_err();
        assert!(matches!(err, CoreError::UnknownTable(ref t) if t == "Users"));
    }

    #[test]
    fn test_target() {
        let inverse = Inverse::ReinsertEquipment(laptop());
        assert_eq!(inverse.target(), (TrackedTable::Equipment, "rec-1"));
    }
}
