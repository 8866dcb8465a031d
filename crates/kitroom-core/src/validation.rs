//! # Validation Module
//!
//! Input validation for ledger operations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Routing layer (external)                                     │
//! │  └── Field presence / type checks                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  └── Business rules checked before a transaction opens                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (0 <= available_stock <= total_stock)                       │
//! │  └── Foreign key borrowings → equipment                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::MAX_TOTAL_STOCK;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates an entity identifier (item id, borrowing id, borrower id).
///
/// Ids are matched byte for byte, so surrounding whitespace is rejected
/// rather than trimmed.
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if id.trim() != id {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must not start or end with whitespace".to_string(),
        });
    }

    if id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 64,
        });
    }

    Ok(())
}

/// Validates a borrow quantity.
///
/// Only the sign is checked here; whether the units exist is the ledger's
/// call, so an oversized request fails as insufficient stock.
///
/// ## Example
/// ```rust
/// use kitroom_core::validation::validate_quantity;
///
/// assert!(validate_quantity(3).is_ok());
/// assert!(validate_quantity(0).is_err());
/// ```
pub fn validate_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    Ok(())
}

/// Validates the initial stock of a new item.
pub fn validate_total_stock(total_stock: i64) -> ValidationResult<()> {
    if !(0..=MAX_TOTAL_STOCK).contains(&total_stock) {
        return Err(ValidationError::OutOfRange {
            field: "total_stock".to_string(),
            min: 0,
            max: MAX_TOTAL_STOCK,
        });
    }

    Ok(())
}

/// Validates a restock delta. Zero is a no-op and rejected.
pub fn validate_stock_delta(delta: i64) -> ValidationResult<()> {
    if delta == 0 || delta.abs() > MAX_TOTAL_STOCK {
        return Err(ValidationError::OutOfRange {
            field: "delta".to_string(),
            min: -MAX_TOTAL_STOCK,
            max: MAX_TOTAL_STOCK,
        });
    }

    Ok(())
}

/// Validates a display name or category.
pub fn validate_label(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > 200 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates a snapshot name supplied by an operator.
///
/// Names are bare file names; anything that could walk out of the backup
/// directory is rejected.
///
/// ## Example
/// ```rust
/// use kitroom_core::validation::validate_snapshot_name;
///
/// assert!(validate_snapshot_name("snapshot-2026-10-19_14-03-22-123.db").is_ok());
/// assert!(validate_snapshot_name("../kitroom.db").is_err());
/// ```
pub fn validate_snapshot_name(name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "snapshot".to_string(),
        });
    }

    if name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return Err(ValidationError::InvalidFormat {
            field: "snapshot".to_string(),
            reason: "must be a bare file name".to_string(),
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

    #[test]
    fn test_validate_id() {
        assert!(validate_id("item_id", "9b1f").is_ok());
        assert!(validate_id("item_id", "   ").is_err());
        assert!(validate_id("item_id", &"x".repeat(65)).is_err());
        assert!(matches!(
            validate_id("item_id", " 9b1f "),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(5_000).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-2).is_err());
    }

    #[test]
    fn test_validate_stock() {
        assert!(validate_total_stock(0).is_ok());
        assert!(validate_total_stock(-1).is_err());
        assert!(validate_stock_delta(-3).is_ok());
        assert!(validate_stock_delta(0).is_err());
    }

    #[test]
    fn test_validate_label() {
        assert!(validate_label("name", "USB-C dock").is_ok());
        assert!(validate_label("name", "").is_err());
        assert!(validate_label("category", &"a".repeat(201)).is_err());
    }

    #[test]
    fn test_validate_snapshot_name() {
        assert!(validate_snapshot_name("snapshot-2026-01-01_00-00-00-000.db").is_ok());
        assert!(validate_snapshot_name("").is_err());
        assert!(validate_snapshot_name("a/b.db").is_err());
        assert!(validate_snapshot_name("..").is_err());
    }
}
