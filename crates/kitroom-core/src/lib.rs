//! # kitroom-core: Pure Domain Logic for the Kitroom Ledger
//!
//! Types and rules for the helpdesk equipment ledger, with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kitroom Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Routing / session layer (external)                 │   │
//! │  │    borrow, return, undo, snapshot, restore                      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    kitroom-db (Store)                           │   │
//! │  │   ledger • action log • unit of work • undo • snapshots         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ kitroom-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                  │   │
//! │  │   │   types   │  │  inverse  │  │ validation│                  │   │
//! │  │   │   Item    │  │  patches  │  │   rules   │                  │   │
//! │  │   │  Borrow   │  │  planner  │  │  checks   │                  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO FILESYSTEM                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Entities (InventoryItem, BorrowRecord, ActionLogEntry, Snapshot)
//! - [`inverse`] - Row-image patches and the undo planner
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation for ledger operations

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod inverse;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use inverse::{BorrowingPatch, EquipmentPatch, Inverse};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Largest total stock an item may carry.
pub const MAX_TOTAL_STOCK: i64 = 1_000_000;
