//! # Repository Module
//!
//! SQL for the three store tables, kept in one place.
//!
//! ## Two Kinds of Access
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Access Paths                              │
//! │                                                                         │
//! │  Reads (dashboard, audit, CLI)                                         │
//! │       │                                                                 │
//! │       │  db.equipment().list(None)                                     │
//! │       ▼                                                                 │
//! │  Repository methods on &self  → run on the pool, autocommit            │
//! │                                                                         │
//! │  Writes (ledger, undo)                                                 │
//! │       │                                                                 │
//! │       │  equipment::take_stock(uow.conn(), id, qty)                    │
//! │       ▼                                                                 │
//! │  Free functions on &mut SqliteConnection → run inside a UnitOfWork     │
//! │                                                                         │
//! │  No write path exists outside a UnitOfWork, so every tracked mutation  │
//! │  commits together with its action log entry.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`EquipmentRepository`](equipment::EquipmentRepository) - Items and stock levels
//! - [`BorrowingRepository`](borrowing::BorrowingRepository) - Borrow records
//! - [`ActionLogRepository`](action_log::ActionLogRepository) - Audit trail

pub mod action_log;
pub mod borrowing;
pub mod equipment;
