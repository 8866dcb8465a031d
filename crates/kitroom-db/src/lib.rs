//! # kitroom-db: Store Layer for the Kitroom Ledger
//!
//! Everything that touches the store file or the backup directory: the
//! ledger tables, the action log, undo and snapshots.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kitroom Data Flow                                │
//! │                                                                         │
//! │  Routing layer: borrow / return / undo / snapshot / restore            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  kitroom-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   Store ── RwLock<Option<Database>> ── SnapshotManager          │   │
//! │  │     │                                                           │   │
//! │  │     ├── Ledger      borrow, return, add/restock/remove          │   │
//! │  │     ├── UndoEngine  newest batch → inverses                     │   │
//! │  │     │      │                                                    │   │
//! │  │     │      ▼                                                    │   │
//! │  │     │   UnitOfWork (one transaction + its log entries)          │   │
//! │  │     │      │                                                    │   │
//! │  │     └── Repositories (equipment, borrowings, action_log)        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite store file (WAL)        backups/snapshot-*.db                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - The facade the routing layer calls
//! - [`ledger`] - Borrow / return / equipment administration
//! - [`undo`] - Single-step global undo
//! - [`snapshot`] - Snapshot files and their names
//! - [`transaction`] - Unit of work
//! - [`repository`] - SQL per table
//! - [`pool`], [`migrations`], [`config`], [`error`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kitroom_db::{KitroomConfig, Store};
//!
//! let config = KitroomConfig::load(Some(Path::new("kitroom.toml")))?;
//! let store = Store::open(&config).await?;
//!
//! let record = store.borrow(&item_id, 1, "user-42").await?;
//! store.undo_last().await?;
//! let snapshot = store.create_snapshot().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod ledger;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod snapshot;
pub mod store;
pub mod transaction;
pub mod undo;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::KitroomConfig;
pub use error::{DbError, DbResult};
pub use ledger::Ledger;
pub use pool::{Database, DbConfig};
pub use snapshot::SnapshotManager;
pub use store::Store;
pub use transaction::UnitOfWork;
pub use undo::{UndoEngine, UndoOutcome};

pub use repository::action_log::ActionLogRepository;
pub use repository::borrowing::BorrowingRepository;
pub use repository::equipment::EquipmentRepository;
