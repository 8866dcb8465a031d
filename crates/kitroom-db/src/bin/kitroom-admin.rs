//! # Kitroom Admin
//!
//! Operator tool for a Kitroom store: seed it, move equipment, undo,
//! take and restore snapshots.
//!
//! ## Usage
//! ```bash
//! # Seed a development store
//! cargo run -p kitroom-db --bin kitroom-admin -- --db ./kitroom_dev.db seed
//!
//! # Lend and return
//! cargo run -p kitroom-db --bin kitroom-admin -- borrow <ITEM_ID> 2 user-17
//! cargo run -p kitroom-db --bin kitroom-admin -- return <BORROWING_ID>
//!
//! # Undo the last operation, inspect the log
//! cargo run -p kitroom-db --bin kitroom-admin -- undo
//! cargo run -p kitroom-db --bin kitroom-admin -- audit 20
//! cargo run -p kitroom-db --bin kitroom-admin -- undone
//!
//! # Snapshots
//! cargo run -p kitroom-db --bin kitroom-admin -- snapshot
//! cargo run -p kitroom-db --bin kitroom-admin -- snapshots
//! cargo run -p kitroom-db --bin kitroom-admin -- restore snapshot-2026-10-19_14-03-22-123.db
//! ```
//!
//! Logging goes to stderr and follows `RUST_LOG`.

use kitroom_core::{ActionLogEntry, ValidationError};
use kitroom_db::{DbError, KitroomConfig, Store};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Equipment created by `seed`: (name, category, total stock).
const SEED_ITEMS: &[(&str, &str, i64)] = &[
    ("ThinkPad T14", "Laptops", 6),
    ("MacBook Air 13", "Laptops", 4),
    ("Dell 27\" Monitor", "Monitors", 8),
    ("USB-C Dock", "Docks", 10),
    ("HDMI Cable 2m", "Cables", 25),
    ("USB-C to USB-A Adapter", "Cables", 30),
    ("Logitech Webcam C920", "Peripherals", 5),
    ("Jabra Evolve2 Headset", "Peripherals", 7),
    ("Wireless Presenter", "AV", 3),
    ("Portable Projector", "AV", 2),
];

fn print_usage() {
    println!("Kitroom Admin");
    println!();
    println!("Usage: kitroom-admin [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("Commands:");
    println!("  seed                              Add demo equipment to an empty store");
    println!("  items [CATEGORY]                  List equipment and stock");
    println!("  borrow <ITEM_ID> <QTY> <USER_ID>  Lend equipment");
    println!("  return <BORROWING_ID>             Return a borrow record");
    println!("  undo                              Reverse the last logged operation");
    println!("  audit [LIMIT]                     Show the newest action log entries (default 20)");
    println!("  undone [LIMIT]                    Show entries reversed by undo (default 20)");
    println!("  snapshot                          Copy the store into the backup directory");
    println!("  snapshots                         List snapshots, newest first");
    println!("  restore <NAME>                    Replace the store with a snapshot");
    println!();
    println!("Options:");
    println!("  -c, --config <PATH>   TOML config file");
    println!("  -d, --db <PATH>       Store file path (overrides config)");
    println!("  -h, --help            Show this help message");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kitroom=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut db_path: Option<PathBuf> = None;
    let mut command: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => command.push(other.to_string()),
        }
        i += 1;
    }

    let Some((name, rest)) = command.split_first() else {
        print_usage();
        return Ok(());
    };

    let mut config = KitroomConfig::load(config_path.as_deref())?;
    if let Some(path) = db_path {
        config.database.path = path;
    }

    let store = Store::open(&config).await?;
    let result = run(&store, name, rest).await;
    store.close().await;

    if let Err(e) = result {
        if e.is_fatal() {
            eprintln!("✗ FATAL: {}", e);
        } else {
            eprintln!("✗ {}", e);
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(store: &Store, command: &str, args: &[String]) -> Result<(), DbError> {
    match (command, args) {
        ("seed", []) => seed(store).await,

        ("items", rest) if rest.len() <= 1 => {
            let items = store.list_items(rest.first().map(String::as_str)).await?;
            println!("{:<36}  {:<26}  {:<12}  {:>5}  {:>5}", "ID", "NAME", "CATEGORY", "AVAIL", "TOTAL");
            for item in items {
                println!(
                    "{:<36}  {:<26}  {:<12}  {:>5}  {:>5}",
                    item.id, item.name, item.category, item.available_stock, item.total_stock
                );
            }
            Ok(())
        }

        ("borrow", [item_id, quantity, borrower_id]) => {
            let quantity: i64 = quantity.parse().map_err(|_| ValidationError::InvalidFormat {
                field: "quantity".to_string(),
                reason: format!("'{}' is not a whole number", quantity),
            })?;
            let record = store.borrow(item_id, quantity, borrower_id).await?;
            println!("✓ Borrowed {} x {} → {}", record.quantity, record.equipment_id, record.borrower_id);
            println!("  Borrowing: {}", record.id);
            Ok(())
        }

        ("return", [borrowing_id]) => {
            let record = store.return_borrowing(borrowing_id).await?;
            println!("✓ Returned {} x {}", record.quantity, record.equipment_id);
            Ok(())
        }

        ("undo", []) => {
            let outcome = store.undo_last().await?;
            println!("✓ Undid batch {}", outcome.batch_id);
            for entry in outcome.reversed {
                println!("  #{:<6} {:<6} {:<10} {}", entry.id, entry.action, entry.table_name, entry.record_id);
            }
            Ok(())
        }

        ("audit", rest) if rest.len() <= 1 => {
            for entry in store.recent_actions(parse_limit(rest)).await? {
                print_entry(&entry);
            }
            Ok(())
        }

        ("undone", rest) if rest.len() <= 1 => {
            for entry in store.undone_actions(parse_limit(rest)).await? {
                print_entry(&entry);
            }
            Ok(())
        }

        ("snapshot", []) => {
            let snapshot = store.create_snapshot().await?;
            println!("✓ Snapshot {} ({} bytes)", snapshot.name, snapshot.size_bytes);
            println!("  {}", snapshot.path.display());
            Ok(())
        }

        ("snapshots", []) => {
            let snapshots = store.list_snapshots().await?;
            if snapshots.is_empty() {
                println!("No snapshots in {}", store.backup_dir().display());
            }
            for snapshot in snapshots {
                println!("{}  {:>10} bytes", snapshot.name, snapshot.size_bytes);
            }
            Ok(())
        }

        ("restore", [name]) => {
            store.restore(name).await?;
            println!("✓ Store restored from {}", name);
            Ok(())
        }

        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn parse_limit(args: &[String]) -> i64 {
    args.first().and_then(|limit| limit.parse().ok()).unwrap_or(20)
}

fn print_entry(entry: &ActionLogEntry) {
    println!(
        "#{:<6} {}  {:<6} {:<10} {}  batch {}",
        entry.id,
        entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
        entry.action,
        entry.table_name,
        entry.record_id,
        entry.batch_id
    );
    if let Some(before) = &entry.before_state {
        println!("         before: {}", before);
    }
    if let Some(after) = &entry.after_state {
        println!("         after:  {}", after);
    }
}

async fn seed(store: &Store) -> Result<(), DbError> {
    println!("🌱 Kitroom Seed");
    println!("===============");
    println!("Database: {}", store.database_path().display());
    println!();

    let existing = store.list_items(None).await?;
    if !existing.is_empty() {
        println!("⚠ Store already has {} items", existing.len());
        println!("  Skipping seed to avoid duplicates.");
        return Ok(());
    }

    for (name, category, total_stock) in SEED_ITEMS {
        let item = store.add_item(name, category, *total_stock).await?;
        println!("  + {:<26} {:<12} x{}", item.name, item.category, item.total_stock);
    }

    println!();
    println!("✓ Seeded {} items", SEED_ITEMS.len());
    Ok(())
}
