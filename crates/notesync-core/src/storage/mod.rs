//! Storage layer
//!
//! SQLite is the local source of truth. The remote service is reconciled
//! against it by the sync engine.
//!
//! - `database`: entry table, sync snapshots, conflicts and ledger access
//! - `export`: atomic JSON export/import files

pub mod database;
pub mod error;
pub mod export;
pub mod schema;

use chrono::{DateTime, Utc};

pub use database::Database;
pub use error::{StorageError, StorageResult};
pub use export::{atomic_write, read_export, write_export, ExportFile};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};

/// Convert stored epoch milliseconds back to a timestamp
pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}
