//! NoteSync Core Library
//!
//! This crate provides the core functionality for NoteSync, an offline-first
//! notes store that keeps a local SQLite database consistent with a remote
//! notes service.
//!
//! # Architecture
//!
//! - **SQLite**: Source of truth on the device; every local write is tagged
//!   pending until the remote acknowledges it
//! - **Sync engine**: Pushes pending entries, pulls remote changes and
//!   merges both sides with a three-way resolver
//! - **Observer bus**: Topic-based notifications for front ends
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::open()?;
//!
//! // Add an entry
//! let mut entry = Entry::new("Groceries");
//! entry.set_description("milk, eggs");
//! store.add_entry(&mut entry)?;
//!
//! // Sync it
//! let orchestrator = store.orchestrator()?;
//! orchestrator.run_cycle(SyncTrigger::Manual).await;
//! ```
//!
//! # Modules
//!
//! - `store`: Unified storage interface (main entry point)
//! - `models`: Entries, synced content and snapshots
//! - `query`: Predicate builder for entry queries
//! - `ledger`: Sync history records
//! - `observer`: Notification bus
//! - `storage`: SQLite schema, database and export files
//! - `sync`: Remote client, resolver, orchestrator and scheduler
//! - `config`: Application configuration

pub mod config;
pub mod ledger;
pub mod models;
pub mod observer;
pub mod query;
pub mod storage;
pub mod store;
pub mod sync;

pub use config::Config;
pub use ledger::{SyncAction, SyncRecord, SyncStatus};
pub use models::{ConflictRecord, ContentField, Entry, EntryContent, Snapshot};
pub use observer::{Notification, Observer, ObserverBus, Payload, ResultCode, Topic};
pub use query::{EntryFilter, EntryQuery, QueryError};
pub use storage::{Database, StorageError};
pub use store::{ConflictChoice, Store};
pub use sync::{CycleOutcome, CycleReport, Orchestrator, SyncPhase, SyncTrigger};
