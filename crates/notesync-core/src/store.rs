//! Unified storage interface
//!
//! The `Store` wraps the SQLite database and the observer bus. Content
//! edits and deletes mark the entry pending so the next sync cycle pushes
//! it. Every mutation publishes a notification on the matching topic.
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::open()?;
//!
//! let mut entry = Entry::new("Groceries");
//! store.add_entry(&mut entry)?;
//!
//! let filter = EntryFilter { text: Some("milk".into()), ..Default::default() };
//! let entries = store.list(&filter)?;
//!
//! let orchestrator = store.orchestrator()?;
//! orchestrator.run_cycle(SyncTrigger::Manual).await;
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::ledger::SyncRecord;
use crate::models::{is_valid_color, now_millis, ConflictRecord, Entry, Snapshot};
use crate::observer::{ObserverBus, Payload, ResultCode, Topic};
use crate::query::{EntryFilter, EntryQuery};
use crate::storage::{read_export, write_export, Database};
use crate::sync::{Connectivity, Orchestrator, RemoteApi, RestClient, SyncOptions, TcpProbe};

/// Marker carried in the title of generated mock entries
pub const MOCK_MARKER: &str = "[mock]";

const MOCK_COLORS: [&str; 5] = ["#FFFFFF", "#FFF475", "#CCFF90", "#A7FFEB", "#F28B82"];

/// How the user settles a stored conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Keep the local content; it is pushed on the next cycle
    KeepLocal,
    /// Take the remote content
    KeepRemote,
}

/// Unified storage interface for NoteSync
pub struct Store {
    db: Arc<Mutex<Database>>,
    bus: Arc<ObserverBus>,
    config: Config,
    /// Where `set_user` persists the config, if anywhere
    config_path: Option<PathBuf>,
}

impl Store {
    /// Open the store with the configuration from the default location
    pub fn open() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        let mut store = Self::open_with_config(config)?;
        store.config_path = Some(Config::config_file_path());
        Ok(store)
    }

    /// Open the store with a specific configuration
    pub fn open_with_config(config: Config) -> Result<Self> {
        let db = Database::open(&config).context("Failed to open database")?;
        info!(path = ?config.sqlite_path(), "Opened store");
        Ok(Self::from_parts(db, config))
    }

    /// Open a store backed by an in-memory database (for testing)
    pub fn open_in_memory(config: Config) -> Result<Self> {
        let db = Database::open_in_memory().context("Failed to open in-memory database")?;
        Ok(Self::from_parts(db, config))
    }

    fn from_parts(db: Database, config: Config) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            bus: Arc::new(ObserverBus::new()),
            config,
            config_path: None,
        }
    }

    /// Persist config changes made through the store to `path`
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The bus every store and sync notification goes through
    pub fn bus(&self) -> &Arc<ObserverBus> {
        &self.bus
    }

    /// Shared handle to the database, as used by the orchestrator
    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.db.clone()
    }

    // ==================== Entry Operations ====================

    /// Add a new entry at the end of the manual order
    pub fn add_entry(&self, entry: &mut Entry) -> Result<()> {
        if !is_valid_color(&entry.color) {
            bail!("Invalid color {:?}, expected #RRGGBB", entry.color);
        }

        {
            let db = self.lock()?;
            entry.position = db.max_position().context("Failed to read positions")? + 1;
            entry.pending = true;
            db.insert_entry(entry).context("Failed to add entry")?;
        }

        debug!(id = %entry.id, "Added entry");
        self.bus
            .notify(Topic::Entry, ResultCode::EntryAdded, Payload::Entry { id: entry.id });
        Ok(())
    }

    /// Write an entry's title, description and color
    ///
    /// Only the content columns are written, so a copy read before a sync
    /// cycle can't undo the sync state, position or a delete. Fails if the
    /// entry is missing or deleted.
    pub fn update_entry(&self, entry: &Entry) -> Result<()> {
        if !is_valid_color(&entry.color) {
            bail!("Invalid color {:?}, expected #RRGGBB", entry.color);
        }

        self.lock()?
            .update_content(entry.id, &entry.content())
            .context("Failed to update entry")?;

        self.bus
            .notify(Topic::Entry, ResultCode::EntryUpdated, Payload::Entry { id: entry.id });
        Ok(())
    }

    /// Apply `edit` to the stored entry and write its content back
    ///
    /// The entry is read and written under one lock, so fields the closure
    /// doesn't touch keep whatever the last sync left in them.
    pub fn edit_entry<F>(&self, id: Uuid, edit: F) -> Result<Entry>
    where
        F: FnOnce(&mut Entry),
    {
        let entry = {
            let db = self.lock()?;
            let mut entry = db
                .get_entry(id)
                .context("Failed to get entry")?
                .filter(|e| !e.is_deleted())
                .ok_or_else(|| anyhow!("Entry not found: {}", id))?;

            edit(&mut entry);
            if !is_valid_color(&entry.color) {
                bail!("Invalid color {:?}, expected #RRGGBB", entry.color);
            }
            db.update_content(id, &entry.content())
                .context("Failed to update entry")?;
            entry.pending = true;
            entry
        };

        self.bus
            .notify(Topic::Entry, ResultCode::EntryUpdated, Payload::Entry { id });
        Ok(entry)
    }

    /// Delete an entry
    ///
    /// An entry that never reached the remote is removed right away. Others
    /// are soft-deleted until the next cycle pushes the delete. Returns
    /// false if there was nothing to delete.
    pub fn delete_entry(&self, id: Uuid) -> Result<bool> {
        {
            let db = self.lock()?;
            let Some(entry) = db.get_entry(id).context("Failed to get entry")? else {
                return Ok(false);
            };
            if entry.is_deleted() {
                return Ok(false);
            }

            if entry.is_synced_once() {
                // A user delete settles any open conflict for the entry
                db.delete_conflict(id).context("Failed to clear conflict")?;
                db.soft_delete(id, now_millis())
                    .context("Failed to delete entry")?;
            } else {
                db.purge_entry(id).context("Failed to delete entry")?;
            }
        }

        debug!(%id, "Deleted entry");
        self.bus
            .notify(Topic::Entry, ResultCode::EntryDeleted, Payload::Entry { id });
        Ok(true)
    }

    /// Get a visible entry by ID
    pub fn get_entry(&self, id: Uuid) -> Result<Option<Entry>> {
        let entry = self.lock()?.get_entry(id).context("Failed to get entry")?;
        Ok(entry.filter(|e| !e.is_deleted()))
    }

    /// Run a query against visible entries
    pub fn query(&self, query: &EntryQuery) -> Result<Vec<Entry>> {
        self.lock()?
            .query_entries(query)
            .context("Failed to query entries")
    }

    /// List visible entries matching a user filter
    ///
    /// An invalid filter is published as `FilterRejected` and returned as an
    /// error.
    pub fn list(&self, filter: &EntryFilter) -> Result<Vec<Entry>> {
        let query = match filter.to_query() {
            Ok(query) => query,
            Err(e) => {
                self.bus.notify(
                    Topic::ListFilter,
                    ResultCode::FilterRejected,
                    Payload::message(e.to_string()),
                );
                return Err(anyhow!(e).context("Invalid filter"));
            }
        };

        let entries = self.query(&query)?;
        if !filter.is_empty() {
            self.bus.notify(
                Topic::ListFilter,
                ResultCode::FilterApplied,
                Payload::Count {
                    amount: entries.len(),
                },
            );
        }
        Ok(entries)
    }

    /// Record that an entry was opened
    pub fn mark_viewed(&self, id: Uuid) -> Result<()> {
        self.lock()?
            .set_viewed(id, now_millis())
            .with_context(|| format!("Failed to mark entry {} viewed", id))?;

        self.bus
            .notify(Topic::Entry, ResultCode::EntryViewed, Payload::Entry { id });
        Ok(())
    }

    /// Move an entry in the manual order
    ///
    /// Position is local only and does not make the entry pending.
    pub fn move_entry(&self, id: Uuid, position: i64) -> Result<()> {
        self.lock()?
            .set_position(id, position)
            .with_context(|| format!("Failed to move entry {}", id))?;

        self.bus
            .notify(Topic::Entry, ResultCode::EntryMoved, Payload::Entry { id });
        Ok(())
    }

    /// Change an entry's color
    ///
    /// Returns false, and publishes `ColorRejected`, when `color` is not a
    /// `#RRGGBB` string.
    pub fn set_color(&self, id: Uuid, color: &str) -> Result<bool> {
        let payload = Payload::Color {
            id,
            color: color.to_string(),
        };

        if !is_valid_color(color) {
            warn!(%id, color, "Rejected color");
            self.bus
                .notify(Topic::ColorPicker, ResultCode::ColorRejected, payload);
            return Ok(false);
        }

        self.edit_entry(id, |entry| entry.set_color(color))
            .context("Failed to update color")?;

        self.bus
            .notify(Topic::ColorPicker, ResultCode::ColorSelected, payload);
        Ok(true)
    }

    // ==================== Mock Entries ====================

    /// Add `count` generated entries
    pub fn generate_mock_entries(&self, count: usize) -> Result<Vec<Entry>> {
        let mut entries = Vec::with_capacity(count);
        {
            let db = self.lock()?;
            let mut position = db.max_position().context("Failed to read positions")?;
            for i in 0..count {
                position += 1;
                let mut entry = Entry::new(format!("{} Entry {}", MOCK_MARKER, i + 1));
                entry.description = format!("Generated entry number {}", i + 1);
                entry.color = MOCK_COLORS[i % MOCK_COLORS.len()].to_string();
                entry.position = position;
                db.insert_entry(&entry)
                    .context("Failed to add mock entry")?;
                entries.push(entry);
            }
        }

        info!(count, "Generated mock entries");
        self.bus.notify(
            Topic::EntriesMock,
            ResultCode::MockGenerated,
            Payload::Count { amount: count },
        );
        Ok(entries)
    }

    /// Delete every generated entry
    pub fn delete_mock_entries(&self) -> Result<usize> {
        let query = EntryQuery::new()
            .and("title", "LIKE", [MOCK_MARKER])
            .context("Failed to build mock query")?;
        let mocks = self.query(&query)?;

        let mut deleted = 0;
        for entry in mocks {
            if self.delete_entry(entry.id)? {
                deleted += 1;
            }
        }

        info!(deleted, "Cleared mock entries");
        self.bus.notify(
            Topic::EntriesMock,
            ResultCode::MockCleared,
            Payload::Count { amount: deleted },
        );
        Ok(deleted)
    }

    // ==================== Export / Import ====================

    /// Export visible entries to a JSON file
    pub fn export_json(&self, path: &Path) -> Result<usize> {
        let result = self
            .query(&EntryQuery::new())
            .and_then(|entries| write_export(path, entries));

        match result {
            Ok(count) => {
                info!(count, ?path, "Exported entries");
                self.bus.notify(
                    Topic::FileExport,
                    ResultCode::ExportSucceeded,
                    Payload::Count { amount: count },
                );
                Ok(count)
            }
            Err(e) => {
                self.bus.notify(
                    Topic::FileExport,
                    ResultCode::ExportFailed,
                    Payload::message(format!("{:#}", e)),
                );
                Err(e)
            }
        }
    }

    /// Import entries from a JSON export
    ///
    /// Imported entries get fresh IDs and are pending, so they are pushed as
    /// new notes on the next cycle.
    pub fn import_json(&self, path: &Path) -> Result<usize> {
        match self.import_entries(path) {
            Ok(count) => {
                info!(count, ?path, "Imported entries");
                self.bus.notify(
                    Topic::FileImport,
                    ResultCode::ImportSucceeded,
                    Payload::Count { amount: count },
                );
                Ok(count)
            }
            Err(e) => {
                self.bus.notify(
                    Topic::FileImport,
                    ResultCode::ImportFailed,
                    Payload::message(format!("{:#}", e)),
                );
                Err(e)
            }
        }
    }

    fn import_entries(&self, path: &Path) -> Result<usize> {
        let file = read_export(path)?;
        let count = file.entries.len();

        let mut db = self.lock()?;
        let start = db.max_position().context("Failed to read positions")?;
        db.transaction(|tx| {
            for (i, mut entry) in file.entries.into_iter().enumerate() {
                entry.id = Uuid::new_v4();
                entry.sync_id = None;
                entry.pending = true;
                entry.deleted_at = None;
                entry.position = start + 1 + i as i64;
                Database::insert_entry_in(tx, &entry)?;
            }
            Ok(())
        })
        .context("Failed to import entries")?;

        Ok(count)
    }

    // ==================== Users ====================

    /// Switch to another remote user
    ///
    /// Sync state belongs to the previous user, so snapshots, conflicts and
    /// remote IDs are dropped and every entry becomes pending again.
    pub fn set_user(&mut self, user_id: Option<String>) -> Result<()> {
        if self.config.user_id == user_id {
            return Ok(());
        }

        self.lock()?
            .reset_sync_state()
            .context("Failed to reset sync state")?;

        self.config.user_id = user_id.clone();
        if let Some(path) = &self.config_path {
            self.config
                .save_to_path(path)
                .context("Failed to save configuration")?;
        }

        info!(user = ?user_id, "Changed user");
        self.bus
            .notify(Topic::Users, ResultCode::UserChanged, Payload::User { user_id });
        Ok(())
    }

    // ==================== Sync State ====================

    /// Count visible entries
    pub fn entry_count(&self) -> Result<i64> {
        self.lock()?
            .entry_count()
            .context("Failed to count entries")
    }

    /// Count entries waiting to be pushed
    pub fn pending_count(&self) -> Result<i64> {
        self.lock()?
            .pending_count()
            .context("Failed to count pending entries")
    }

    /// Ledger records in append order, limited to the newest `limit`
    pub fn sync_history(&self, limit: Option<usize>) -> Result<Vec<SyncRecord>> {
        self.lock()?
            .sync_records(limit)
            .context("Failed to read sync history")
    }

    /// Most recent ledger record
    pub fn last_sync(&self) -> Result<Option<SyncRecord>> {
        self.lock()?
            .last_record()
            .context("Failed to read sync history")
    }

    /// Drop every ledger record
    pub fn clear_history(&self) -> Result<usize> {
        self.lock()?
            .clear_history()
            .context("Failed to clear sync history")
    }

    /// Open conflicts
    pub fn conflicts(&self) -> Result<Vec<ConflictRecord>> {
        self.lock()?
            .conflicts()
            .context("Failed to read conflicts")
    }

    /// Settle a stored conflict
    ///
    /// `KeepRemote` applies the remote content and marks the entry synced.
    /// `KeepLocal` moves the merge base to the remote content, so the next
    /// cycle pushes the local version as a fast-forward.
    pub fn resolve_conflict(&self, id: Uuid, choice: ConflictChoice) -> Result<Entry> {
        let entry = {
            let mut db = self.lock()?;
            let conflict = db
                .conflict(id)
                .context("Failed to read conflict")?
                .ok_or_else(|| anyhow!("No open conflict for entry {}", id))?;
            let mut entry = db
                .get_entry(id)
                .context("Failed to get entry")?
                .ok_or_else(|| anyhow!("Entry not found: {}", id))?;

            match choice {
                ConflictChoice::KeepRemote => {
                    entry.apply_content(&conflict.remote);
                    entry.pending = false;
                }
                ConflictChoice::KeepLocal => entry.pending = true,
            }

            let snapshot = Snapshot {
                entry_id: id,
                sync_id: conflict.sync_id,
                content: conflict.remote,
                synced_at: now_millis(),
            };
            db.commit_synced(&entry, &snapshot)
                .context("Failed to resolve conflict")?;
            entry
        };

        info!(%id, ?choice, "Resolved conflict");
        self.bus.notify(
            Topic::Conflict,
            ResultCode::ConflictResolved,
            Payload::Entry { id },
        );
        Ok(entry)
    }

    // ==================== Sync ====================

    /// Build an orchestrator for the configured remote
    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let client = RestClient::from_config(&self.config).context("Sync is not configured")?;
        let api_url = client.base_url().to_string();
        let probe = TcpProbe::for_url(&api_url, self.config.request_timeout())
            .ok_or_else(|| anyhow!("Invalid API URL: {}", api_url))?
            .metered(self.config.metered);

        Ok(self.orchestrator_with(Arc::new(client), Arc::new(probe)))
    }

    /// Build an orchestrator over any remote and connectivity source
    pub fn orchestrator_with(
        &self,
        remote: Arc<dyn RemoteApi>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Orchestrator {
        Orchestrator::new(
            self.db.clone(),
            remote,
            connectivity,
            self.bus.clone(),
            SyncOptions::from_config(&self.config),
        )
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| anyhow!("Database lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    use crate::ledger::{SyncAction, SyncStatus};
    use crate::models::ContentField;
    use crate::observer::Notification;
    use crate::sync::testing::{MemoryRemote, StaticConnectivity};
    use crate::sync::{CycleOutcome, NetworkType, SyncTrigger};

    fn test_config(temp_dir: &TempDir) -> Config {
        Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        }
    }

    fn memory_store() -> Store {
        Store::open_in_memory(Config::default()).unwrap()
    }

    /// Record every code published on `topics`
    fn record(store: &Store, topics: &[Topic]) -> Arc<StdMutex<Vec<ResultCode>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        store
            .bus()
            .register(topics, "recorder", move |n: &Notification| -> anyhow::Result<()> {
                sink.lock().unwrap().push(n.code);
                Ok(())
            });
        seen
    }

    fn add(store: &Store, title: &str) -> Entry {
        let mut entry = Entry::new(title);
        store.add_entry(&mut entry).unwrap();
        entry
    }

    #[test]
    fn test_data_persists_across_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        let id = {
            let store = Store::open_with_config(config.clone()).unwrap();
            add(&store, "Persistent").id
        };

        let store = Store::open_with_config(config.clone()).unwrap();
        assert_eq!(store.entry_count().unwrap(), 1);
        assert_eq!(store.get_entry(id).unwrap().unwrap().title, "Persistent");
        assert!(config.sqlite_path().exists());
    }

    #[test]
    fn test_add_assigns_positions_and_notifies() {
        let store = memory_store();
        let seen = record(&store, &[Topic::Entry]);

        let first = add(&store, "One");
        let second = add(&store, "Two");

        assert_eq!(first.position + 1, second.position);
        assert!(store.get_entry(first.id).unwrap().unwrap().pending);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ResultCode::EntryAdded, ResultCode::EntryAdded]
        );
    }

    #[test]
    fn test_add_rejects_bad_color() {
        let store = memory_store();
        let mut entry = Entry::new("Bad");
        entry.color = "red".to_string();
        assert!(store.add_entry(&mut entry).is_err());
        assert_eq!(store.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_update_entry_marks_pending() {
        let store = memory_store();
        let mut entry = add(&store, "Draft");
        {
            let db = store.database();
            let mut stored = entry.clone();
            stored.pending = false;
            db.lock().unwrap().update_entry(&stored).unwrap();
        }

        entry.set_description("Now with a body");
        entry.pending = false;
        store.update_entry(&entry).unwrap();

        let stored = store.get_entry(entry.id).unwrap().unwrap();
        assert_eq!(stored.description, "Now with a body");
        assert!(stored.pending);
    }

    #[test]
    fn test_delete_unsynced_entry_is_purged() {
        let store = memory_store();
        let entry = add(&store, "Temporary");

        assert!(store.delete_entry(entry.id).unwrap());
        assert!(store.database().lock().unwrap().get_entry(entry.id).unwrap().is_none());
        assert!(!store.delete_entry(entry.id).unwrap());
    }

    #[test]
    fn test_delete_synced_entry_is_soft() {
        let store = memory_store();
        let mut entry = add(&store, "Synced");
        entry.sync_id = Some("r1".to_string());
        entry.pending = false;
        store.database().lock().unwrap().update_entry(&entry).unwrap();

        assert!(store.delete_entry(entry.id).unwrap());

        assert!(store.get_entry(entry.id).unwrap().is_none());
        let raw = store.database().lock().unwrap().get_entry(entry.id).unwrap().unwrap();
        assert!(raw.is_deleted());
        assert!(raw.pending);
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_list_with_filter() {
        let store = memory_store();
        let seen = record(&store, &[Topic::ListFilter]);
        add(&store, "Buy milk");
        add(&store, "Call mom");
        let mut yellow = add(&store, "Yellow");
        yellow.set_color("#FFF475");
        store.update_entry(&yellow).unwrap();

        let all = store.list(&EntryFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].title, "Buy milk");

        let milk = store
            .list(&EntryFilter {
                text: Some("milk".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(milk.len(), 1);

        let colored = store
            .list(&EntryFilter {
                color: Some("#FFF475".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(colored[0].id, yellow.id);

        let err = store.list(&EntryFilter {
            sort: Some("nonsense".to_string()),
            ..Default::default()
        });
        assert!(err.is_err());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ResultCode::FilterApplied,
                ResultCode::FilterApplied,
                ResultCode::FilterRejected
            ]
        );
    }

    #[test]
    fn test_list_sort_descending() {
        let store = memory_store();
        add(&store, "a");
        add(&store, "b");

        let entries = store
            .list(&EntryFilter {
                sort: Some("title".to_string()),
                descending: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(entries[0].title, "b");
    }

    #[test]
    fn test_mark_viewed_and_move() {
        let store = memory_store();
        let seen = record(&store, &[Topic::Entry]);
        let entry = add(&store, "Look");

        store.mark_viewed(entry.id).unwrap();
        store.move_entry(entry.id, 42).unwrap();

        let stored = store.get_entry(entry.id).unwrap().unwrap();
        assert_eq!(stored.position, 42);
        assert!(stored.viewed_at >= entry.viewed_at);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ResultCode::EntryAdded,
                ResultCode::EntryViewed,
                ResultCode::EntryMoved
            ]
        );
        assert!(store.move_entry(Uuid::new_v4(), 1).is_err());
    }

    #[test]
    fn test_set_color() {
        let store = memory_store();
        let seen = record(&store, &[Topic::ColorPicker]);
        let entry = add(&store, "Colorful");

        assert!(store.set_color(entry.id, "#CCFF90").unwrap());
        assert!(!store.set_color(entry.id, "#XYZ").unwrap());

        assert_eq!(store.get_entry(entry.id).unwrap().unwrap().color, "#CCFF90");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ResultCode::ColorSelected, ResultCode::ColorRejected]
        );
    }

    #[test]
    fn test_mock_entries() {
        let store = memory_store();
        let seen = record(&store, &[Topic::EntriesMock]);
        add(&store, "Real entry");

        let mocks = store.generate_mock_entries(4).unwrap();
        assert_eq!(mocks.len(), 4);
        assert_eq!(store.entry_count().unwrap(), 5);

        assert_eq!(store.delete_mock_entries().unwrap(), 4);
        let remaining = store.list(&EntryFilter::default()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].title, "Real entry");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ResultCode::MockGenerated, ResultCode::MockCleared]
        );
    }

    #[test]
    fn test_export_and_import() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("export.json");

        let source = memory_store();
        let mut entry = add(&source, "Exported");
        entry.sync_id = Some("r9".to_string());
        entry.pending = false;
        source.database().lock().unwrap().update_entry(&entry).unwrap();
        add(&source, "Also exported");

        assert_eq!(source.export_json(&path).unwrap(), 2);

        let target = memory_store();
        let seen = record(&target, &[Topic::FileImport]);
        add(&target, "Existing");
        assert_eq!(target.import_json(&path).unwrap(), 2);

        let entries = target.list(&EntryFilter::default()).unwrap();
        assert_eq!(entries.len(), 3);
        let imported = entries.iter().find(|e| e.title == "Exported").unwrap();
        assert_ne!(imported.id, entry.id);
        assert!(imported.sync_id.is_none());
        assert!(imported.pending);
        assert!(imported.position > entries[0].position);

        assert!(target.import_json(&temp_dir.path().join("missing.json")).is_err());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ResultCode::ImportSucceeded, ResultCode::ImportFailed]
        );
    }

    #[test]
    fn test_set_user_resets_sync_state() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let mut store = Store::open_in_memory(test_config(&temp_dir))
            .unwrap()
            .with_config_path(&config_path);
        let seen = record(&store, &[Topic::Users]);

        let mut entry = add(&store, "Owned");
        entry.sync_id = Some("r1".to_string());
        entry.pending = false;
        store.database().lock().unwrap().update_entry(&entry).unwrap();

        store.set_user(Some("alice".to_string())).unwrap();
        store.set_user(Some("alice".to_string())).unwrap();

        let stored = store.get_entry(entry.id).unwrap().unwrap();
        assert!(stored.sync_id.is_none());
        assert!(stored.pending);
        assert_eq!(store.config().user_id.as_deref(), Some("alice"));

        let saved = Config::load_from_path(&config_path).unwrap();
        assert_eq!(saved.user_id.as_deref(), Some("alice"));
        assert_eq!(*seen.lock().unwrap(), vec![ResultCode::UserChanged]);
    }

    #[test]
    fn test_history_roundtrip() {
        let store = memory_store();
        store
            .database()
            .lock()
            .unwrap()
            .append_record(&SyncRecord::new(SyncAction::Pull, SyncStatus::Success, 3))
            .unwrap();

        assert_eq!(store.sync_history(None).unwrap().len(), 1);
        assert_eq!(store.last_sync().unwrap().unwrap().amount, 3);
        assert_eq!(store.clear_history().unwrap(), 1);
        assert!(store.last_sync().unwrap().is_none());
    }

    #[test]
    fn test_orchestrator_requires_configuration() {
        let store = memory_store();
        assert!(store.orchestrator().is_err());
    }

    /// Sync one entry, then edit the same field on both sides
    async fn conflicted_store() -> (Store, Arc<MemoryRemote>, Entry) {
        let store = memory_store();
        let remote = Arc::new(MemoryRemote::new());
        let orchestrator = store.orchestrator_with(
            remote.clone(),
            Arc::new(StaticConnectivity::new(NetworkType::Wifi)),
        );

        let mut entry = add(&store, "Shared");
        orchestrator.run_cycle(SyncTrigger::Manual).await;
        let sync_id = store.get_entry(entry.id).unwrap().unwrap().sync_id.unwrap();

        remote.edit(&sync_id, |note| note.title = "Remote title".to_string());
        entry = store.get_entry(entry.id).unwrap().unwrap();
        entry.set_title("Local title");
        store.update_entry(&entry).unwrap();

        match orchestrator.run_cycle(SyncTrigger::Manual).await {
            CycleOutcome::Completed(report) => assert_eq!(report.conflicts, 1),
            other => panic!("unexpected outcome {:?}", other),
        }
        (store, remote, entry)
    }

    #[tokio::test]
    async fn test_update_from_copy_read_before_sync() {
        let store = memory_store();
        let remote = Arc::new(MemoryRemote::new());
        let orchestrator = store.orchestrator_with(
            remote.clone(),
            Arc::new(StaticConnectivity::new(NetworkType::Wifi)),
        );

        let entry = add(&store, "Draft");
        let mut copy = store.get_entry(entry.id).unwrap().unwrap();
        orchestrator.run_cycle(SyncTrigger::Manual).await;
        let sync_id = store.get_entry(entry.id).unwrap().unwrap().sync_id;
        assert!(sync_id.is_some());

        copy.set_title("Draft v2");
        store.update_entry(&copy).unwrap();
        assert_eq!(store.get_entry(entry.id).unwrap().unwrap().sync_id, sync_id);

        orchestrator.run_cycle(SyncTrigger::Manual).await;

        let notes = remote.notes();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "Draft v2");
        assert_eq!(store.entry_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_edit_keeps_fields_changed_by_sync() {
        let store = memory_store();
        let remote = Arc::new(MemoryRemote::new());
        let orchestrator = store.orchestrator_with(
            remote.clone(),
            Arc::new(StaticConnectivity::new(NetworkType::Wifi)),
        );

        let entry = add(&store, "Shared");
        orchestrator.run_cycle(SyncTrigger::Manual).await;
        let sync_id = store.get_entry(entry.id).unwrap().unwrap().sync_id.unwrap();

        remote.edit(&sync_id, |note| note.description = "From the server".to_string());
        orchestrator.run_cycle(SyncTrigger::Manual).await;

        let edited = store
            .edit_entry(entry.id, |e| e.set_title("Shared, renamed"))
            .unwrap();
        assert_eq!(edited.description, "From the server");
        assert!(edited.pending);

        let stored = store.get_entry(entry.id).unwrap().unwrap();
        assert_eq!(stored.title, "Shared, renamed");
        assert_eq!(stored.description, "From the server");
    }

    #[test]
    fn test_update_rejects_deleted_entry() {
        let store = memory_store();
        let mut entry = add(&store, "Synced");
        entry.sync_id = Some("r1".to_string());
        entry.pending = false;
        store.database().lock().unwrap().update_entry(&entry).unwrap();

        let mut copy = store.get_entry(entry.id).unwrap().unwrap();
        assert!(store.delete_entry(entry.id).unwrap());

        copy.set_title("Back from the dead");
        assert!(store.update_entry(&copy).is_err());
        assert!(store.edit_entry(entry.id, |e| e.set_title("Again")).is_err());
        assert!(store.move_entry(entry.id, 7).is_err());
        assert!(store.mark_viewed(entry.id).is_err());

        let raw = store.database().lock().unwrap().get_entry(entry.id).unwrap().unwrap();
        assert!(raw.is_deleted());
        assert_eq!(raw.title, "Synced");
    }

    #[tokio::test]
    async fn test_resolve_conflict_keep_remote() {
        let (store, _remote, entry) = conflicted_store().await;
        let conflicts = store.conflicts().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].fields, vec![ContentField::Title]);

        let seen = record(&store, &[Topic::Conflict]);
        let resolved = store
            .resolve_conflict(entry.id, ConflictChoice::KeepRemote)
            .unwrap();

        assert_eq!(resolved.title, "Remote title");
        assert!(!resolved.pending);
        assert!(store.conflicts().unwrap().is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![ResultCode::ConflictResolved]);
        assert!(store
            .resolve_conflict(entry.id, ConflictChoice::KeepRemote)
            .is_err());
    }

    #[tokio::test]
    async fn test_resolve_conflict_keep_local_pushes_next_cycle() {
        let (store, remote, entry) = conflicted_store().await;

        let resolved = store
            .resolve_conflict(entry.id, ConflictChoice::KeepLocal)
            .unwrap();
        assert_eq!(resolved.title, "Local title");
        assert!(resolved.pending);

        let orchestrator = store.orchestrator_with(
            remote.clone(),
            Arc::new(StaticConnectivity::new(NetworkType::Wifi)),
        );
        orchestrator.run_cycle(SyncTrigger::Manual).await;

        let sync_id = resolved.sync_id.unwrap();
        assert_eq!(remote.note(&sync_id).unwrap().title, "Local title");
        assert!(!store.get_entry(entry.id).unwrap().unwrap().pending);
    }
}
