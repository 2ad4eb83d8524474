//! SQLite entry store
//!
//! Executes [`EntryQuery`] predicates, keeps the sync bookkeeping tables
//! (snapshots, conflicts, ledger) and offers per-entry transactional writes
//! for the sync engine.
//!
//! ## Tables
//!
//! - `entries` - Notes, including soft-deleted ones awaiting remote delete
//! - `sync_snapshots` - Last-synced content per entry
//! - `conflicts` - Conflicts waiting for the user
//! - `sync_ledger` - Sync history

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::ledger::{self, SyncRecord};
use crate::models::{ConflictRecord, ContentField, Entry, EntryContent, Snapshot};
use crate::query::{EntryQuery, QueryArg};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::millis_to_datetime;
use crate::storage::schema::{init_schema, needs_init};

const ENTRY_COLUMNS: &str =
    "_id, title, description, color, created, edited, viewed, position, sync_id, pending, deleted";

/// Default ordering when a query doesn't set one
const DEFAULT_ORDER: &str = "position ASC, created ASC";

/// Which rows a select may see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Rows visible to the user (no soft-deleted rows)
    Visible,
    /// Everything except entries with an open conflict
    Pushable,
}

/// SQLite-backed entry store
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the SQLite database
    pub fn open(config: &Config) -> StorageResult<Self> {
        let path = config.sqlite_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&path)?;
        Self::init(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        if needs_init(&conn) {
            init_schema(&conn)?;
        }
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a transaction, committing only if it succeeds
    pub fn transaction<T, F>(&mut self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> StorageResult<T>,
    {
        let tx = self.conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ==================== Entries ====================

    /// Insert a new entry
    pub fn insert_entry(&self, entry: &Entry) -> StorageResult<()> {
        upsert_entry(&self.conn, entry)
    }

    /// Insert an entry on an open transaction
    pub fn insert_entry_in(conn: &Connection, entry: &Entry) -> StorageResult<()> {
        upsert_entry(conn, entry)
    }

    /// Write the user-editable content of a visible entry and mark it pending
    ///
    /// Sync state, position and deletion are left as stored. A soft-deleted
    /// row counts as missing.
    pub fn update_content(&self, id: Uuid, content: &EntryContent) -> StorageResult<()> {
        self.update_visible(
            id,
            "title = ?, description = ?, color = ?, edited = ?, pending = 1",
            params![
                content.title,
                content.description,
                content.color,
                content.edited_at.timestamp_millis(),
                id.to_string(),
            ],
        )
    }

    /// Set the last-viewed time of a visible entry
    pub fn set_viewed(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<()> {
        self.update_visible(
            id,
            "viewed = ?",
            params![at.timestamp_millis(), id.to_string()],
        )
    }

    /// Set the manual ordering key of a visible entry
    pub fn set_position(&self, id: Uuid, position: i64) -> StorageResult<()> {
        self.update_visible(id, "position = ?", params![position, id.to_string()])
    }

    /// Flag an entry for the next push without touching anything else
    pub fn mark_pending(&self, id: Uuid) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE entries SET pending = 1 WHERE _id = ?",
            params![id.to_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::EntryNotFound(id));
        }
        Ok(())
    }

    /// `assignments` must end with the `_id` parameter
    fn update_visible(
        &self,
        id: Uuid,
        assignments: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StorageResult<()> {
        let sql = format!(
            "UPDATE entries SET {} WHERE _id = ? AND deleted IS NULL",
            assignments
        );
        if self.conn.execute(&sql, params)? == 0 {
            return Err(StorageError::EntryNotFound(id));
        }
        Ok(())
    }

    /// Overwrite every column of an existing entry
    pub fn update_entry(&self, entry: &Entry) -> StorageResult<()> {
        let changed = self.conn.execute(
            r#"
            UPDATE entries SET title = ?, description = ?, color = ?, created = ?,
                edited = ?, viewed = ?, position = ?, sync_id = ?, pending = ?, deleted = ?
            WHERE _id = ?
            "#,
            params![
                entry.title,
                entry.description,
                entry.color,
                entry.created_at.timestamp_millis(),
                entry.edited_at.timestamp_millis(),
                entry.viewed_at.timestamp_millis(),
                entry.position,
                entry.sync_id,
                entry.pending,
                entry.deleted_at.map(|t| t.timestamp_millis()),
                entry.id.to_string(),
            ],
        )?;

        if changed == 0 {
            return Err(StorageError::EntryNotFound(entry.id));
        }
        Ok(())
    }

    /// Get an entry by ID, including soft-deleted ones
    pub fn get_entry(&self, id: Uuid) -> StorageResult<Option<Entry>> {
        let sql = format!("SELECT {} FROM entries WHERE _id = ?", ENTRY_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![id.to_string()], entry_from_row)
            .optional()?)
    }

    /// Get an entry by its remote identifier
    pub fn entry_by_sync_id(&self, sync_id: &str) -> StorageResult<Option<Entry>> {
        let sql = format!("SELECT {} FROM entries WHERE sync_id = ?", ENTRY_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![sync_id], entry_from_row)
            .optional()?)
    }

    /// Run a predicate against visible entries
    pub fn query_entries(&self, query: &EntryQuery) -> StorageResult<Vec<Entry>> {
        self.select(query, Scope::Visible)
    }

    /// Pending entries (including pending deletes) without an open
    /// conflict, in creation order
    pub fn pending_entries(&self) -> StorageResult<Vec<Entry>> {
        let query = EntryQuery::new()
            .and("pending", "=", [true])
            .and_then(|q| q.order_by("created"))
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        self.select(&query, Scope::Pushable)
    }

    /// All entries that have reached the remote, including soft-deleted ones
    pub fn synced_entries(&self) -> StorageResult<Vec<Entry>> {
        let sql = format!(
            "SELECT {} FROM entries WHERE sync_id IS NOT NULL ORDER BY created ASC",
            ENTRY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map([], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Mark an entry as a pending delete
    pub fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE entries SET deleted = ?, pending = 1 WHERE _id = ?",
            params![at.timestamp_millis(), id.to_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::EntryNotFound(id));
        }
        Ok(())
    }

    /// Remove an entry for good, together with its snapshot and conflict
    pub fn purge_entry(&self, id: Uuid) -> StorageResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM entries WHERE _id = ?", params![id.to_string()])?;
        Ok(changed > 0)
    }

    /// Count visible entries
    pub fn entry_count(&self) -> StorageResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE deleted IS NULL",
            [],
            |row| row.get(0),
        )?)
    }

    /// Count entries waiting to be pushed
    pub fn pending_count(&self) -> StorageResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE pending = 1",
            [],
            |row| row.get(0),
        )?)
    }

    /// Highest manual ordering key in use
    pub fn max_position(&self) -> StorageResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(position), 0) FROM entries",
            [],
            |row| row.get(0),
        )?)
    }

    // ==================== Sync bookkeeping ====================

    /// Last-synced snapshot of an entry
    pub fn snapshot(&self, entry_id: Uuid) -> StorageResult<Option<Snapshot>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT entry_id, sync_id, title, description, color, edited, synced_at
                FROM sync_snapshots WHERE entry_id = ?
                "#,
                params![entry_id.to_string()],
                snapshot_from_row,
            )
            .optional()?)
    }

    /// Store an entry as synced: write it, replace its snapshot and drop any
    /// open conflict, all in one transaction
    pub fn commit_synced(&mut self, entry: &Entry, snapshot: &Snapshot) -> StorageResult<()> {
        self.transaction(|tx| {
            upsert_entry(tx, entry)?;
            put_snapshot(tx, snapshot)?;
            tx.execute(
                "DELETE FROM conflicts WHERE entry_id = ?",
                params![entry.id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Replace the snapshot of an entry without touching the entry
    pub fn put_snapshot(&self, snapshot: &Snapshot) -> StorageResult<()> {
        put_snapshot(&self.conn, snapshot)
    }

    /// Record (or refresh) an open conflict
    pub fn save_conflict(&self, conflict: &ConflictRecord) -> StorageResult<()> {
        let fields = conflict
            .fields
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(",");
        self.conn.execute(
            r#"
            INSERT INTO conflicts (entry_id, sync_id, remote, fields, detected_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(entry_id) DO UPDATE SET
                sync_id = excluded.sync_id, remote = excluded.remote,
                fields = excluded.fields, detected_at = excluded.detected_at
            "#,
            params![
                conflict.entry_id.to_string(),
                conflict.sync_id,
                serde_json::to_string(&conflict.remote)?,
                fields,
                conflict.detected_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Open conflict for an entry
    pub fn conflict(&self, entry_id: Uuid) -> StorageResult<Option<ConflictRecord>> {
        let raw = self
            .conn
            .query_row(
                "SELECT entry_id, sync_id, remote, fields, detected_at FROM conflicts WHERE entry_id = ?",
                params![entry_id.to_string()],
                raw_conflict,
            )
            .optional()?;
        raw.map(RawConflict::into_record).transpose()
    }

    /// All open conflicts, oldest first
    pub fn conflicts(&self) -> StorageResult<Vec<ConflictRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT entry_id, sync_id, remote, fields, detected_at FROM conflicts ORDER BY detected_at",
        )?;
        let raws = stmt
            .query_map([], raw_conflict)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawConflict::into_record).collect()
    }

    /// Drop an open conflict
    pub fn delete_conflict(&self, entry_id: Uuid) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM conflicts WHERE entry_id = ?",
            params![entry_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Forget everything known about the remote
    ///
    /// Used when the sync user changes: every live entry becomes a fresh
    /// pending add, pending deletes are dropped.
    pub fn reset_sync_state(&mut self) -> StorageResult<()> {
        self.transaction(|tx| {
            tx.execute("DELETE FROM conflicts", [])?;
            tx.execute("DELETE FROM sync_snapshots", [])?;
            tx.execute("DELETE FROM entries WHERE deleted IS NOT NULL", [])?;
            tx.execute("UPDATE entries SET sync_id = NULL, pending = 1", [])?;
            Ok(())
        })
    }

    // ==================== Ledger ====================

    /// Append a sync record
    pub fn append_record(&self, record: &SyncRecord) -> StorageResult<i64> {
        ledger::append(&self.conn, record)
    }

    /// Sync history in append order
    pub fn sync_records(&self, limit: Option<usize>) -> StorageResult<Vec<SyncRecord>> {
        ledger::records(&self.conn, limit)
    }

    /// Most recent sync record
    pub fn last_record(&self) -> StorageResult<Option<SyncRecord>> {
        ledger::latest(&self.conn)
    }

    /// Purge the sync history
    pub fn clear_history(&self) -> StorageResult<usize> {
        ledger::clear(&self.conn)
    }

    // ==================== Private helpers ====================

    fn select(&self, query: &EntryQuery, scope: Scope) -> StorageResult<Vec<Entry>> {
        let mut conditions = Vec::new();
        if let Some(selection) = query.selection() {
            conditions.push(format!("({})", selection));
        }
        match scope {
            Scope::Visible => conditions.push("deleted IS NULL".to_string()),
            Scope::Pushable => {
                conditions.push("_id NOT IN (SELECT entry_id FROM conflicts)".to_string())
            }
        }

        let mut sql = format!("SELECT {} FROM entries", ENTRY_COLUMNS);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(query.sort_order().as_deref().unwrap_or(DEFAULT_ORDER));

        let args: Vec<QueryArg> = query.selection_args();
        debug!(sql = %sql, args = args.len(), "Executing entry query");

        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(args.iter()), entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

// ==================== Row mapping ====================

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let id: String = row.get(0)?;
    let deleted: Option<i64> = row.get(10)?;
    Ok(Entry {
        id: parse_uuid(0, &id)?,
        title: row.get(1)?,
        description: row.get(2)?,
        color: row.get(3)?,
        created_at: millis_to_datetime(row.get(4)?),
        edited_at: millis_to_datetime(row.get(5)?),
        viewed_at: millis_to_datetime(row.get(6)?),
        position: row.get(7)?,
        sync_id: row.get(8)?,
        pending: row.get(9)?,
        deleted_at: deleted.map(millis_to_datetime),
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<Snapshot> {
    let id: String = row.get(0)?;
    Ok(Snapshot {
        entry_id: parse_uuid(0, &id)?,
        sync_id: row.get(1)?,
        content: EntryContent {
            title: row.get(2)?,
            description: row.get(3)?,
            color: row.get(4)?,
            edited_at: millis_to_datetime(row.get(5)?),
        },
        synced_at: millis_to_datetime(row.get(6)?),
    })
}

fn parse_uuid(column: usize, value: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

struct RawConflict {
    entry_id: String,
    sync_id: String,
    remote: String,
    fields: String,
    detected_at: i64,
}

impl RawConflict {
    fn into_record(self) -> StorageResult<ConflictRecord> {
        let entry_id = Uuid::parse_str(&self.entry_id)
            .map_err(|e| StorageError::InvalidData(format!("conflict entry id: {}", e)))?;
        let fields = self
            .fields
            .split(',')
            .filter(|f| !f.is_empty())
            .map(|f| {
                ContentField::parse(f)
                    .ok_or_else(|| StorageError::InvalidData(format!("conflict field '{}'", f)))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(ConflictRecord {
            entry_id,
            sync_id: self.sync_id,
            remote: serde_json::from_str(&self.remote)?,
            fields,
            detected_at: millis_to_datetime(self.detected_at),
        })
    }
}

fn raw_conflict(row: &Row<'_>) -> rusqlite::Result<RawConflict> {
    Ok(RawConflict {
        entry_id: row.get(0)?,
        sync_id: row.get(1)?,
        remote: row.get(2)?,
        fields: row.get(3)?,
        detected_at: row.get(4)?,
    })
}

// ==================== Write helpers ====================

/// Insert or fully overwrite an entry row
///
/// Uses `ON CONFLICT DO UPDATE` rather than `REPLACE` so the cascade on
/// snapshots and conflicts doesn't fire.
fn upsert_entry(conn: &Connection, entry: &Entry) -> StorageResult<()> {
    conn.execute(
        r#"
        INSERT INTO entries (_id, title, description, color, created, edited, viewed,
                             position, sync_id, pending, deleted)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(_id) DO UPDATE SET
            title = excluded.title, description = excluded.description,
            color = excluded.color, created = excluded.created,
            edited = excluded.edited, viewed = excluded.viewed,
            position = excluded.position, sync_id = excluded.sync_id,
            pending = excluded.pending, deleted = excluded.deleted
        "#,
        params![
            entry.id.to_string(),
            entry.title,
            entry.description,
            entry.color,
            entry.created_at.timestamp_millis(),
            entry.edited_at.timestamp_millis(),
            entry.viewed_at.timestamp_millis(),
            entry.position,
            entry.sync_id,
            entry.pending,
            entry.deleted_at.map(|t| t.timestamp_millis()),
        ],
    )?;
    Ok(())
}

fn put_snapshot(conn: &Connection, snapshot: &Snapshot) -> StorageResult<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO sync_snapshots
            (entry_id, sync_id, title, description, color, edited, synced_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            snapshot.entry_id.to_string(),
            snapshot.sync_id,
            snapshot.content.title,
            snapshot.content.description,
            snapshot.content.color,
            snapshot.content.edited_at.timestamp_millis(),
            snapshot.synced_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}
