//! SQLite schema for the local entry store
//!
//! The local database is the source of truth for the device. The remote
//! service is reconciled against it by the sync engine.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Notes
        CREATE TABLE IF NOT EXISTS entries (
            _id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            color TEXT NOT NULL,
            created INTEGER NOT NULL,
            edited INTEGER NOT NULL,
            viewed INTEGER NOT NULL,
            position INTEGER NOT NULL DEFAULT 0,
            sync_id TEXT UNIQUE,
            pending INTEGER NOT NULL DEFAULT 1,
            deleted INTEGER
        );

        -- Content as of the last successful sync (merge base)
        CREATE TABLE IF NOT EXISTS sync_snapshots (
            entry_id TEXT PRIMARY KEY,
            sync_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            color TEXT NOT NULL,
            edited INTEGER NOT NULL,
            synced_at INTEGER NOT NULL,
            FOREIGN KEY (entry_id) REFERENCES entries(_id) ON DELETE CASCADE
        );

        -- Conflicts waiting for a user decision
        CREATE TABLE IF NOT EXISTS conflicts (
            entry_id TEXT PRIMARY KEY,
            sync_id TEXT NOT NULL,
            remote TEXT NOT NULL,
            fields TEXT NOT NULL,
            detected_at INTEGER NOT NULL,
            FOREIGN KEY (entry_id) REFERENCES entries(_id) ON DELETE CASCADE
        );

        -- Append-only history of sync attempts
        CREATE TABLE IF NOT EXISTS sync_ledger (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            finished_at INTEGER NOT NULL,
            action TEXT NOT NULL,
            status TEXT NOT NULL,
            amount INTEGER NOT NULL
        );

        -- Indexes for common query patterns
        CREATE INDEX IF NOT EXISTS idx_entries_created ON entries(created);
        CREATE INDEX IF NOT EXISTS idx_entries_edited ON entries(edited);
        CREATE INDEX IF NOT EXISTS idx_entries_position ON entries(position);
        CREATE INDEX IF NOT EXISTS idx_entries_pending ON entries(pending);
        "#,
    )?;

    // Set schema version
    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
