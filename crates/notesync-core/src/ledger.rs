//! Sync ledger
//!
//! Append-only history of sync attempts. Each record is written once when
//! an operation finishes and is never updated; the only way records leave
//! the table is [`clear`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::models::now_millis;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::millis_to_datetime;

/// What the recorded operation did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncAction {
    Add,
    Update,
    Delete,
    Pull,
}

/// How the recorded operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncStatus {
    Success,
    Failed,
    Conflict,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Add => "ADD",
            SyncAction::Update => "UPDATE",
            SyncAction::Delete => "DELETE",
            SyncAction::Pull => "PULL",
        }
    }
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "SUCCESS",
            SyncStatus::Failed => "FAILED",
            SyncStatus::Conflict => "CONFLICT",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(SyncAction::Add),
            "UPDATE" => Ok(SyncAction::Update),
            "DELETE" => Ok(SyncAction::Delete),
            "PULL" => Ok(SyncAction::Pull),
            other => Err(StorageError::InvalidData(format!(
                "unknown sync action '{}'",
                other
            ))),
        }
    }
}

impl FromStr for SyncStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(SyncStatus::Success),
            "FAILED" => Ok(SyncStatus::Failed),
            "CONFLICT" => Ok(SyncStatus::Conflict),
            other => Err(StorageError::InvalidData(format!(
                "unknown sync status '{}'",
                other
            ))),
        }
    }
}

/// One finished sync operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Row id, `None` until appended
    pub id: Option<i64>,
    pub finished_at: DateTime<Utc>,
    pub action: SyncAction,
    pub status: SyncStatus,
    /// Number of entries affected
    pub amount: u32,
}

impl SyncRecord {
    /// A record finishing now
    pub fn new(action: SyncAction, status: SyncStatus, amount: u32) -> Self {
        Self {
            id: None,
            finished_at: now_millis(),
            action,
            status,
            amount,
        }
    }
}

/// Append a record, returning its row id
pub fn append(conn: &Connection, record: &SyncRecord) -> StorageResult<i64> {
    conn.execute(
        "INSERT INTO sync_ledger (finished_at, action, status, amount) VALUES (?, ?, ?, ?)",
        params![
            record.finished_at.timestamp_millis(),
            record.action.as_str(),
            record.status.as_str(),
            record.amount,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Records in append order, optionally only the newest `limit`
pub fn records(conn: &Connection, limit: Option<usize>) -> StorageResult<Vec<SyncRecord>> {
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(
        r#"
        SELECT id, finished_at, action, status, amount FROM (
            SELECT * FROM sync_ledger ORDER BY id DESC LIMIT ?
        ) ORDER BY id ASC
        "#,
    )?;

    let rows = stmt
        .query_map(params![limit], raw_record)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(RawRecord::into_record).collect()
}

/// Most recent record, if any
pub fn latest(conn: &Connection) -> StorageResult<Option<SyncRecord>> {
    Ok(records(conn, Some(1))?.pop())
}

/// Delete the whole history, returning the number of removed records
pub fn clear(conn: &Connection) -> StorageResult<usize> {
    Ok(conn.execute("DELETE FROM sync_ledger", [])?)
}

struct RawRecord {
    id: i64,
    finished_at: i64,
    action: String,
    status: String,
    amount: u32,
}

impl RawRecord {
    fn into_record(self) -> StorageResult<SyncRecord> {
        Ok(SyncRecord {
            id: Some(self.id),
            finished_at: millis_to_datetime(self.finished_at),
            action: self.action.parse()?,
            status: self.status.parse()?,
            amount: self.amount,
        })
    }
}

fn raw_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        finished_at: row.get(1)?,
        action: row.get(2)?,
        status: row.get(3)?,
        amount: row.get(4)?,
    })
}
