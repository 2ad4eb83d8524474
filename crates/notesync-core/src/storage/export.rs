//! JSON export files
//!
//! Entries are exported as a single JSON document. Writes are atomic
//! (write to temp file, then rename) so an interrupted export never leaves
//! a half-written file behind.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{now_millis, Entry};
use crate::storage::error::StorageError;

/// Current export format version
pub const EXPORT_VERSION: u32 = 1;

/// On-disk export document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportFile {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub entries: Vec<Entry>,
}

impl ExportFile {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            version: EXPORT_VERSION,
            exported_at: now_millis(),
            entries,
        }
    }
}

/// Write entries to `path` as an export file
pub fn write_export(path: &Path, entries: Vec<Entry>) -> Result<usize> {
    let count = entries.len();
    let file = ExportFile::new(entries);
    let json = serde_json::to_vec_pretty(&file).context("Failed to serialize export")?;

    atomic_write(path, &json).with_context(|| format!("Failed to export to {:?}", path))?;

    Ok(count)
}

/// Read an export file
pub fn read_export(path: &Path) -> Result<ExportFile> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read export {:?}", path))?;
    let file: ExportFile = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse export {:?}", path))?;

    if file.version > EXPORT_VERSION {
        bail!(
            "Export {:?} has version {}, newest supported is {}",
            path,
            file.version,
            EXPORT_VERSION
        );
    }

    Ok(file)
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    // Same directory, so the rename stays on one filesystem
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path).map_err(|e| StorageError::write(&temp_path, e))?;
    file.write_all(data)
        .and_then(|()| file.sync_all())
        .map_err(|e| StorageError::write(&temp_path, e))?;

    fs::rename(&temp_path, path).map_err(|e| StorageError::write(path, e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_export_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.json");

        let mut first = Entry::new("First");
        first.set_description("body");
        let second = Entry::new("Second");

        let written = write_export(&path, vec![first.clone(), second.clone()]).unwrap();
        assert_eq!(written, 2);

        let file = read_export(&path).unwrap();
        assert_eq!(file.version, EXPORT_VERSION);
        assert_eq!(file.entries, vec![first, second]);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_read_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = read_export(&temp_dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read export"));
    }

    #[test]
    fn test_rejects_newer_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("future.json");
        fs::write(
            &path,
            r#"{"version": 99, "exported_at": "2024-01-01T00:00:00Z", "entries": []}"#,
        )
        .unwrap();

        assert!(read_export(&path).is_err());
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir
            .path()
            .join("a")
            .join("b")
            .join("c")
            .join("file.txt");

        atomic_write(&nested_path, b"test data").unwrap();

        assert!(nested_path.exists());
        let content = fs::read_to_string(&nested_path).unwrap();
        assert_eq!(content, "test data");
    }

    #[test]
    fn test_failed_write_keeps_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();

        let err = atomic_write(&blocker.join("notes.json"), b"{}").unwrap_err();
        let storage = err.downcast_ref::<StorageError>().unwrap();
        assert!(matches!(storage, StorageError::CreateDirectory { path, .. } if *path == blocker));
        assert!(storage.recovery_suggestion().is_some());
    }
}
