//! Storage errors
//!
//! Database failures come straight from `rusqlite`. File writes (the data
//! directory and export files) carry the path and a coarse reason, so the
//! CLI can tell the user what to fix.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Why a file write failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFailure {
    PermissionDenied,
    /// Out of space or over quota
    DiskFull,
    Other,
}

impl WriteFailure {
    fn classify(error: &io::Error) -> Self {
        if error.kind() == io::ErrorKind::PermissionDenied {
            return WriteFailure::PermissionDenied;
        }

        let msg = error.to_string().to_lowercase();
        if msg.contains("no space left") || msg.contains("quota exceeded") {
            WriteFailure::DiskFull
        } else {
            WriteFailure::Other
        }
    }
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriteFailure::PermissionDenied => "permission denied",
            WriteFailure::DiskFull => "disk full",
            WriteFailure::Other => "I/O error",
        })
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write '{path}' ({failure}): {source}")]
    Write {
        path: PathBuf,
        failure: WriteFailure,
        #[source]
        source: io::Error,
    },

    #[error("Entry not found: {0}")]
    EntryNotFound(Uuid),

    /// A stored row could not be decoded
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A JSON column (conflict content) failed to (de)serialize
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Wrap a failed file write
    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Write {
            path: path.into(),
            failure: WriteFailure::classify(&source),
            source,
        }
    }

    /// Whether the user can fix the cause and simply retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::Write {
                failure: WriteFailure::PermissionDenied | WriteFailure::DiskFull,
                ..
            }
        )
    }

    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StorageError::Write { failure, .. } => match failure {
                WriteFailure::DiskFull => Some("Free up disk space and try again."),
                WriteFailure::PermissionDenied => {
                    Some("Check that you may write to the target file and its directory.")
                }
                WriteFailure::Other => None,
            },
            StorageError::CreateDirectory { .. } => {
                Some("Check that data_dir points somewhere you can write to.")
            }
            _ => None,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_write() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = StorageError::write("/notes/export.json", io_err);

        assert!(matches!(
            err,
            StorageError::Write {
                failure: WriteFailure::PermissionDenied,
                ..
            }
        ));
        assert!(err.is_recoverable());
        assert!(err.recovery_suggestion().is_some());
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_disk_full_write() {
        let io_err = io::Error::new(io::ErrorKind::Other, "No space left on device");
        let err = StorageError::write("/full/disk", io_err);

        assert!(matches!(
            err,
            StorageError::Write {
                failure: WriteFailure::DiskFull,
                ..
            }
        ));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_other_write_failure_has_no_hint() {
        let io_err = io::Error::new(io::ErrorKind::InvalidInput, "bad name");
        let err = StorageError::write("/x", io_err);

        assert!(!err.is_recoverable());
        assert!(err.recovery_suggestion().is_none());
    }

    #[test]
    fn test_entry_not_found_display() {
        let id = Uuid::new_v4();
        let err = StorageError::EntryNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
        assert!(!err.is_recoverable());
    }
}
