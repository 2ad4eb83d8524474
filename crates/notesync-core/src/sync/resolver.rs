//! Conflict resolution
//!
//! Three-way merge of a local and a remote version of one entry, using the
//! last-synced snapshot as merge base. Pure: the orchestrator applies the
//! returned [`Resolution`].

use chrono::{DateTime, Utc};

use crate::models::{ContentField, EntryContent, Snapshot};

/// One side of a merge
#[derive(Debug, Clone, PartialEq)]
pub enum Version {
    Present(EntryContent),
    Deleted { at: DateTime<Utc> },
}

impl Version {
    pub fn content(&self) -> Option<&EntryContent> {
        match self {
            Version::Present(content) => Some(content),
            Version::Deleted { .. } => None,
        }
    }
}

/// What to do with an entry after comparing both sides
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Both sides already agree
    Unchanged,
    /// Only the local side changed; push it
    KeepLocal(EntryContent),
    /// Only the remote side changed; apply it locally
    KeepRemote(EntryContent),
    /// Both changed disjoint fields; apply locally and push
    Merge(EntryContent),
    /// Remove the local entry
    DeleteLocal,
    /// Remove the remote note (and then the local entry)
    DeleteRemote,
    /// Both changed the same fields to different values
    Conflict { fields: Vec<ContentField> },
}

impl Resolution {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Resolution::Conflict { .. })
    }

    /// Short name for logs
    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Unchanged => "unchanged",
            Resolution::KeepLocal(_) => "keep-local",
            Resolution::KeepRemote(_) => "keep-remote",
            Resolution::Merge(_) => "merge",
            Resolution::DeleteLocal => "delete-local",
            Resolution::DeleteRemote => "delete-remote",
            Resolution::Conflict { .. } => "conflict",
        }
    }
}

/// Decide how to reconcile `local` and `remote` given the last-synced `base`
pub fn resolve(base: Option<&Snapshot>, local: &Version, remote: &Version) -> Resolution {
    match (local, remote) {
        (Version::Present(local), Version::Present(remote)) => merge(base, local, remote),

        (Version::Deleted { .. }, Version::Deleted { .. }) => Resolution::DeleteLocal,

        (Version::Deleted { at }, Version::Present(remote)) => {
            if delete_wins(base, remote, *at) {
                Resolution::DeleteRemote
            } else {
                Resolution::KeepRemote(remote.clone())
            }
        }

        (Version::Present(local), Version::Deleted { at }) => {
            if delete_wins(base, local, *at) {
                Resolution::DeleteLocal
            } else {
                Resolution::KeepLocal(local.clone())
            }
        }
    }
}

fn merge(base: Option<&Snapshot>, local: &EntryContent, remote: &EntryContent) -> Resolution {
    if local.same_fields(remote) {
        return Resolution::Unchanged;
    }

    let Some(base) = base else {
        return Resolution::Conflict {
            fields: local.differing_fields(remote),
        };
    };

    let local_changes = base.content.differing_fields(local);
    let remote_changes = base.content.differing_fields(remote);

    if local_changes.is_empty() {
        return Resolution::KeepRemote(remote.clone());
    }
    if remote_changes.is_empty() {
        return Resolution::KeepLocal(local.clone());
    }

    let clashing: Vec<ContentField> = local_changes
        .iter()
        .copied()
        .filter(|f| remote_changes.contains(f) && local.field(*f) != remote.field(*f))
        .collect();

    if !clashing.is_empty() {
        return Resolution::Conflict { fields: clashing };
    }

    let mut merged = local.clone();
    for field in remote_changes {
        merged.take_field(field, remote);
    }
    merged.edited_at = local.edited_at.max(remote.edited_at);
    Resolution::Merge(merged)
}

/// A delete applies unless the surviving side was edited and the delete
/// predates the last sync
fn delete_wins(base: Option<&Snapshot>, survivor: &EntryContent, deleted_at: DateTime<Utc>) -> bool {
    match base {
        None => true,
        Some(base) if survivor.same_fields(&base.content) => true,
        Some(base) => deleted_at >= base.synced_at,
    }
}
