//! Conflict command handlers

use anyhow::Result;

use notesync_core::{ConflictChoice, Store};

use super::parse_entry_id;
use crate::output::Output;

/// List open conflicts
pub fn list(store: &Store, output: &Output) -> Result<()> {
    let conflicts = store
        .conflicts()?
        .into_iter()
        .map(|conflict| {
            let local = store.get_entry(conflict.entry_id)?;
            Ok((conflict, local))
        })
        .collect::<Result<Vec<_>>>()?;

    output.print_conflicts(&conflicts);
    Ok(())
}

/// Settle a conflict by keeping one side
pub fn resolve(store: &Store, id: String, choice: ConflictChoice, output: &Output) -> Result<()> {
    let uuid = parse_entry_id(&id, store)?;
    let entry = store.resolve_conflict(uuid, choice)?;

    let side = match choice {
        ConflictChoice::KeepLocal => "local version kept, pushed on next sync",
        ConflictChoice::KeepRemote => "remote version applied",
    };
    output.success(&format!("Resolved {}: {}", &entry.id.to_string()[..8], side));
    output.print_entry(&entry);
    Ok(())
}
