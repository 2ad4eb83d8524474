//! Export and import command handlers

use std::path::PathBuf;

use anyhow::Result;

use notesync_core::Store;

use crate::output::Output;

/// Export entries to a JSON file
pub fn export(store: &Store, path: PathBuf, output: &Output) -> Result<()> {
    let count = store.export_json(&path)?;
    output.success(&format!("Exported {} entry(s) to {}", count, path.display()));
    Ok(())
}

/// Import entries from a JSON file
pub fn import(store: &Store, path: PathBuf, output: &Output) -> Result<()> {
    let count = store.import_json(&path)?;
    output.success(&format!(
        "Imported {} entry(s) from {}",
        count,
        path.display()
    ));
    Ok(())
}
