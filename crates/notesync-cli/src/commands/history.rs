//! Sync history command handlers

use anyhow::Result;

use notesync_core::Store;

use crate::editor::confirm;
use crate::output::Output;

/// Show the sync ledger, newest first
pub fn show(store: &Store, limit: Option<usize>, output: &Output) -> Result<()> {
    let records = store.sync_history(limit)?;
    output.print_records(&records);
    Ok(())
}

/// Clear the sync ledger
pub fn clear(store: &Store, force: bool, output: &Output) -> Result<()> {
    if !force && output.should_prompt() && !confirm("Clear the sync history?")? {
        println!("Cancelled.");
        return Ok(());
    }

    let removed = store.clear_history()?;
    output.success(&format!("Removed {} record(s)", removed));
    Ok(())
}
