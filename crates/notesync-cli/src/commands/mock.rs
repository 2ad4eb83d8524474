//! Mock entry command handlers

use anyhow::Result;

use notesync_core::Store;

use crate::output::Output;

/// Generate mock entries
pub fn generate(store: &Store, count: usize, output: &Output) -> Result<()> {
    let entries = store.generate_mock_entries(count)?;
    output.success(&format!("Generated {} mock entry(s)", entries.len()));
    if !output.is_quiet() {
        output.print_entries(&entries);
    }
    Ok(())
}

/// Delete all mock entries
pub fn clear(store: &Store, output: &Output) -> Result<()> {
    let deleted = store.delete_mock_entries()?;
    output.success(&format!("Deleted {} mock entry(s)", deleted));
    Ok(())
}
