//! Command handlers

pub mod config;
pub mod conflicts;
pub mod entry;
pub mod history;
pub mod mock;
pub mod status;
pub mod sync;
pub mod transfer;
pub mod user;

use anyhow::{bail, Result};
use uuid::Uuid;

use notesync_core::{EntryQuery, Store};

/// Parse an entry ID (supports full UUID or prefix)
pub fn parse_entry_id(id: &str, store: &Store) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return Ok(uuid);
    }

    let entries = store.query(&EntryQuery::new())?;
    let matches: Vec<_> = entries
        .iter()
        .filter(|e| e.id.to_string().starts_with(id))
        .collect();

    match matches.len() {
        0 => bail!("No entry found matching: {}", id),
        1 => Ok(matches[0].id),
        _ => {
            eprintln!("Multiple entries match '{}':", id);
            for entry in &matches {
                eprintln!("  {} - {}", entry.id, entry.title);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}
