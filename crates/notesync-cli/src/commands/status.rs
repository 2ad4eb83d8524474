//! Status command handler

use anyhow::Result;

use notesync_core::Store;

use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(store: &Store, output: &Output) -> Result<()> {
    let config = store.config();
    let entries = store.entry_count()?;
    let pending = store.pending_count()?;
    let conflicts = store.conflicts()?.len();
    let last = store.last_sync()?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "sync_enabled": config.sync_enabled,
                    "api_url": config.api_url,
                    "user_id": config.user_id,
                    "database": config.sqlite_path(),
                    "counts": {
                        "entries": entries,
                        "pending": pending,
                        "conflicts": conflicts
                    },
                    "last_sync": last
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", pending);
        }
        OutputFormat::Human => {
            println!("NoteSync Status");
            println!("===============");
            println!();
            println!("Sync:");
            println!(
                "  Status: {}",
                if config.sync_enabled {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            println!(
                "  Server: {}",
                config.api_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  User:   {}",
                config.user_id.as_deref().unwrap_or("(not set)")
            );
            match last {
                Some(record) => println!(
                    "  Last:   {} {} ({})",
                    record.finished_at.format("%Y-%m-%d %H:%M"),
                    record.action,
                    record.status
                ),
                None => println!("  Last:   never"),
            }
            println!();
            println!("Storage:");
            println!("  Database: {}", config.sqlite_path().display());
            println!();
            println!("Contents:");
            println!("  Entries:   {}", entries);
            println!("  Pending:   {}", pending);
            println!("  Conflicts: {}", conflicts);
        }
    }

    Ok(())
}
