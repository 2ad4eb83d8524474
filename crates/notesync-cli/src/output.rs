//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use notesync_core::{ConflictRecord, CycleOutcome, Entry, SyncRecord};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a single entry
    pub fn print_entry(&self, entry: &Entry) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", entry.id);
                println!("Title:    {}", entry.title);
                println!("Color:    {}", entry.color);
                println!("Position: {}", entry.position);
                println!("Created:  {}", entry.created_at.format("%Y-%m-%d %H:%M"));
                println!("Edited:   {}", entry.edited_at.format("%Y-%m-%d %H:%M"));
                println!(
                    "Sync:     {}",
                    match (&entry.sync_id, entry.pending) {
                        (None, _) => "not synced".to_string(),
                        (Some(id), true) => format!("{} (pending)", id),
                        (Some(id), false) => id.clone(),
                    }
                );
                if !entry.description.is_empty() {
                    println!();
                    println!("{}", entry.description);
                }
            }
            OutputFormat::Json => print_json(entry),
            OutputFormat::Quiet => {
                println!("{}", entry.id);
            }
        }
    }

    /// Print a list of entries
    pub fn print_entries(&self, entries: &[Entry]) {
        match self.format {
            OutputFormat::Human => {
                if entries.is_empty() {
                    println!("No entries found.");
                    return;
                }
                for entry in entries {
                    let pending = if entry.pending { " *" } else { "" };
                    println!(
                        "{} | {} | {}{} | {}",
                        &entry.id.to_string()[..8],
                        entry.color,
                        truncate(&entry.title, 35),
                        pending,
                        truncate_line(&entry.description, 40)
                    );
                }
                println!("\n{} entry(s)", entries.len());
            }
            OutputFormat::Json => print_json(&entries),
            OutputFormat::Quiet => {
                for entry in entries {
                    println!("{}", entry.id);
                }
            }
        }
    }

    /// Print sync ledger records
    pub fn print_records(&self, records: &[SyncRecord]) {
        match self.format {
            OutputFormat::Human => {
                if records.is_empty() {
                    println!("No sync history.");
                    return;
                }
                for record in records {
                    println!(
                        "{} | {:<6} | {:<8} | {}",
                        record.finished_at.format("%Y-%m-%d %H:%M:%S"),
                        record.action,
                        record.status,
                        record.amount
                    );
                }
                println!("\n{} record(s)", records.len());
            }
            OutputFormat::Json => print_json(&records),
            OutputFormat::Quiet => {
                for record in records {
                    println!("{}", record.status);
                }
            }
        }
    }

    /// Print open conflicts next to the local entries they belong to
    pub fn print_conflicts(&self, conflicts: &[(ConflictRecord, Option<Entry>)]) {
        match self.format {
            OutputFormat::Human => {
                if conflicts.is_empty() {
                    println!("No open conflicts.");
                    return;
                }
                for (conflict, local) in conflicts {
                    println!("────────────────────────────────────────");
                    println!(
                        "Entry: {}  Detected: {}",
                        &conflict.entry_id.to_string()[..8],
                        conflict.detected_at.format("%Y-%m-%d %H:%M")
                    );
                    for field in &conflict.fields {
                        let mine = local
                            .as_ref()
                            .map(|e| e.content().field(*field).to_string())
                            .unwrap_or_default();
                        println!("  {}:", field);
                        println!("    local:  {}", truncate_line(&mine, 60));
                        println!(
                            "    remote: {}",
                            truncate_line(conflict.remote.field(*field), 60)
                        );
                    }
                }
                println!("\n{} conflict(s)", conflicts.len());
            }
            OutputFormat::Json => {
                let items: Vec<_> = conflicts
                    .iter()
                    .map(|(conflict, local)| {
                        serde_json::json!({
                            "conflict": conflict,
                            "local": local.as_ref().map(|e| e.content()),
                        })
                    })
                    .collect();
                print_json(&items);
            }
            OutputFormat::Quiet => {
                for (conflict, _) in conflicts {
                    println!("{}", conflict.entry_id);
                }
            }
        }
    }

    /// Print the outcome of a sync cycle
    pub fn print_outcome(&self, outcome: &CycleOutcome) {
        match (self.format, outcome) {
            (OutputFormat::Json, CycleOutcome::Completed(report)) => print_json(report),
            (OutputFormat::Json, CycleOutcome::Deferred(network)) => {
                print_json(&serde_json::json!({"deferred": network.to_string()}))
            }
            (OutputFormat::Json, CycleOutcome::Coalesced) => {
                print_json(&serde_json::json!({"coalesced": true}))
            }
            (OutputFormat::Human, CycleOutcome::Completed(report)) => {
                let mark = if report.succeeded() { "✓" } else { "⚠" };
                println!(
                    "{} Sync {}: {} added, {} updated, {} deleted, {} pulled",
                    mark,
                    report.status(),
                    report.added,
                    report.updated,
                    report.deleted,
                    report.pulled
                );
                if report.conflicts > 0 {
                    println!(
                        "  {} conflict(s), see `notesync conflicts`",
                        report.conflicts
                    );
                }
                if report.failed > 0 {
                    println!("  {} entry(s) failed, retried next sync", report.failed);
                }
                if report.pull_failed {
                    println!("  Could not fetch remote notes");
                }
                if report.cancelled {
                    println!("  Cancelled");
                }
            }
            (OutputFormat::Human, CycleOutcome::Deferred(network)) => {
                println!("Sync deferred: no usable network ({})", network);
            }
            (OutputFormat::Human, CycleOutcome::Coalesced) => {
                println!("Sync already running");
            }
            (OutputFormat::Quiet, CycleOutcome::Completed(report)) => {
                println!("{}", report.status());
            }
            (OutputFormat::Quiet, _) => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}
