//! Entry command handlers

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use notesync_core::models::DEFAULT_COLOR;
use notesync_core::{Entry, EntryFilter, Store};

use super::parse_entry_id;
use crate::editor::{confirm, edit_text, prompt_with_default};
use crate::output::Output;

/// Filter flags of `notesync list`
#[derive(Debug, Default)]
pub struct ListArgs {
    pub text: Option<String>,
    pub color: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub sort: Option<String>,
    pub desc: bool,
}

/// Create a new entry
pub fn add(
    store: &Store,
    title: String,
    description: Option<String>,
    color: Option<String>,
    output: &Output,
) -> Result<()> {
    let mut entry = Entry::new(title);
    if let Some(description) = description {
        entry.description = description;
    }
    entry.color = color.unwrap_or_else(|| DEFAULT_COLOR.to_string());

    store.add_entry(&mut entry).context("Failed to create entry")?;

    output.success(&format!("Created entry: {}", entry.id));
    output.print_entry(&entry);
    Ok(())
}

/// List entries, optionally filtered
pub fn list(store: &Store, args: ListArgs, output: &Output) -> Result<()> {
    let created_between = match (&args.from, &args.to) {
        (None, None) => None,
        (from, to) => {
            let from = match from {
                Some(day) => start_of_day(day)?,
                None => Utc
                    .timestamp_opt(0, 0)
                    .single()
                    .ok_or_else(|| anyhow!("Invalid epoch"))?,
            };
            let to = match to {
                Some(day) => end_of_day(day)?,
                None => Utc::now(),
            };
            Some((from, to))
        }
    };

    let filter = EntryFilter {
        text: args.text,
        color: args.color,
        created_between,
        sort: args.sort,
        descending: args.desc,
    };

    let entries = store.list(&filter)?;
    output.print_entries(&entries);
    Ok(())
}

/// Show a single entry
pub fn show(store: &Store, id: String, output: &Output) -> Result<()> {
    let uuid = parse_entry_id(&id, store)?;

    let entry = store
        .get_entry(uuid)?
        .ok_or_else(|| anyhow!("Entry not found: {}", id))?;
    store.mark_viewed(uuid)?;

    output.print_entry(&entry);
    Ok(())
}

/// Edit an entry
///
/// With neither `title` nor `description` given, prompts for the title and
/// opens the editor for the description.
pub fn edit(
    store: &Store,
    id: String,
    title: Option<String>,
    description: Option<String>,
    output: &Output,
) -> Result<()> {
    let uuid = parse_entry_id(&id, store)?;

    let current = store
        .get_entry(uuid)?
        .ok_or_else(|| anyhow!("Entry not found: {}", id))?;

    let (title, description) = if title.is_none() && description.is_none() {
        if !output.should_prompt() {
            bail!("Nothing to change. Pass --title or --description.");
        }
        println!("Editing entry: {}", current.id);
        println!("Press Enter to keep current value, or type new value.\n");

        let title = prompt_with_default("Title", &current.title)?;
        let new_description = edit_text(&current.description)?;
        let description = (new_description != current.description).then_some(new_description);
        (title, description)
    } else {
        (title, description)
    };

    // The editor may stay open across a sync; only the changed fields go back
    let entry = store
        .edit_entry(uuid, |entry| {
            if let Some(title) = title {
                entry.set_title(title);
            }
            if let Some(description) = description {
                entry.set_description(description);
            }
        })
        .context("Failed to update entry")?;

    output.success("Entry updated");
    output.print_entry(&entry);
    Ok(())
}

/// Delete an entry
pub fn delete(store: &Store, id: String, force: bool, output: &Output) -> Result<()> {
    let uuid = parse_entry_id(&id, store)?;

    let entry = store
        .get_entry(uuid)?
        .ok_or_else(|| anyhow!("Entry not found: {}", id))?;

    if !force && output.should_prompt() {
        println!(
            "Delete entry: {} - {}",
            &entry.id.to_string()[..8],
            entry.title
        );
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store.delete_entry(uuid).context("Failed to delete entry")?;

    output.success(&format!("Deleted entry: {}", uuid));
    Ok(())
}

/// Change an entry's color
pub fn color(store: &Store, id: String, color: String, output: &Output) -> Result<()> {
    let uuid = parse_entry_id(&id, store)?;

    if !store.set_color(uuid, &color)? {
        bail!("Invalid color '{}'. Use #RRGGBB, e.g. #FFF475", color);
    }

    output.success(&format!("Set color {}", color));
    Ok(())
}

/// Move an entry in the manual order
pub fn move_to(store: &Store, id: String, position: i64, output: &Output) -> Result<()> {
    let uuid = parse_entry_id(&id, store)?;
    store.move_entry(uuid, position)?;
    output.success(&format!("Moved entry to position {}", position));
    Ok(())
}

fn parse_day(day: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", day))
}

fn start_of_day(day: &str) -> Result<DateTime<Utc>> {
    parse_day(day)?
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .ok_or_else(|| anyhow!("Invalid date '{}'", day))
}

fn end_of_day(day: &str) -> Result<DateTime<Utc>> {
    parse_day(day)?
        .and_hms_milli_opt(23, 59, 59, 999)
        .map(|t| t.and_utc())
        .ok_or_else(|| anyhow!("Invalid date '{}'", day))
}
