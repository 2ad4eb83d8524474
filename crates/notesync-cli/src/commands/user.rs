//! User command handler

use anyhow::Result;

use notesync_core::Store;

use crate::editor::confirm;
use crate::output::Output;

/// Switch the remote user
///
/// Sync state is tied to the user, so everything is pushed again on the
/// next sync.
pub fn set(store: &mut Store, user_id: Option<String>, force: bool, output: &Output) -> Result<()> {
    if store.config().user_id == user_id {
        output.message("User unchanged.");
        return Ok(());
    }

    if !force && output.should_prompt() && store.config().user_id.is_some() {
        println!("Switching users resets sync state; all entries are pushed again.");
        if !confirm("Continue?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store.set_user(user_id.clone())?;

    match user_id {
        Some(id) => output.success(&format!("User set to {}", id)),
        None => output.success("User cleared"),
    }
    Ok(())
}
