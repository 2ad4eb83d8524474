//! NoteSync CLI
//!
//! Command-line interface for NoteSync - offline-first notes with sync.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use notesync_core::{ConflictChoice, Config, StorageError, Store};

mod commands;
mod editor;
mod output;

use commands::entry::ListArgs;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "notesync")]
#[command(about = "NoteSync - Offline-first notes with sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use a different config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new entry
    #[command(alias = "create")]
    Add {
        /// Entry title
        title: String,
        /// Entry body
        #[arg(short, long)]
        description: Option<String>,
        /// Color as #RRGGBB
        #[arg(short, long)]
        color: Option<String>,
    },
    /// List entries
    #[command(alias = "ls")]
    List {
        /// Match text in title or description
        #[arg(short, long)]
        text: Option<String>,
        /// Only entries with this color
        #[arg(short, long)]
        color: Option<String>,
        /// Created on or after this day (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Created on or before this day (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
        /// Sort column (title, created, edited, viewed, position, color)
        #[arg(short, long)]
        sort: Option<String>,
        /// Sort descending
        #[arg(long)]
        desc: bool,
    },
    /// Show entry details
    Show {
        /// Entry ID (full UUID or prefix)
        id: String,
    },
    /// Edit an entry
    Edit {
        /// Entry ID (full UUID or prefix)
        id: String,
        /// New title
        #[arg(short = 'T', long)]
        title: Option<String>,
        /// New body (opens editor if neither flag is given)
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Delete an entry
    #[command(alias = "delete")]
    Rm {
        /// Entry ID (full UUID or prefix)
        id: String,
        /// Don't ask for confirmation
        #[arg(short, long)]
        force: bool,
    },
    /// Change an entry's color
    Color {
        /// Entry ID (full UUID or prefix)
        id: String,
        /// Color as #RRGGBB
        color: String,
    },
    /// Move an entry in the manual order
    Move {
        /// Entry ID (full UUID or prefix)
        id: String,
        /// New position
        position: i64,
    },
    /// Sync with the remote notes service
    Sync,
    /// Keep syncing in the background until Ctrl-C
    Watch,
    /// Show sync history
    History {
        /// Show at most this many records
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Clear the history
        #[arg(long)]
        clear: bool,
        /// Don't ask for confirmation when clearing
        #[arg(short, long)]
        force: bool,
    },
    /// List or resolve sync conflicts
    Conflicts {
        #[command(subcommand)]
        command: Option<ConflictCommands>,
    },
    /// Generate or clear mock entries
    Mock {
        #[command(subcommand)]
        command: MockCommands,
    },
    /// Export entries to a JSON file
    Export {
        /// Target file
        path: PathBuf,
    },
    /// Import entries from a JSON file
    Import {
        /// Source file
        path: PathBuf,
    },
    /// Switch the remote user (resets sync state)
    User {
        /// User ID, omit to clear
        user_id: Option<String>,
        /// Don't ask for confirmation
        #[arg(short, long)]
        force: bool,
    },
    /// Show status (counts, sync state)
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConflictCommands {
    /// List open conflicts
    #[command(alias = "ls")]
    List,
    /// Settle a conflict
    Resolve {
        /// Entry ID (full UUID or prefix)
        id: String,
        /// Which version to keep
        #[arg(long, value_enum)]
        keep: Side,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Local,
    Remote,
}

impl From<Side> for ConflictChoice {
    fn from(side: Side) -> Self {
        match side {
            Side::Local => ConflictChoice::KeepLocal,
            Side::Remote => ConflictChoice::KeepRemote,
        }
    }
}

#[derive(Subcommand)]
enum MockCommands {
    /// Generate mock entries
    Generate {
        /// Number of entries
        #[arg(default_value_t = 10)]
        count: usize,
    },
    /// Delete all mock entries
    Clear,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, api_url, sync_enabled, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let result = run(Cli::parse()).await;
    if let Err(e) = &result {
        print_storage_hint(e);
    }
    result
}

async fn run(cli: Cli) -> Result<()> {
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Commands that don't need the store
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), &output);
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    init_logging(&config, cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(Config::config_file_path);
    let mut store = Store::open_with_config(config)?.with_config_path(config_path);

    let is_write = matches!(
        &cli.command,
        Commands::Add { .. }
            | Commands::Edit { .. }
            | Commands::Rm { .. }
            | Commands::Color { .. }
            | Commands::Import { .. }
            | Commands::Mock { .. }
    );

    let result = match cli.command {
        Commands::Add {
            title,
            description,
            color,
        } => commands::entry::add(&store, title, description, color, &output),
        Commands::List {
            text,
            color,
            from,
            to,
            sort,
            desc,
        } => commands::entry::list(
            &store,
            ListArgs {
                text,
                color,
                from,
                to,
                sort,
                desc,
            },
            &output,
        ),
        Commands::Show { id } => commands::entry::show(&store, id, &output),
        Commands::Edit {
            id,
            title,
            description,
        } => commands::entry::edit(&store, id, title, description, &output),
        Commands::Rm { id, force } => commands::entry::delete(&store, id, force, &output),
        Commands::Color { id, color } => commands::entry::color(&store, id, color, &output),
        Commands::Move { id, position } => {
            commands::entry::move_to(&store, id, position, &output)
        }
        Commands::Sync => commands::sync::sync(&store, &output).await,
        Commands::Watch => commands::sync::watch(&store, &output).await,
        Commands::History {
            limit,
            clear,
            force,
        } => {
            if clear {
                commands::history::clear(&store, force, &output)
            } else {
                commands::history::show(&store, limit, &output)
            }
        }
        Commands::Conflicts { command } => match command {
            Some(ConflictCommands::List) | None => commands::conflicts::list(&store, &output),
            Some(ConflictCommands::Resolve { id, keep }) => {
                commands::conflicts::resolve(&store, id, keep.into(), &output)
            }
        },
        Commands::Mock { command } => match command {
            MockCommands::Generate { count } => {
                commands::mock::generate(&store, count, &output)
            }
            MockCommands::Clear => commands::mock::clear(&store, &output),
        },
        Commands::Export { path } => commands::transfer::export(&store, path, &output),
        Commands::Import { path } => commands::transfer::import(&store, path, &output),
        Commands::User { user_id, force } => {
            commands::user::set(&mut store, user_id, force, &output)
        }
        Commands::Status => commands::status::show(&store, &output),
        Commands::Config { .. } => Ok(()), // Handled above
    };

    // Push changes right away when sync is on
    if is_write && result.is_ok() {
        auto_sync(&store, &output).await;
    }

    result
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Initialize logging to stderr, or to `log_file` when configured
///
/// `RUST_LOG` wins over `--verbose`.
fn init_logging(config: &Config, verbose: bool) {
    let log_level = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "notesync_core={},notesync_cli={}",
            log_level, log_level
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    let result = match &config.log_file {
        Some(path) => {
            let file = match OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not open log file {:?}: {}", path, e);
                    return;
                }
            };
            builder.with_ansi(false).with_writer(file).try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    if let Err(e) = result {
        eprintln!("Warning: Could not initialize logging: {}", e);
    }
}

/// Auto-sync if sync is enabled, reports errors without failing the command
async fn auto_sync(store: &Store, output: &Output) {
    if let Err(e) = commands::sync::sync_quiet(store).await {
        if !output.is_quiet() {
            eprintln!("⚠ Auto-sync failed: {:#}", e);
        }
    }
}

/// Point at a fix when the failure came from the storage layer
fn print_storage_hint(error: &anyhow::Error) {
    let Some(storage) = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<StorageError>())
    else {
        return;
    };

    if let Some(hint) = storage.recovery_suggestion() {
        eprintln!("Hint: {}", hint);
    }
    if storage.is_recoverable() {
        eprintln!("Nothing was changed; run the command again once fixed.");
    }
}
