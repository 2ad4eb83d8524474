//! Sync command handlers

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use notesync_core::observer::{Notification, Payload, ResultCode, Topic};
use notesync_core::sync::{
    spawn_scheduler, Connectivity, CycleOutcome, SchedulerConfig, SyncTrigger, TcpProbe,
};
use notesync_core::{Config, Store};

use crate::output::Output;

/// How often `watch` probes the network for a reconnect
const PROBE_INTERVAL: Duration = Duration::from_secs(15);

const OBSERVER_NAME: &str = "cli";

fn ensure_configured(config: &Config) -> Result<()> {
    if !config.sync_configured() {
        bail!(
            "Sync is not configured. Set it up with:\n  \
             notesync config set api_url https://notes.example.com/api\n  \
             notesync user <user-id>"
        );
    }
    Ok(())
}

/// Run one sync cycle
pub async fn sync(store: &Store, output: &Output) -> Result<()> {
    ensure_configured(store.config())?;

    let orchestrator = store.orchestrator()?;
    if !output.is_quiet() && !output.is_json() {
        store
            .bus()
            .register(&[Topic::Conflict], OBSERVER_NAME, print_conflict);
    }

    output.message("Syncing...");
    let outcome = orchestrator.run_cycle(SyncTrigger::Manual).await;
    store.bus().unregister(&[Topic::Conflict], OBSERVER_NAME);

    output.print_outcome(&outcome);
    match outcome {
        CycleOutcome::Completed(report) if !report.succeeded() => bail!("Sync finished with errors"),
        _ => Ok(()),
    }
}

/// Sync quietly (for auto-sync) - no output on success
pub async fn sync_quiet(store: &Store) -> Result<()> {
    let config = store.config();
    if !config.sync_enabled || !config.sync_configured() {
        return Ok(());
    }

    let orchestrator = store.orchestrator()?;
    match orchestrator.run_cycle(SyncTrigger::Manual).await {
        CycleOutcome::Completed(report) if !report.succeeded() => {
            bail!("{} entry(s) failed", report.failed)
        }
        outcome => {
            debug!(?outcome, "Auto-sync finished");
            Ok(())
        }
    }
}

/// Run the background scheduler until Ctrl-C
pub async fn watch(store: &Store, output: &Output) -> Result<()> {
    let config = store.config();
    ensure_configured(config)?;

    let orchestrator = Arc::new(store.orchestrator()?);
    let api_url = config.api_url.clone().unwrap_or_default();
    let probe = TcpProbe::for_url(&api_url, config.request_timeout())
        .context("Invalid API URL")?
        .metered(config.metered);

    if !output.is_quiet() {
        store
            .bus()
            .register(&[Topic::Sync, Topic::Conflict], OBSERVER_NAME, print_progress);
    }

    let scheduler = SchedulerConfig::from_config(config);
    output.message(&format!(
        "Watching for changes every {}s. Press Ctrl-C to stop.",
        scheduler.interval.as_secs()
    ));
    let handle = spawn_scheduler(orchestrator, scheduler);

    let mut probe_tick = tokio::time::interval(PROBE_INTERVAL);
    let mut online = probe.check().await.is_connected();

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = probe_tick.tick() => {
                let now_online = probe.check().await.is_connected();
                if now_online && !online {
                    info!("Connectivity restored");
                    handle.connectivity_restored().await;
                }
                online = now_online;
            }
        }
    }

    output.message("Stopping...");
    handle.shutdown().await;
    store
        .bus()
        .unregister(&[Topic::Sync, Topic::Conflict], OBSERVER_NAME);
    Ok(())
}

fn print_conflict(notification: &Notification) -> Result<()> {
    if let Payload::Conflict {
        entry_id, fields, ..
    } = &notification.payload
    {
        let fields: Vec<_> = fields.iter().map(|f| f.as_str()).collect();
        println!(
            "⚠ Conflict on {} ({})",
            &entry_id.to_string()[..8],
            fields.join(", ")
        );
    }
    Ok(())
}

fn print_progress(notification: &Notification) -> Result<()> {
    match (&notification.code, &notification.payload) {
        (ResultCode::SyncStart, _) => println!("Syncing..."),
        (ResultCode::SyncPendingStart, Payload::Message { text }) => {
            println!("Sync deferred: {}", text)
        }
        (ResultCode::SyncSuccess, Payload::Report(report)) => println!(
            "✓ Synced: {} added, {} updated, {} deleted, {} pulled",
            report.added, report.updated, report.deleted, report.pulled
        ),
        (ResultCode::SyncFailed, Payload::Report(report)) => println!(
            "⚠ Sync failed: {} entry(s) failed{}",
            report.failed,
            if report.pull_failed {
                ", remote unavailable"
            } else {
                ""
            }
        ),
        (ResultCode::ConflictDetected, _) => print_conflict(notification)?,
        _ => {}
    }
    Ok(())
}
