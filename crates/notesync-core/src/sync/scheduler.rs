//! Background sync scheduling
//!
//! Owns a task that starts cycles on a periodic tick, on explicit requests
//! and when connectivity comes back. Commands keep being handled while a
//! cycle runs, so a cycle can be cancelled and extra triggers coalesce.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::orchestrator::{CycleOutcome, Orchestrator, SyncTrigger};
use crate::config::Config;

/// Commands sent to the scheduler task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Start a cycle now
    SyncNow,
    /// The device came back online
    ConnectivityRestored,
    /// Cancel the running cycle
    Cancel,
    /// Stop the scheduler (cancels a running cycle)
    Shutdown,
}

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between periodic cycles
    pub interval: Duration,
    /// Run a cycle as soon as the scheduler starts
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            run_on_start: true,
        }
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.sync_interval(),
            ..Self::default()
        }
    }
}

/// Handle to control the scheduler task
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    outcome_rx: watch::Receiver<Option<CycleOutcome>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Request a cycle
    pub async fn sync_now(&self) -> bool {
        self.send(SchedulerCommand::SyncNow).await
    }

    /// Report that connectivity was restored
    pub async fn connectivity_restored(&self) -> bool {
        self.send(SchedulerCommand::ConnectivityRestored).await
    }

    /// Cancel the running cycle, if any
    pub async fn cancel(&self) -> bool {
        self.send(SchedulerCommand::Cancel).await
    }

    /// Watch the outcome of the latest cycle
    pub fn outcomes(&self) -> watch::Receiver<Option<CycleOutcome>> {
        self.outcome_rx.clone()
    }

    /// Stop the scheduler and wait for the task to end
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(SchedulerCommand::Shutdown).await;
        let _ = self.task.await;
    }

    async fn send(&self, command: SchedulerCommand) -> bool {
        self.command_tx.send(command).await.is_ok()
    }
}

/// Spawn the scheduler task
pub fn spawn_scheduler(orchestrator: Arc<Orchestrator>, config: SchedulerConfig) -> SchedulerHandle {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (outcome_tx, outcome_rx) = watch::channel(None);

    let task = tokio::spawn(scheduler_loop(orchestrator, config, command_rx, outcome_tx));

    SchedulerHandle {
        command_tx,
        outcome_rx,
        task,
    }
}

async fn scheduler_loop(
    orchestrator: Arc<Orchestrator>,
    config: SchedulerConfig,
    mut command_rx: mpsc::Receiver<SchedulerCommand>,
    outcome_tx: watch::Sender<Option<CycleOutcome>>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    if !config.run_on_start {
        // The first tick completes immediately
        ticker.tick().await;
    }

    info!(interval = ?config.interval, "Sync scheduler started");

    loop {
        let trigger = tokio::select! {
            _ = ticker.tick() => SyncTrigger::Periodic,
            cmd = command_rx.recv() => match cmd {
                Some(SchedulerCommand::SyncNow) => SyncTrigger::Manual,
                Some(SchedulerCommand::ConnectivityRestored) => SyncTrigger::ConnectivityRestored,
                Some(SchedulerCommand::Cancel) => {
                    debug!("Cancel requested while idle");
                    continue;
                }
                Some(SchedulerCommand::Shutdown) | None => break,
            },
        };

        let mut shutdown = false;
        let cycle = orchestrator.run_cycle(trigger);
        tokio::pin!(cycle);

        let outcome = loop {
            tokio::select! {
                outcome = &mut cycle => break outcome,
                cmd = command_rx.recv(), if !shutdown => match cmd {
                    Some(SchedulerCommand::Cancel) => orchestrator.cancel_handle().cancel(),
                    Some(SchedulerCommand::SyncNow) | Some(SchedulerCommand::ConnectivityRestored) => {
                        debug!("Sync already running, coalescing trigger");
                    }
                    Some(SchedulerCommand::Shutdown) | None => {
                        orchestrator.cancel_handle().cancel();
                        shutdown = true;
                    }
                },
            }
        };

        debug!(?outcome, "Scheduled cycle finished");
        outcome_tx.send_replace(Some(outcome));

        if shutdown {
            break;
        }
    }

    info!("Sync scheduler stopped");
}
