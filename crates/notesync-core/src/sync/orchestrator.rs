//! Sync orchestrator
//!
//! Runs one sync cycle at a time:
//!
//! ```text
//! Idle -> CheckingNetwork -> PushingLocal -> PullingRemote -> Reconciling
//!      -> Succeeded | Failed -> Idle
//! ```
//!
//! The push phase only fast-forwards: an entry is pushed when the remote
//! still matches the last-synced snapshot. Everything else (remote edits,
//! remote deletes, diverged edits) is left to the reconcile phase, which
//! runs the three-way resolver against the pulled remote state.
//!
//! The database lock is only taken inside synchronous helpers and never
//! held across an `.await`.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::network::{Connectivity, NetworkType};
use super::remote::{RemoteApi, RemoteError, RemoteNote};
use super::resolver::{resolve, Resolution, Version};
use crate::config::Config;
use crate::ledger::{SyncAction, SyncRecord, SyncStatus};
use crate::models::{now_millis, ConflictRecord, Entry, EntryContent, Snapshot};
use crate::observer::{ObserverBus, Payload, ResultCode, Topic};
use crate::storage::{Database, StorageError, StorageResult};

/// Errors that abort a single sync step
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Sync cycle was cancelled")]
    Cancelled,

    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Where the orchestrator currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    CheckingNetwork,
    PushingLocal,
    PullingRemote,
    Reconciling,
    Succeeded,
    Failed,
}

/// Why a cycle was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    ConnectivityRestored,
    Periodic,
    Manual,
}

/// Counters of a finished cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub trigger: SyncTrigger,
    /// Entries created remotely
    pub added: u32,
    /// Entries updated remotely
    pub updated: u32,
    /// Entries deleted (remotely, or locally before ever reaching the remote)
    pub deleted: u32,
    /// Entries changed by the pull/reconcile phase
    pub pulled: u32,
    /// Conflicts raised this cycle
    pub conflicts: u32,
    /// Entries that failed this cycle
    pub failed: u32,
    pub pull_failed: bool,
    pub cancelled: bool,
}

impl CycleReport {
    fn new(trigger: SyncTrigger) -> Self {
        Self {
            trigger,
            added: 0,
            updated: 0,
            deleted: 0,
            pulled: 0,
            conflicts: 0,
            failed: 0,
            pull_failed: false,
            cancelled: false,
        }
    }

    /// Whether the cycle finished without failures
    pub fn succeeded(&self) -> bool {
        self.failed == 0 && !self.pull_failed && !self.cancelled
    }

    /// Ledger status of the cycle summary
    pub fn status(&self) -> SyncStatus {
        if !self.succeeded() {
            SyncStatus::Failed
        } else if self.conflicts > 0 {
            SyncStatus::Conflict
        } else {
            SyncStatus::Success
        }
    }
}

/// Result of [`Orchestrator::run_cycle`]
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Another cycle was already running
    Coalesced,
    /// No usable network; nothing was attempted
    Deferred(NetworkType),
    /// The cycle ran (possibly with failures)
    Completed(CycleReport),
}

/// Cancels the running cycle
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Tunables for the orchestrator
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Timeout per remote request
    pub request_timeout: Duration,
    /// Retries after a transient remote error
    pub retries: u32,
    /// Pause before a retry
    pub retry_delay: Duration,
    /// Allow cycles on metered connections
    pub sync_on_mobile: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            retries: 1,
            retry_delay: Duration::from_millis(500),
            sync_on_mobile: true,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            sync_on_mobile: config.sync_on_mobile,
            ..Self::default()
        }
    }
}

/// Per-action push counters, turned into ledger records
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    attempted: u32,
    failed: u32,
}

#[derive(Debug, Default)]
struct PushTallies {
    add: Tally,
    update: Tally,
    delete: Tally,
}

impl PushTallies {
    fn get_mut(&mut self, action: SyncAction) -> &mut Tally {
        match action {
            SyncAction::Add => &mut self.add,
            SyncAction::Update => &mut self.update,
            SyncAction::Delete | SyncAction::Pull => &mut self.delete,
        }
    }
}

/// Releases the single-flight flag when a cycle ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives sync cycles between the local database and the remote API
pub struct Orchestrator {
    db: Arc<Mutex<Database>>,
    remote: Arc<dyn RemoteApi>,
    connectivity: Arc<dyn Connectivity>,
    bus: Arc<ObserverBus>,
    options: SyncOptions,
    running: AtomicBool,
    cancel: CancelHandle,
    phase_tx: watch::Sender<SyncPhase>,
}

impl Orchestrator {
    pub fn new(
        db: Arc<Mutex<Database>>,
        remote: Arc<dyn RemoteApi>,
        connectivity: Arc<dyn Connectivity>,
        bus: Arc<ObserverBus>,
        options: SyncOptions,
    ) -> Self {
        let (phase_tx, _) = watch::channel(SyncPhase::Idle);
        Self {
            db,
            remote,
            connectivity,
            bus,
            options,
            running: AtomicBool::new(false),
            cancel: CancelHandle::default(),
            phase_tx,
        }
    }

    /// Current phase
    pub fn phase(&self) -> SyncPhase {
        *self.phase_tx.borrow()
    }

    /// Watch phase changes
    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.phase_tx.subscribe()
    }

    /// Handle that cancels the running cycle
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one sync cycle
    ///
    /// Returns [`CycleOutcome::Coalesced`] right away when a cycle is
    /// already running.
    pub async fn run_cycle(&self, trigger: SyncTrigger) -> CycleOutcome {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(?trigger, "Sync already running, coalescing trigger");
            return CycleOutcome::Coalesced;
        }
        let _guard = RunningGuard(&self.running);
        self.cancel.reset();

        self.set_phase(SyncPhase::CheckingNetwork);
        let network = self.connectivity.check().await;
        let usable = match network {
            NetworkType::Wifi => true,
            NetworkType::Mobile => self.options.sync_on_mobile,
            NetworkType::None => false,
        };
        if !usable {
            info!(%network, "No usable network, sync deferred");
            self.bus.notify(
                Topic::Sync,
                ResultCode::SyncPendingStart,
                Payload::message(format!("waiting for network (current: {})", network)),
            );
            self.set_phase(SyncPhase::Failed);
            self.set_phase(SyncPhase::Idle);
            return CycleOutcome::Deferred(network);
        }

        info!(?trigger, %network, "Starting sync cycle");
        self.bus
            .notify(Topic::Sync, ResultCode::SyncStart, Payload::None);

        let mut report = CycleReport::new(trigger);
        let mut failed_ids = HashSet::new();

        self.set_phase(SyncPhase::PushingLocal);
        self.push_local(&mut report, &mut failed_ids).await;

        if !report.cancelled {
            self.set_phase(SyncPhase::PullingRemote);
            match self.call(|| self.remote.list_notes()).await {
                Ok(notes) => {
                    self.set_phase(SyncPhase::Reconciling);
                    self.reconcile(notes, &failed_ids, &mut report).await;
                }
                Err(SyncError::Cancelled) => report.cancelled = true,
                Err(e) => {
                    warn!("Pulling remote notes failed: {}", e);
                    report.pull_failed = true;
                }
            }
        }

        self.append_record(SyncRecord::new(
            SyncAction::Pull,
            report.status(),
            report.pulled,
        ));

        let (phase, code) = if report.succeeded() {
            (SyncPhase::Succeeded, ResultCode::SyncSuccess)
        } else {
            (SyncPhase::Failed, ResultCode::SyncFailed)
        };
        info!(
            added = report.added,
            updated = report.updated,
            deleted = report.deleted,
            pulled = report.pulled,
            conflicts = report.conflicts,
            failed = report.failed,
            cancelled = report.cancelled,
            "Sync cycle finished"
        );
        self.bus
            .notify(Topic::Sync, code, Payload::Report(report.clone()));
        self.set_phase(phase);
        self.set_phase(SyncPhase::Idle);

        CycleOutcome::Completed(report)
    }

    // ==================== Push ====================

    async fn push_local(&self, report: &mut CycleReport, failed_ids: &mut HashSet<Uuid>) {
        let pending = match self.with_db(|db| db.pending_entries()) {
            Ok(pending) => pending,
            Err(e) => {
                self.storage_failure(None, &e);
                report.failed += 1;
                return;
            }
        };
        debug!(count = pending.len(), "Pushing pending entries");

        let mut tallies = PushTallies::default();
        for entry in pending {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let action = push_action(&entry);
            match self.push_entry(&entry).await {
                Ok(true) => {
                    tallies.get_mut(action).attempted += 1;
                    match action {
                        SyncAction::Add => report.added += 1,
                        SyncAction::Update => report.updated += 1,
                        _ => report.deleted += 1,
                    }
                }
                Ok(false) => debug!(id = %entry.id, "Remote diverged, left for reconcile"),
                Err(SyncError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    let tally = tallies.get_mut(action);
                    tally.attempted += 1;
                    tally.failed += 1;
                    report.failed += 1;
                    failed_ids.insert(entry.id);
                    self.entry_failure(&entry, &e);
                }
            }
        }

        for (action, tally) in [
            (SyncAction::Add, tallies.add),
            (SyncAction::Update, tallies.update),
            (SyncAction::Delete, tallies.delete),
        ] {
            if tally.attempted > 0 {
                let status = if tally.failed > 0 {
                    SyncStatus::Failed
                } else {
                    SyncStatus::Success
                };
                self.append_record(SyncRecord::new(action, status, tally.attempted));
            }
        }
    }

    /// Push one pending entry
    ///
    /// Returns `false` when the remote diverged and the entry has to go
    /// through the resolver.
    async fn push_entry(&self, entry: &Entry) -> Result<bool, SyncError> {
        let Some(sync_id) = entry.sync_id.clone() else {
            if entry.is_deleted() {
                debug!(id = %entry.id, "Dropping entry that never reached the remote");
                self.with_db(|db| db.purge_entry(entry.id))?;
                return Ok(true);
            }

            let content = entry.content();
            let new_id = self
                .call(|| self.remote.create_note(&content, entry.created_at))
                .await?;
            debug!(id = %entry.id, sync_id = %new_id, "Created remote note");

            if !self.commit_resolved(entry, &content, &new_id)? {
                // Deleted locally while the create was in flight
                self.call(|| self.remote.delete_note(&new_id)).await?;
            }
            return Ok(true);
        };

        let base = self.with_db(|db| db.snapshot(entry.id))?;
        let remote = self.call(|| self.remote.get_note(&sync_id)).await?;
        let Some(remote) = remote else {
            if entry.is_deleted() {
                self.with_db(|db| db.purge_entry(entry.id))?;
                return Ok(true);
            }
            return Ok(false);
        };

        let remote_content = remote.content();
        let fast_forward = base
            .as_ref()
            .map_or(true, |b| b.content.same_fields(&remote_content));
        if !fast_forward {
            return Ok(false);
        }

        if entry.is_deleted() {
            self.call(|| self.remote.delete_note(&sync_id)).await?;
            self.with_db(|db| db.purge_entry(entry.id))?;
            debug!(id = %entry.id, sync_id = %sync_id, "Deleted remote note");
            return Ok(true);
        }

        let content = entry.content();
        if !content.same_fields(&remote_content) {
            self.call(|| self.remote.update_note(&sync_id, &content))
                .await?;
            debug!(id = %entry.id, sync_id = %sync_id, "Updated remote note");
        }
        self.commit_resolved(entry, &content, &sync_id)?;
        Ok(true)
    }

    // ==================== Pull / reconcile ====================

    async fn reconcile(
        &self,
        notes: Vec<RemoteNote>,
        failed_ids: &HashSet<Uuid>,
        report: &mut CycleReport,
    ) {
        let remote_ids: HashSet<&str> = notes.iter().map(|n| n.id.as_str()).collect();

        for note in &notes {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                return;
            }

            let local = match self.with_db(|db| db.entry_by_sync_id(&note.id)) {
                Ok(local) => local,
                Err(e) => {
                    self.storage_failure(None, &e);
                    report.failed += 1;
                    continue;
                }
            };

            let result = match local {
                None => self.insert_remote(note, report),
                Some(entry) if failed_ids.contains(&entry.id) => continue,
                Some(entry) => {
                    self.reconcile_entry(&entry, Some(note), report)
                        .await
                }
            };

            if let Err(e) = result {
                if matches!(e, SyncError::Cancelled) {
                    report.cancelled = true;
                    return;
                }
                report.failed += 1;
                warn!(sync_id = %note.id, "Reconciling remote note failed: {}", e);
                if !matches!(e, SyncError::Remote(_)) {
                    self.storage_failure(None, &e);
                }
            }
        }

        // Local entries whose remote note disappeared
        let synced = match self.with_db(|db| db.synced_entries()) {
            Ok(synced) => synced,
            Err(e) => {
                self.storage_failure(None, &e);
                report.failed += 1;
                return;
            }
        };

        for entry in synced {
            let vanished = entry
                .sync_id
                .as_deref()
                .is_some_and(|id| !remote_ids.contains(id));
            if !vanished || failed_ids.contains(&entry.id) {
                continue;
            }
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                return;
            }

            match self.reconcile_entry(&entry, None, report).await {
                Ok(()) => {}
                Err(SyncError::Cancelled) => {
                    report.cancelled = true;
                    return;
                }
                Err(e) => {
                    report.failed += 1;
                    self.entry_failure(&entry, &e);
                }
            }
        }
    }

    /// Store a note that only exists remotely
    fn insert_remote(&self, note: &RemoteNote, report: &mut CycleReport) -> Result<(), SyncError> {
        let content = note.content();
        self.with_db(|db| {
            let mut entry = Entry::from_remote(note.id.clone(), &content, note.created_at());
            entry.position = db.max_position()? + 1;
            let snapshot = Snapshot {
                entry_id: entry.id,
                sync_id: note.id.clone(),
                content: content.clone(),
                synced_at: now_millis(),
            };
            db.commit_synced(&entry, &snapshot)
        })?;
        debug!(sync_id = %note.id, "Pulled new remote note");
        report.pulled += 1;
        Ok(())
    }

    /// Resolve a synced entry against its remote note (`None` = deleted)
    async fn reconcile_entry(
        &self,
        entry: &Entry,
        note: Option<&RemoteNote>,
        report: &mut CycleReport,
    ) -> Result<(), SyncError> {
        let Some(sync_id) = entry.sync_id.clone() else {
            return Ok(());
        };

        let (base, open_conflict) =
            self.with_db(|db| Ok((db.snapshot(entry.id)?, db.conflict(entry.id)?)))?;

        let remote_content = note.map(RemoteNote::content);
        if let (Some(conflict), Some(remote)) = (&open_conflict, &remote_content) {
            if conflict.remote.same_fields(remote) {
                // Still waiting for the user
                return Ok(());
            }
        }

        let local = match entry.deleted_at {
            Some(at) => Version::Deleted { at },
            None => Version::Present(entry.content()),
        };
        let remote = match &remote_content {
            Some(content) => Version::Present(content.clone()),
            None => Version::Deleted { at: now_millis() },
        };

        let resolution = resolve(base.as_ref(), &local, &remote);
        debug!(id = %entry.id, sync_id = %sync_id, resolution = resolution.label(), "Resolved entry");

        match resolution {
            Resolution::Unchanged => {
                let stale_base = match (&base, &remote_content) {
                    (Some(base), Some(remote)) => !base.content.same_fields(remote),
                    _ => true,
                };
                if entry.pending || stale_base || open_conflict.is_some() {
                    if let Some(remote) = &remote_content {
                        self.commit_resolved(entry, remote, &sync_id)?;
                    }
                }
            }
            Resolution::KeepRemote(content) => {
                self.commit_resolved(entry, &content, &sync_id)?;
                report.pulled += 1;
            }
            Resolution::KeepLocal(content) => {
                let target = if note.is_some() {
                    self.call(|| self.remote.update_note(&sync_id, &content))
                        .await?;
                    sync_id
                } else {
                    self.call(|| self.remote.create_note(&content, entry.created_at))
                        .await?
                };
                self.commit_resolved(entry, &content, &target)?;
                report.pulled += 1;
            }
            Resolution::Merge(content) => {
                self.call(|| self.remote.update_note(&sync_id, &content))
                    .await?;
                self.commit_resolved(entry, &content, &sync_id)?;
                report.pulled += 1;
            }
            Resolution::DeleteLocal => {
                self.with_db(|db| db.purge_entry(entry.id))?;
                report.pulled += 1;
            }
            Resolution::DeleteRemote => {
                self.call(|| self.remote.delete_note(&sync_id)).await?;
                self.with_db(|db| db.purge_entry(entry.id))?;
                report.pulled += 1;
            }
            Resolution::Conflict { fields } => {
                let Some(remote) = remote_content else {
                    return Ok(());
                };
                let conflict = ConflictRecord {
                    entry_id: entry.id,
                    sync_id: sync_id.clone(),
                    remote: remote.clone(),
                    fields: fields.clone(),
                    detected_at: now_millis(),
                };
                self.with_db(|db| {
                    db.save_conflict(&conflict)?;
                    if !entry.pending {
                        db.mark_pending(entry.id)?;
                    }
                    Ok(())
                })?;

                info!(id = %entry.id, fields = ?fields, "Conflict detected");
                report.conflicts += 1;
                self.bus.notify(
                    Topic::Conflict,
                    ResultCode::ConflictDetected,
                    Payload::Conflict {
                        entry_id: entry.id,
                        local: entry.content(),
                        remote,
                        fields,
                    },
                );
            }
        }

        Ok(())
    }

    /// Record that the remote now holds `content` under `sync_id`
    ///
    /// When the entry still matches `based_on` it takes `content` and stops
    /// being pending. When it was edited meanwhile it keeps the local edit
    /// and stays pending, with `content` as the new merge base.
    ///
    /// Returns `false` if the entry no longer exists.
    fn commit_resolved(
        &self,
        based_on: &Entry,
        content: &EntryContent,
        sync_id: &str,
    ) -> Result<bool, SyncError> {
        self.with_db(|db| {
            let Some(mut current) = db.get_entry(based_on.id)? else {
                return Ok(false);
            };

            let untouched = current.content() == based_on.content()
                && current.deleted_at == based_on.deleted_at;
            if untouched {
                current.apply_content(content);
                current.deleted_at = None;
                current.pending = false;
            } else {
                current.pending = true;
            }
            current.sync_id = Some(sync_id.to_string());

            let snapshot = Snapshot {
                entry_id: current.id,
                sync_id: sync_id.to_string(),
                content: content.clone(),
                synced_at: now_millis(),
            };
            db.commit_synced(&current, &snapshot)?;
            Ok(true)
        })
    }

    // ==================== Helpers ====================

    /// Call the remote with a timeout and retries on transient errors
    ///
    /// A result arriving after cancellation is discarded.
    async fn call<T, F, Fut>(&self, mut request: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let result = match tokio::time::timeout(self.options.request_timeout, request()).await
            {
                Ok(result) => result,
                Err(_) => Err(RemoteError::Timeout),
            };

            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.options.retries => {
                    attempt += 1;
                    warn!(attempt, "Transient remote error, retrying: {}", e);
                    tokio::time::sleep(self.options.retry_delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn with_db<T>(
        &self,
        f: impl FnOnce(&mut Database) -> StorageResult<T>,
    ) -> Result<T, SyncError> {
        let mut db = self.db.lock().map_err(|_| SyncError::LockPoisoned)?;
        Ok(f(&mut db)?)
    }

    fn append_record(&self, record: SyncRecord) {
        if let Err(e) = self.with_db(|db| db.append_record(&record)) {
            self.storage_failure(None, &e);
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase_tx.send_replace(phase);
    }

    fn entry_failure(&self, entry: &Entry, e: &SyncError) {
        match e {
            SyncError::Remote(remote) => {
                warn!(id = %entry.id, "Sync failed for entry: {}", remote);
            }
            other => self.storage_failure(Some(entry.id), other),
        }
    }

    fn storage_failure(&self, id: Option<Uuid>, e: &SyncError) {
        error!(id = ?id, "Storage error during sync: {}", e);
        self.bus.notify(
            Topic::Common,
            ResultCode::StorageFailure,
            Payload::message(e.to_string()),
        );
    }
}

fn push_action(entry: &Entry) -> SyncAction {
    match (entry.is_synced_once(), entry.is_deleted()) {
        (_, true) => SyncAction::Delete,
        (false, false) => SyncAction::Add,
        (true, false) => SyncAction::Update,
    }
}
