//! Sync engine
//!
//! Keeps the local database consistent with the remote notes service.
//!
//! ## Flow
//!
//! 1. Local writes mark entries as pending
//! 2. A trigger (tick, reconnect, manual) starts a cycle
//! 3. Pending entries are pushed where the remote hasn't moved
//! 4. The remote state is pulled and reconciled with the three-way resolver
//! 5. The cycle is recorded in the ledger and published on the `SYNC` topic
//!
//! ## Usage
//!
//! ```ignore
//! let orchestrator = Arc::new(Orchestrator::new(db, remote, connectivity, bus, options));
//! let handle = spawn_scheduler(orchestrator, SchedulerConfig::from_config(&config));
//! handle.sync_now().await;
//! ```

pub mod network;
pub mod orchestrator;
pub mod remote;
pub mod resolver;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use network::{Connectivity, NetworkType, TcpProbe};
pub use orchestrator::{
    CancelHandle, CycleOutcome, CycleReport, Orchestrator, SyncError, SyncOptions, SyncPhase,
    SyncTrigger,
};
pub use remote::{RemoteApi, RemoteError, RemoteNote, RestClient};
pub use resolver::{resolve, Resolution, Version};
pub use scheduler::{spawn_scheduler, SchedulerCommand, SchedulerConfig, SchedulerHandle};
