//! `backbone-sync`
//!
//! **Responsibility:** offline project queue and replay engine for the
//! Backbone dashboard.
//!
//! This crate provides:
//! - A local store for projects created offline and queued mutations
//!   (embedded SQLite, falling back to a flat JSON file)
//! - A connectivity probe fed by the host, with transition listeners
//! - A sync service that replays offline work against the remote database
//! - A background worker driving passes on reconnect and on a timer
//!
//! The remote database stays the authority; nothing here resolves
//! conflicts or pulls remote changes down.

pub mod collections;
pub mod config;
pub mod connectivity;
pub mod projects;
pub mod remote;
pub mod store;
pub mod sync_manager;
pub mod sync_worker;
pub mod types;

pub use collections::{CollectionTable, FallbackRemote};
pub use config::SyncConfig;
pub use connectivity::{ConnectivityProbe, ConnectivityState, TransitionListener};
pub use projects::{CreateOutcome, MutationOutcome, ProjectClient, ProjectDraft, ProjectError};
pub use remote::{HttpRemoteStore, InMemoryRemoteStore, RemoteError, RemoteStore};
pub use store::{OfflineStore, StoreBackend};
pub use sync_manager::{SyncOptions, SyncService};
pub use sync_worker::{SyncWorker, WorkerHandle};
pub use types::{
    MutationKind, PassOutcome, PendingProject, SyncQueueItem, SyncReport, SyncState, SyncStatus,
    SyncTrigger,
};
