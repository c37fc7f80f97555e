//! Sync orchestrator: replays offline work against the remote database.
//!
//! A pass:
//! 1. Aborts unless the probe reports online and the remote answers a
//!    reachability request.
//! 2. Writes every pending project and marks it synced.
//! 3. Replays the sync queue oldest first, removing applied items and
//!    counting an attempt on failed ones.
//!
//! Failures never end a pass early; whatever is left is retried by the next
//! one. Only one pass runs at a time; requests arriving meanwhile are
//! dropped.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, watch};

use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityProbe, check_reachability};
use crate::remote::{RemoteError, RemoteStore};
use crate::store::OfflineStore;
use crate::types::{MutationAction, PROJECTS_COLLECTION, SyncQueueItem};

// Re-export from shared types module
pub use crate::types::{AbortReason, PassOutcome, SyncReport, SyncState, SyncStatus, SyncTrigger};

/// Tuning for [`SyncService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Budget for the pre-pass reachability request.
    pub probe_timeout: Duration,
    /// Items that reached this many failed attempts are kept but no longer
    /// replayed. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            probe_timeout: config.probe_timeout,
            max_attempts: config.max_attempts,
        }
    }
}

/// Replays pending projects and queued mutations.
pub struct SyncService {
    store: OfflineStore,
    remote: Arc<dyn RemoteStore>,
    probe: ConnectivityProbe,
    options: SyncOptions,
    pass_lock: Mutex<()>,
    state: watch::Sender<SyncState>,
    last_report: RwLock<Option<SyncReport>>,
}

impl SyncService {
    pub fn new(
        store: OfflineStore,
        remote: Arc<dyn RemoteStore>,
        probe: ConnectivityProbe,
        options: SyncOptions,
    ) -> Self {
        let initial = if probe.is_online() {
            SyncState::Idle
        } else {
            SyncState::Paused
        };
        let (state, _) = watch::channel(initial);

        Self {
            store,
            remote,
            probe,
            options,
            pass_lock: Mutex::new(()),
            state,
            last_report: RwLock::new(None),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn probe(&self) -> &ConnectivityProbe {
        &self.probe
    }

    pub fn store(&self) -> &OfflineStore {
        &self.store
    }

    /// Enter `Paused` after connectivity loss. A running pass finishes first
    /// and then settles into `Paused` itself.
    pub fn pause(&self) {
        self.state.send_if_modified(|state| match state {
            SyncState::Idle => {
                *state = SyncState::Paused;
                true
            }
            _ => false,
        });
    }

    /// Leave `Paused` once connectivity is back.
    pub fn resume(&self) {
        self.state.send_if_modified(|state| match state {
            SyncState::Paused => {
                *state = SyncState::Idle;
                true
            }
            _ => false,
        });
    }

    /// Run a pass now, unless one is already running.
    pub async fn force_sync(&self) -> PassOutcome {
        self.run_pass(SyncTrigger::Forced).await
    }

    pub async fn run_pass(&self, trigger: SyncTrigger) -> PassOutcome {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            tracing::debug!(?trigger, "sync pass already running, request dropped");
            return PassOutcome::Skipped;
        };

        self.state.send_replace(SyncState::Syncing);
        let report = self.pass(trigger).await;
        self.state.send_replace(if self.probe.is_online() {
            SyncState::Idle
        } else {
            SyncState::Paused
        });

        match self.last_report.write() {
            Ok(mut last) => *last = Some(report.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(report.clone()),
        }

        PassOutcome::Completed(report)
    }

    pub async fn status(&self) -> SyncStatus {
        let counts = self.store.counts().await;
        let last_report = match self.last_report.read() {
            Ok(last) => last.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        SyncStatus {
            state: self.state(),
            online: self.probe.is_online(),
            pending_projects: counts.pending_projects,
            queued_items: counts.queued_items,
            last_report,
        }
    }

    async fn pass(&self, trigger: SyncTrigger) -> SyncReport {
        let mut report = SyncReport::started(trigger);

        if !self.probe.is_online() {
            tracing::debug!(?trigger, "skipping sync pass: offline");
            report.aborted = Some(AbortReason::Offline);
            report.finished_at = Utc::now();
            return report;
        }

        if !check_reachability(self.remote.as_ref(), self.options.probe_timeout).await {
            tracing::info!(?trigger, "skipping sync pass: remote unreachable");
            report.aborted = Some(AbortReason::Unreachable);
            report.finished_at = Utc::now();
            return report;
        }

        tracing::info!(?trigger, "starting sync pass");
        self.sync_pending_projects(&mut report).await;
        self.drain_queue(&mut report).await;
        report.finished_at = Utc::now();

        tracing::info!(
            ?trigger,
            synced_projects = report.synced_projects.len(),
            failed_projects = report.failed_projects,
            applied_items = report.applied_items.len(),
            failed_items = report.failed_items,
            skipped_items = report.skipped_items,
            "sync pass complete"
        );

        report
    }

    async fn sync_pending_projects(&self, report: &mut SyncReport) {
        let pending = self.store.get_pending_projects().await;
        if pending.is_empty() {
            return;
        }
        tracing::info!(count = pending.len(), "syncing offline projects");

        for project in pending {
            match self.remote.create(PROJECTS_COLLECTION, &project.payload).await {
                Ok(remote_id) => {
                    if !self.store.mark_synced(project.local_id, Some(&remote_id)).await {
                        tracing::warn!(
                            local_id = %project.local_id,
                            %remote_id,
                            "project written remotely but local record not updated"
                        );
                    }
                    tracing::info!(local_id = %project.local_id, %remote_id, "synced offline project");
                    report.synced_projects.push((project.local_id, remote_id));
                }
                Err(err) => {
                    tracing::warn!(local_id = %project.local_id, error = %err, "failed to sync offline project, will retry");
                    report.failed_projects += 1;
                }
            }
        }
    }

    async fn drain_queue(&self, report: &mut SyncReport) {
        let items = self.store.dequeue_all().await;
        if items.is_empty() {
            return;
        }
        tracing::info!(count = items.len(), "replaying sync queue");

        for item in items {
            if let Some(max) = self.options.max_attempts {
                if item.attempts >= max {
                    tracing::debug!(item_id = %item.id, attempts = item.attempts, "attempt limit reached, skipping");
                    report.skipped_items += 1;
                    continue;
                }
            }

            match self.apply(&item).await {
                Ok(()) => {
                    self.store.remove(item.id).await;
                    tracing::info!(item_id = %item.id, kind = %item.kind, "applied queued mutation");
                    report.applied_items.push(item.id);
                }
                Err(err) => {
                    self.store.record_attempt(item.id).await;
                    tracing::warn!(
                        item_id = %item.id,
                        kind = %item.kind,
                        attempts = item.attempts + 1,
                        error = %err,
                        "queued mutation failed, will retry"
                    );
                    report.failed_items += 1;
                }
            }
        }
    }

    /// Dispatch a queued mutation to the matching remote operation.
    async fn apply(&self, item: &SyncQueueItem) -> Result<(), RemoteError> {
        let collection = item.kind.collection();
        match item.kind.action() {
            MutationAction::Create => {
                let remote_id = self.remote.create(collection, &item.changes()).await?;
                tracing::debug!(item_id = %item.id, %remote_id, "queued create written");
                Ok(())
            }
            MutationAction::Update => {
                let id = target_id(item)?;
                self.remote.update(collection, id, &item.changes()).await
            }
            MutationAction::Delete => {
                let id = target_id(item)?;
                self.remote.archive(collection, id).await
            }
        }
    }
}

fn target_id(item: &SyncQueueItem) -> Result<&str, RemoteError> {
    item.target_id().ok_or_else(|| {
        RemoteError::InvalidPayload(format!("{} item {} has no target id", item.kind, item.id))
    })
}
