//! Background worker that keeps the sync service running.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::connectivity::{ConnectivityProbe, ConnectivityState};
use crate::sync_manager::{SyncService, SyncTrigger};

/// Handle to a spawned background task.
pub struct WorkerHandle {
    name: &'static str,
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn new(name: &'static str, shutdown: Arc<Notify>, join: JoinHandle<()>) -> Self {
        Self {
            name,
            shutdown,
            join,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the task to stop and wait for it.
    ///
    /// A pass in progress is allowed to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.join.await {
            tracing::warn!(worker = self.name, error = %err, "worker task ended abnormally");
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.name)
            .field("finished", &self.join.is_finished())
            .finish()
    }
}

/// Drives [`SyncService`] from connectivity transitions and a timer.
///
/// - online at start: one pass right away
/// - offline → online: one pass right away, timer restarts
/// - online → offline: service paused, timer idle
/// - every `interval` while online: one pass
pub struct SyncWorker;

impl SyncWorker {
    pub fn spawn(
        service: Arc<SyncService>,
        probe: ConnectivityProbe,
        interval: Duration,
    ) -> WorkerHandle {
        let shutdown = Arc::new(Notify::new());
        let stop = shutdown.clone();

        let join = tokio::spawn(async move {
            tracing::info!(?interval, "sync worker started");

            let mut connectivity = probe.subscribe();
            let mut current = *connectivity.borrow_and_update();

            if current.is_online() {
                service.run_pass(SyncTrigger::Startup).await;
            } else {
                tracing::info!("starting offline, sync paused");
                service.pause();
            }

            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop.notified() => {
                        tracing::info!("sync worker received shutdown signal");
                        break;
                    }
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            tracing::warn!("connectivity probe dropped, stopping sync worker");
                            break;
                        }
                        let next = *connectivity.borrow_and_update();
                        if next == current {
                            continue;
                        }
                        current = next;

                        match next {
                            ConnectivityState::Online => {
                                tracing::info!("connectivity restored, syncing");
                                service.resume();
                                ticker.reset();
                                service.run_pass(SyncTrigger::ConnectivityRestored).await;
                            }
                            ConnectivityState::Offline => {
                                tracing::info!("connectivity lost, sync paused");
                                service.pause();
                            }
                        }
                    }
                    _ = ticker.tick(), if current.is_online() => {
                        service.run_pass(SyncTrigger::Periodic).await;
                    }
                }
            }

            tracing::info!("sync worker stopped");
        });

        WorkerHandle::new("sync-worker", shutdown, join)
    }
}
