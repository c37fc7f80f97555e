//! Connectivity probe: runtime-reported network state and transition
//! listeners.
//!
//! The probe never touches the network. The host feeds it signals
//! (`set_online` / `set_offline` / `report`); [`check_reachability`] is the
//! separate helper that issues a best-effort request before a sync pass.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{Notify, watch};

use crate::remote::RemoteStore;
use crate::sync_worker::WorkerHandle;

// Re-export from shared types module
pub use crate::types::ConnectivityState;

type Callback = Box<dyn Fn() + Send + Sync>;

struct Listener {
    id: u64,
    on_online: Callback,
    on_offline: Callback,
}

struct ProbeInner {
    state: watch::Sender<ConnectivityState>,
    listeners: Mutex<Vec<Arc<Listener>>>,
    next_id: AtomicU64,
}

/// Shared connectivity state. Cheap to clone; clones observe the same state.
#[derive(Clone)]
pub struct ConnectivityProbe {
    inner: Arc<ProbeInner>,
}

impl std::fmt::Debug for ConnectivityProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityProbe")
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectivityProbe {
    pub fn new(initial: ConnectivityState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            inner: Arc::new(ProbeInner {
                state,
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.inner.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    pub fn set_online(&self) {
        self.report(ConnectivityState::Online);
    }

    pub fn set_offline(&self) {
        self.report(ConnectivityState::Offline);
    }

    /// Record the runtime-reported state.
    ///
    /// Listeners and subscribers are only notified on an actual transition.
    /// Returns whether the state changed.
    pub fn report(&self, state: ConnectivityState) -> bool {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });

        if changed {
            tracing::info!(?state, "connectivity changed");
            let listeners: Vec<Arc<Listener>> = match self.inner.listeners.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            // Invoked outside the lock so callbacks may (un)register.
            for listener in listeners {
                match state {
                    ConnectivityState::Online => (listener.on_online)(),
                    ConnectivityState::Offline => (listener.on_offline)(),
                }
            }
        }

        changed
    }

    /// Register callbacks for connectivity transitions.
    ///
    /// The callbacks stay registered until the returned listener is
    /// unregistered or dropped.
    pub fn on_transition<F, G>(&self, on_online: F, on_offline: G) -> TransitionListener
    where
        F: Fn() + Send + Sync + 'static,
        G: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let listener = Arc::new(Listener {
            id,
            on_online: Box::new(on_online),
            on_offline: Box::new(on_offline),
        });

        match self.inner.listeners.lock() {
            Ok(mut guard) => guard.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }

        TransitionListener {
            id,
            probe: Arc::downgrade(&self.inner),
        }
    }

    /// Async view of the state, for tasks that `select!` on transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.state.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        match self.inner.listeners.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Default for ConnectivityProbe {
    fn default() -> Self {
        Self::new(ConnectivityState::Online)
    }
}

/// Registration handle returned by [`ConnectivityProbe::on_transition`].
#[must_use = "dropping the listener unregisters its callbacks"]
pub struct TransitionListener {
    id: u64,
    probe: Weak<ProbeInner>,
}

impl TransitionListener {
    /// Remove the callbacks from the probe.
    pub fn unregister(self) {
        // Drop does the work.
    }

    fn remove(&self) {
        let Some(inner) = self.probe.upgrade() else {
            return;
        };
        let mut guard = match inner.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.retain(|l| l.id != self.id);
    }
}

impl Drop for TransitionListener {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Best-effort reachability request against the remote database.
///
/// Any error or a timeout counts as unreachable.
pub async fn check_reachability(remote: &dyn RemoteStore, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, remote.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            tracing::debug!(error = %err, "reachability check failed");
            false
        }
        Err(_) => {
            tracing::debug!(?timeout, "reachability check timed out");
            false
        }
    }
}

/// Periodically check reachability and report the result into `probe`.
///
/// This is the native host's source of network signals; the first check
/// runs immediately.
pub fn spawn_reachability_monitor(
    probe: ConnectivityProbe,
    remote: Arc<dyn RemoteStore>,
    every: Duration,
    timeout: Duration,
) -> WorkerHandle {
    let shutdown = Arc::new(Notify::new());
    let stop = shutdown.clone();

    let join = tokio::spawn(async move {
        tracing::info!(?every, "reachability monitor started");
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.notified() => break,
                _ = ticker.tick() => {
                    let reachable = check_reachability(remote.as_ref(), timeout).await;
                    probe.report(if reachable {
                        ConnectivityState::Online
                    } else {
                        ConnectivityState::Offline
                    });
                }
            }
        }

        tracing::info!("reachability monitor stopped");
    });

    WorkerHandle::new("reachability-monitor", shutdown, join)
}
