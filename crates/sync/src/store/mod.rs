//! Local persistence for offline work.
//!
//! Two record sets are kept: pending projects and the sync queue of deferred
//! mutations. The backend is picked once at startup:
//!
//! - [`SqliteStore`]: embedded database, the normal backend.
//! - [`FileStore`]: a flat serialized JSON file, used when the embedded
//!   database cannot be opened.
//!
//! Callers use [`OfflineStore`], which never returns an error: failures are
//! logged and the operation yields its empty/default result.

use std::sync::Arc;

use async_trait::async_trait;
use backbone_core::{LocalProjectId, QueueItemId};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::{StorePreference, SyncConfig};
use crate::types::{PendingProject, SyncQueueItem};

pub mod file;
pub mod sqlite;

pub use file::FileStore;
pub use sqlite::SqliteStore;

/// Local store error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Which backend a store runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    File,
}

/// Storage backend abstraction.
///
/// Implementations return errors; [`OfflineStore`] decides what to do with
/// them.
#[async_trait]
pub trait LocalStore: Send + Sync {
    fn backend(&self) -> StoreBackend;

    /// Insert or replace a project keyed by its local id.
    async fn put_project(&self, project: &PendingProject) -> Result<(), StoreError>;

    /// All projects, oldest first.
    async fn list_projects(&self) -> Result<Vec<PendingProject>, StoreError>;

    /// Clear the pending flag and record the server id.
    ///
    /// Returns `false` if no project has `local_id`.
    async fn mark_synced(
        &self,
        local_id: LocalProjectId,
        remote_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn push_item(&self, item: &SyncQueueItem) -> Result<(), StoreError>;

    /// All queued items, oldest first. Does not remove them.
    async fn list_items(&self) -> Result<Vec<SyncQueueItem>, StoreError>;

    /// Returns `false` if the item was not queued.
    async fn remove_item(&self, id: QueueItemId) -> Result<bool, StoreError>;

    /// Increment the attempt counter and stamp the attempt time.
    async fn record_attempt(&self, id: QueueItemId, at: DateTime<Utc>) -> Result<bool, StoreError>;
}

/// Sizes of both record sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub projects: usize,
    pub pending_projects: usize,
    pub queued_items: usize,
}

/// Process-wide offline store handle.
///
/// Cheap to clone; every clone shares the same backend.
#[derive(Clone)]
pub struct OfflineStore {
    backend: Arc<dyn LocalStore>,
}

impl std::fmt::Debug for OfflineStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineStore")
            .field("backend", &self.backend.backend())
            .finish()
    }
}

impl OfflineStore {
    /// Wrap an already opened backend.
    pub fn new(backend: Arc<dyn LocalStore>) -> Self {
        Self { backend }
    }

    /// Open the store for `config`.
    ///
    /// Tries the embedded database unless the file store is requested. If
    /// the database cannot be opened, falls back to the flat file store.
    pub async fn open(config: &SyncConfig) -> Self {
        if config.store != StorePreference::File {
            let path = config.sqlite_path();
            match SqliteStore::open(&path).await {
                Ok(store) => {
                    tracing::info!(path = %path.display(), "opened embedded offline store");
                    return Self::new(Arc::new(store));
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = ?err,
                        "embedded offline store unavailable, using file store"
                    );
                }
            }
        }

        let path = config.file_store_path();
        tracing::info!(path = %path.display(), "using file offline store");
        Self::new(Arc::new(FileStore::new(path)))
    }

    pub fn backend(&self) -> StoreBackend {
        self.backend.backend()
    }

    /// Persist a project. Returns `false` if the write failed.
    pub async fn store_project(&self, project: &PendingProject) -> bool {
        match self.backend.put_project(project).await {
            Ok(()) => {
                tracing::debug!(local_id = %project.local_id, "stored offline project");
                true
            }
            Err(err) => {
                tracing::error!(local_id = %project.local_id, error = ?err, "failed to store offline project");
                false
            }
        }
    }

    pub async fn get_all_projects(&self) -> Vec<PendingProject> {
        self.backend.list_projects().await.unwrap_or_else(|err| {
            tracing::error!(error = ?err, "failed to list offline projects");
            Vec::new()
        })
    }

    /// Projects still awaiting their remote write.
    pub async fn get_pending_projects(&self) -> Vec<PendingProject> {
        self.get_all_projects()
            .await
            .into_iter()
            .filter(|p| p.pending_sync)
            .collect()
    }

    pub async fn mark_synced(&self, local_id: LocalProjectId, remote_id: Option<&str>) -> bool {
        match self.backend.mark_synced(local_id, remote_id, Utc::now()).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(%local_id, "mark_synced: no such offline project");
                false
            }
            Err(err) => {
                tracing::error!(%local_id, error = ?err, "failed to mark offline project synced");
                false
            }
        }
    }

    /// Append a mutation to the sync queue.
    pub async fn enqueue(&self, item: &SyncQueueItem) -> bool {
        match self.backend.push_item(item).await {
            Ok(()) => {
                tracing::debug!(item_id = %item.id, kind = %item.kind, "queued mutation");
                true
            }
            Err(err) => {
                tracing::error!(item_id = %item.id, error = ?err, "failed to queue mutation");
                false
            }
        }
    }

    /// Every queued mutation, oldest first. Items stay queued until
    /// [`OfflineStore::remove`] is called for them.
    pub async fn dequeue_all(&self) -> Vec<SyncQueueItem> {
        self.backend.list_items().await.unwrap_or_else(|err| {
            tracing::error!(error = ?err, "failed to read sync queue");
            Vec::new()
        })
    }

    pub async fn remove(&self, item_id: QueueItemId) -> bool {
        self.backend.remove_item(item_id).await.unwrap_or_else(|err| {
            tracing::error!(%item_id, error = ?err, "failed to remove queued mutation");
            false
        })
    }

    pub async fn record_attempt(&self, item_id: QueueItemId) -> bool {
        self.backend
            .record_attempt(item_id, Utc::now())
            .await
            .unwrap_or_else(|err| {
                tracing::error!(%item_id, error = ?err, "failed to record sync attempt");
                false
            })
    }

    pub async fn counts(&self) -> StoreCounts {
        let projects = self.get_all_projects().await;
        StoreCounts {
            projects: projects.len(),
            pending_projects: projects.iter().filter(|p| p.pending_sync).count(),
            queued_items: self.dequeue_all().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MutationKind;
    use serde_json::json;

    /// Backend whose every call fails.
    struct BrokenStore;

    #[async_trait]
    impl LocalStore for BrokenStore {
        fn backend(&self) -> StoreBackend {
            StoreBackend::File
        }

        async fn put_project(&self, _: &PendingProject) -> Result<(), StoreError> {
            Err(StoreError::Corrupt("broken".into()))
        }

        async fn list_projects(&self) -> Result<Vec<PendingProject>, StoreError> {
            Err(StoreError::Corrupt("broken".into()))
        }

        async fn mark_synced(
            &self,
            _: LocalProjectId,
            _: Option<&str>,
            _: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Corrupt("broken".into()))
        }

        async fn push_item(&self, _: &SyncQueueItem) -> Result<(), StoreError> {
            Err(StoreError::Corrupt("broken".into()))
        }

        async fn list_items(&self) -> Result<Vec<SyncQueueItem>, StoreError> {
            Err(StoreError::Corrupt("broken".into()))
        }

        async fn remove_item(&self, _: QueueItemId) -> Result<bool, StoreError> {
            Err(StoreError::Corrupt("broken".into()))
        }

        async fn record_attempt(&self, _: QueueItemId, _: DateTime<Utc>) -> Result<bool, StoreError> {
            Err(StoreError::Corrupt("broken".into()))
        }
    }

    #[tokio::test]
    async fn failures_degrade_to_defaults() {
        let store = OfflineStore::new(Arc::new(BrokenStore));
        let item = SyncQueueItem::new(MutationKind::ProjectDelete, json!({ "id": "abc123" }));

        assert!(!store.store_project(&PendingProject::new(json!({}))).await);
        assert!(store.get_all_projects().await.is_empty());
        assert!(store.get_pending_projects().await.is_empty());
        assert!(!store.mark_synced(LocalProjectId::new(), Some("x")).await);
        assert!(!store.enqueue(&item).await);
        assert!(store.dequeue_all().await.is_empty());
        assert!(!store.remove(item.id).await);
        assert!(!store.record_attempt(item.id).await);
        assert_eq!(store.counts().await, StoreCounts::default());
    }

    #[tokio::test]
    async fn open_falls_back_to_file_store_when_database_is_unusable() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the data directory should be makes the
        // database path unopenable.
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let config = SyncConfig::new("http://localhost:8080", &blocker);

        let store = OfflineStore::open(&config).await;
        assert_eq!(store.backend(), StoreBackend::File);

        // Writes into the unusable directory fail but never surface.
        assert!(!store.store_project(&PendingProject::new(json!({ "name": "p" }))).await);
        assert!(store.get_all_projects().await.is_empty());
    }

    #[tokio::test]
    async fn open_honours_file_preference() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SyncConfig::new("http://localhost:8080", dir.path());
        config.store = StorePreference::File;

        let store = OfflineStore::open(&config).await;
        assert_eq!(store.backend(), StoreBackend::File);
    }

    #[tokio::test]
    async fn open_prefers_embedded_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::new("http://localhost:8080", dir.path());

        let store = OfflineStore::open(&config).await;
        assert_eq!(store.backend(), StoreBackend::Sqlite);

        let project = PendingProject::new(json!({ "name": "Test Project 10:15:00" }));
        assert!(store.store_project(&project).await);
        let counts = store.counts().await;
        assert_eq!(counts.projects, 1);
        assert_eq!(counts.pending_projects, 1);
        assert_eq!(counts.queued_items, 0);
    }
}
