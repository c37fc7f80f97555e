//! Project operations that keep working offline.
//!
//! Writes go to the remote database while the probe reports online. Anything
//! that cannot be applied right away lands in the offline store and is
//! replayed by the sync service.

use std::sync::Arc;

use backbone_core::{DomainError, DomainResult, LocalProjectId, QueueItemId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::connectivity::ConnectivityProbe;
use crate::remote::{RemoteDocument, RemoteError, RemoteStore};
use crate::store::OfflineStore;
use crate::types::{MutationKind, PROJECTS_COLLECTION, PendingProject, SyncQueueItem};

/// Fields a user supplies when creating a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Extra document fields, stored as given.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProjectDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            extra: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("project name cannot be empty"));
        }
        Ok(())
    }

    /// Document body sent to the remote database.
    pub fn to_payload(&self) -> Value {
        let mut payload = self.extra.clone();
        payload.remove("id");
        payload.insert("name".into(), json!(self.name.trim()));
        if let Some(description) = &self.description {
            payload.insert("description".into(), json!(description));
        }
        payload
            .entry("status")
            .or_insert_with(|| json!("active"));
        payload
            .entry("createdAt")
            .or_insert_with(|| json!(Utc::now().to_rfc3339()));
        Value::Object(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Written remotely; `id` is the server-assigned identifier.
    Created { id: String },
    /// Kept locally until the next successful sync pass.
    StoredOffline { local_id: LocalProjectId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    Queued(QueueItemId),
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The offline store refused the write; nothing was kept.
    #[error("offline store rejected the {0}")]
    NotPersisted(&'static str),
}

/// UI-facing entry point for project writes.
#[derive(Clone)]
pub struct ProjectClient {
    store: OfflineStore,
    remote: Arc<dyn RemoteStore>,
    probe: ConnectivityProbe,
}

impl ProjectClient {
    pub fn new(store: OfflineStore, remote: Arc<dyn RemoteStore>, probe: ConnectivityProbe) -> Self {
        Self {
            store,
            remote,
            probe,
        }
    }

    pub async fn create_project(&self, draft: &ProjectDraft) -> Result<CreateOutcome, ProjectError> {
        draft.validate()?;
        let payload = draft.to_payload();

        if self.probe.is_online() {
            match self.remote.create(PROJECTS_COLLECTION, &payload).await {
                Ok(id) => {
                    tracing::info!(%id, "project created");
                    return Ok(CreateOutcome::Created { id });
                }
                Err(err) => {
                    tracing::warn!(error = %err, "remote create failed, storing project offline");
                }
            }
        }

        let project = PendingProject::new(payload);
        if !self.store.store_project(&project).await {
            return Err(ProjectError::NotPersisted("project"));
        }
        tracing::info!(local_id = %project.local_id, "project stored offline");
        Ok(CreateOutcome::StoredOffline {
            local_id: project.local_id,
        })
    }

    pub async fn update_project(&self, id: &str, changes: Value) -> Result<MutationOutcome, ProjectError> {
        let Value::Object(mut changes) = changes else {
            return Err(DomainError::validation("project changes must be an object").into());
        };
        changes.remove("id");
        let changes = Value::Object(changes);

        if self.probe.is_online() {
            match self.remote.update(PROJECTS_COLLECTION, id, &changes).await {
                Ok(()) => return Ok(MutationOutcome::Applied),
                Err(err) => tracing::warn!(%id, error = %err, "remote update failed, queueing"),
            }
        }

        let mut payload = changes;
        if let Value::Object(map) = &mut payload {
            map.insert("id".into(), json!(id));
        }
        self.queue(MutationKind::ProjectUpdate, payload).await
    }

    /// Archive a project. The remote document is kept with `status: archived`.
    pub async fn archive_project(&self, id: &str) -> Result<MutationOutcome, ProjectError> {
        if self.probe.is_online() {
            match self.remote.archive(PROJECTS_COLLECTION, id).await {
                Ok(()) => return Ok(MutationOutcome::Applied),
                Err(err) => tracing::warn!(%id, error = %err, "remote archive failed, queueing"),
            }
        }

        self.queue(MutationKind::ProjectDelete, json!({ "id": id })).await
    }

    /// Projects in the remote database. Not served from the offline store.
    pub async fn list_projects(&self) -> Result<Vec<RemoteDocument>, ProjectError> {
        Ok(self.remote.list(PROJECTS_COLLECTION).await?)
    }

    /// Projects created offline and not yet synced.
    pub async fn get_offline_projects(&self) -> Vec<PendingProject> {
        self.store.get_pending_projects().await
    }

    async fn queue(&self, kind: MutationKind, payload: Value) -> Result<MutationOutcome, ProjectError> {
        let item = SyncQueueItem::new(kind, payload);
        if !self.store.enqueue(&item).await {
            return Err(ProjectError::NotPersisted("queued mutation"));
        }
        tracing::info!(item_id = %item.id, %kind, "mutation queued for sync");
        Ok(MutationOutcome::Queued(item.id))
    }
}
