//! Shared record and status types for the offline sync engine.
//!
//! These types are what the local store persists and what status callers
//! observe. They carry no storage or network dependencies.

use backbone_core::{DomainError, LocalProjectId, QueueItemId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Logical collection that holds project documents.
pub const PROJECTS_COLLECTION: &str = "projects";

/// A project created locally that may still await its remote write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingProject {
    pub local_id: LocalProjectId,
    /// Server-assigned identifier, set once the project has been synced.
    pub remote_id: Option<String>,
    pub payload: Value,
    pub pending_sync: bool,
    pub created_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl PendingProject {
    /// New project awaiting its first remote write.
    pub fn new(payload: Value) -> Self {
        Self {
            local_id: LocalProjectId::new(),
            remote_id: None,
            payload,
            pending_sync: true,
            created_at: Utc::now(),
            synced_at: None,
        }
    }

    /// Current identifier: the server id once synced, the local id before.
    pub fn current_id(&self) -> String {
        match &self.remote_id {
            Some(id) => id.clone(),
            None => self.local_id.to_string(),
        }
    }

    /// Record a successful remote write.
    ///
    /// `remote_id = None` means the remote kept the client-chosen id.
    pub fn mark_synced(&mut self, remote_id: Option<&str>, at: DateTime<Utc>) {
        let id = match remote_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.local_id.to_string(),
        };
        self.remote_id = Some(id);
        self.pending_sync = false;
        self.synced_at = Some(at);
    }

    /// A synced project must carry a non-empty server id.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if !self.pending_sync && self.remote_id.as_deref().is_none_or(str::is_empty) {
            return Err(DomainError::invariant(format!(
                "project {} is marked synced without a server id",
                self.local_id
            )));
        }
        Ok(())
    }
}

/// Action a queued mutation performs against the remote database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationAction {
    Create,
    Update,
    Delete,
}

/// Kind of deferred mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    ProjectCreate,
    ProjectUpdate,
    /// Archives the project document; documents are never hard-deleted.
    ProjectDelete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::ProjectCreate => "project_create",
            MutationKind::ProjectUpdate => "project_update",
            MutationKind::ProjectDelete => "project_delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "project_create" => Some(MutationKind::ProjectCreate),
            "project_update" => Some(MutationKind::ProjectUpdate),
            "project_delete" => Some(MutationKind::ProjectDelete),
            _ => None,
        }
    }

    pub fn action(&self) -> MutationAction {
        match self {
            MutationKind::ProjectCreate => MutationAction::Create,
            MutationKind::ProjectUpdate => MutationAction::Update,
            MutationKind::ProjectDelete => MutationAction::Delete,
        }
    }

    /// Logical collection the mutation targets.
    pub fn collection(&self) -> &'static str {
        PROJECTS_COLLECTION
    }
}

impl core::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation that could not be applied immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: QueueItemId,
    pub kind: MutationKind,
    /// Update and delete items carry the target document id in `payload.id`.
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl SyncQueueItem {
    pub fn new(kind: MutationKind, payload: Value) -> Self {
        Self {
            id: QueueItemId::new(),
            kind,
            payload,
            created_at: Utc::now(),
            attempts: 0,
            last_attempt: None,
        }
    }

    /// Target document id for update/delete mutations.
    pub fn target_id(&self) -> Option<&str> {
        self.payload
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Payload without the routing `id` field.
    pub fn changes(&self) -> Value {
        match &self.payload {
            Value::Object(map) => {
                let mut map = map.clone();
                map.remove("id");
                Value::Object(map)
            }
            other => other.clone(),
        }
    }
}

/// Runtime-reported network status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityState::Online)
    }
}

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Syncing,
    /// Connectivity lost; periodic passes are suspended.
    Paused,
}

/// What started a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Startup,
    ConnectivityRestored,
    Periodic,
    Forced,
}

/// Why a pass stopped before replaying anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The runtime reports no network.
    Offline,
    /// The reachability probe failed or timed out.
    Unreachable,
}

/// Result of one sync pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub aborted: Option<AbortReason>,
    /// `(local_id, remote_id)` of every project written this pass.
    pub synced_projects: Vec<(LocalProjectId, String)>,
    pub failed_projects: usize,
    pub applied_items: Vec<QueueItemId>,
    pub failed_items: usize,
    /// Items left untouched because they reached the attempt limit.
    pub skipped_items: usize,
}

impl SyncReport {
    pub(crate) fn started(trigger: SyncTrigger) -> Self {
        let now = Utc::now();
        Self {
            trigger,
            started_at: now,
            finished_at: now,
            aborted: None,
            synced_projects: Vec::new(),
            failed_projects: 0,
            applied_items: Vec::new(),
            failed_items: 0,
            skipped_items: 0,
        }
    }

    /// True when the pass replayed every item it attempted.
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none() && self.failed_projects == 0 && self.failed_items == 0
    }
}

/// Outcome of a request to run a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    Completed(SyncReport),
    /// Another pass was already running; this request was dropped.
    Skipped,
}

impl PassOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            PassOutcome::Completed(report) => Some(report),
            PassOutcome::Skipped => None,
        }
    }
}

/// Snapshot of the sync engine for status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub online: bool,
    pub pending_projects: usize,
    pub queued_items: usize,
    pub last_report: Option<SyncReport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mark_synced_replaces_identifier() {
        let mut project = PendingProject::new(json!({ "name": "Test Project 10:15:00" }));
        let local = project.local_id.to_string();
        assert_eq!(project.current_id(), local);

        project.mark_synced(Some("srv-42"), Utc::now());
        assert!(!project.pending_sync);
        assert_eq!(project.current_id(), "srv-42");
        assert!(project.check_invariants().is_ok());
    }

    #[test]
    fn mark_synced_without_remote_id_keeps_local_id() {
        let mut project = PendingProject::new(json!({ "name": "p" }));
        project.mark_synced(None, Utc::now());
        assert_eq!(project.remote_id, Some(project.local_id.to_string()));
    }

    #[test]
    fn synced_project_without_remote_id_violates_invariant() {
        let mut project = PendingProject::new(json!({}));
        project.pending_sync = false;
        assert!(matches!(
            project.check_invariants(),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn mutation_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(MutationKind::ProjectDelete).unwrap(),
            json!("project_delete")
        );
        for kind in [
            MutationKind::ProjectCreate,
            MutationKind::ProjectUpdate,
            MutationKind::ProjectDelete,
        ] {
            assert_eq!(MutationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MutationKind::parse("license_revoke"), None);
    }

    #[test]
    fn queue_item_target_and_changes() {
        let item = SyncQueueItem::new(
            MutationKind::ProjectUpdate,
            json!({ "id": "abc123", "name": "Renamed" }),
        );
        assert_eq!(item.target_id(), Some("abc123"));
        assert_eq!(item.changes(), json!({ "name": "Renamed" }));

        let no_target = SyncQueueItem::new(MutationKind::ProjectDelete, json!({ "id": "" }));
        assert_eq!(no_target.target_id(), None);
    }
}
