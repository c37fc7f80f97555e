//! Flat-file fallback backend.
//!
//! Both record sets live in one JSON document. Every operation reads the
//! file, applies its change and writes it back, so no state is held in
//! memory between calls.
//!
//! Entries that fail to decode (a kind written by a newer client, a bad
//! timestamp) are skipped when listing but written back untouched. A file
//! that is not a store document at all is moved aside to
//! `<name>.corrupt-<millis>` and the store starts empty.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use backbone_core::{LocalProjectId, QueueItemId};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::{LocalStore, StoreBackend, StoreError};
use crate::types::{PendingProject, SyncQueueItem};

const PROJECTS_KEY: &str = "offlineProjects";
const QUEUE_KEY: &str = "syncQueue";

#[derive(Debug, Default)]
struct FileDocument {
    offline_projects: Vec<PendingProject>,
    sync_queue: Vec<SyncQueueItem>,
    /// Raw entries this build cannot decode.
    unreadable_projects: Vec<Value>,
    unreadable_items: Vec<Value>,
}

impl FileDocument {
    /// `None` when `value` does not have the store layout.
    fn from_value(value: Value, path: &Path) -> Option<Self> {
        let Value::Object(mut root) = value else {
            return None;
        };
        let (offline_projects, unreadable_projects) =
            split_records(root.remove(PROJECTS_KEY), PROJECTS_KEY, path)?;
        let (sync_queue, unreadable_items) = split_records(root.remove(QUEUE_KEY), QUEUE_KEY, path)?;

        Some(Self {
            offline_projects,
            sync_queue,
            unreadable_projects,
            unreadable_items,
        })
    }

    fn to_value(&self) -> Result<Value, StoreError> {
        let mut projects = self
            .offline_projects
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        projects.extend(self.unreadable_projects.iter().cloned());

        let mut items = self
            .sync_queue
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        items.extend(self.unreadable_items.iter().cloned());

        let mut root = Map::new();
        root.insert(PROJECTS_KEY.into(), Value::Array(projects));
        root.insert(QUEUE_KEY.into(), Value::Array(items));
        Ok(Value::Object(root))
    }
}

/// Decode a record set entry by entry, keeping undecodable entries raw.
fn split_records<T: DeserializeOwned>(
    value: Option<Value>,
    set: &'static str,
    path: &Path,
) -> Option<(Vec<T>, Vec<Value>)> {
    let entries = match value {
        None | Some(Value::Null) => return Some((Vec::new(), Vec::new())),
        Some(Value::Array(entries)) => entries,
        Some(_) => return None,
    };

    let mut records = Vec::with_capacity(entries.len());
    let mut unreadable = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        match T::deserialize(&entry) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    set,
                    index,
                    error = %err,
                    "skipping unreadable offline store entry"
                );
                unreadable.push(entry);
            }
        }
    }
    Some((records, unreadable))
}

/// JSON-file-backed offline store.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Callers hold `self.lock`.
    async fn load(&self) -> Result<FileDocument, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(FileDocument::default()),
            Err(err) => return Err(err.into()),
        };

        if raw.trim().is_empty() {
            return Ok(FileDocument::default());
        }

        let parsed = serde_json::from_str::<Value>(&raw)
            .ok()
            .and_then(|value| FileDocument::from_value(value, &self.path));
        match parsed {
            Some(doc) => Ok(doc),
            None => {
                self.quarantine().await?;
                Ok(FileDocument::default())
            }
        }
    }

    /// Move an unparsable file out of the way so no write replaces it.
    async fn quarantine(&self) -> Result<PathBuf, StoreError> {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "offline.json".to_string());
        let target = self
            .path
            .with_file_name(format!("{name}.corrupt-{}", Utc::now().timestamp_millis()));

        tokio::fs::rename(&self.path, &target).await?;
        tracing::warn!(
            path = %self.path.display(),
            moved_to = %target.display(),
            "offline store file is unreadable, moved aside and starting empty"
        );
        Ok(target)
    }

    async fn save(&self, doc: &FileDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(&doc.to_value()?)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Load, mutate and write back under the store lock.
    async fn update<T, F>(&self, mutate: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut FileDocument) -> (T, bool) + Send,
        T: Send,
    {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        let (result, changed) = mutate(&mut doc);
        if changed {
            self.save(&doc).await?;
        }
        Ok(result)
    }
}

#[async_trait]
impl LocalStore for FileStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::File
    }

    async fn put_project(&self, project: &PendingProject) -> Result<(), StoreError> {
        let project = project.clone();
        self.update(move |doc| {
            match doc
                .offline_projects
                .iter_mut()
                .find(|p| p.local_id == project.local_id)
            {
                Some(existing) => *existing = project,
                None => doc.offline_projects.push(project),
            }
            ((), true)
        })
        .await
    }

    async fn list_projects(&self) -> Result<Vec<PendingProject>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.offline_projects)
    }

    async fn mark_synced(
        &self,
        local_id: LocalProjectId,
        remote_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let remote_id = remote_id.map(str::to_string);
        self.update(move |doc| {
            match doc.offline_projects.iter_mut().find(|p| p.local_id == local_id) {
                Some(project) => {
                    project.mark_synced(remote_id.as_deref(), at);
                    (true, true)
                }
                None => (false, false),
            }
        })
        .await
    }

    async fn push_item(&self, item: &SyncQueueItem) -> Result<(), StoreError> {
        let item = item.clone();
        self.update(move |doc| {
            doc.sync_queue.push(item);
            ((), true)
        })
        .await
    }

    async fn list_items(&self) -> Result<Vec<SyncQueueItem>, StoreError> {
        let _guard = self.lock.lock().await;
        let mut items = self.load().await?.sync_queue;
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn remove_item(&self, id: QueueItemId) -> Result<bool, StoreError> {
        self.update(move |doc| {
            let before = doc.sync_queue.len();
            doc.sync_queue.retain(|item| item.id != id);
            let removed = doc.sync_queue.len() != before;
            (removed, removed)
        })
        .await
    }

    async fn record_attempt(&self, id: QueueItemId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.update(move |doc| match doc.sync_queue.iter_mut().find(|i| i.id == id) {
            Some(item) => {
                item.attempts = item.attempts.saturating_add(1);
                item.last_attempt = Some(at);
                (true, true)
            }
            None => (false, false),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MutationKind;
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("offline.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let (_dir, store) = temp_store();
        assert!(store.list_projects().await.unwrap().is_empty());
        assert!(store.list_items().await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    fn corrupt_copies(store: &FileStore) -> Vec<PathBuf> {
        let prefix = format!("{}.corrupt-", store.path().file_name().unwrap().to_string_lossy());
        std::fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with(&prefix))
            .collect()
    }

    #[tokio::test]
    async fn unparsable_file_is_moved_aside_before_writing() {
        let (_dir, store) = temp_store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), b"{ not json").unwrap();

        assert!(store.list_projects().await.unwrap().is_empty());
        let copies = corrupt_copies(&store);
        assert_eq!(copies.len(), 1);
        assert_eq!(std::fs::read(&copies[0]).unwrap(), b"{ not json");

        let project = PendingProject::new(json!({ "name": "p" }));
        store.put_project(&project).await.unwrap();
        assert_eq!(store.list_projects().await.unwrap(), vec![project]);
        assert_eq!(std::fs::read(&copies[0]).unwrap(), b"{ not json");
    }

    #[tokio::test]
    async fn unreadable_entries_are_skipped_but_kept_on_disk() {
        let (_dir, store) = temp_store();
        let project = PendingProject::new(json!({ "name": "Test Project 10:15:00" }));
        store.put_project(&project).await.unwrap();
        for id in ["a", "b", "c"] {
            store
                .push_item(&SyncQueueItem::new(MutationKind::ProjectDelete, json!({ "id": id })))
                .await
                .unwrap();
        }

        let mut raw: Value = serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        raw["syncQueue"][0]["kind"] = json!("license_revoke");
        std::fs::write(store.path(), serde_json::to_vec(&raw).unwrap()).unwrap();

        assert_eq!(store.list_items().await.unwrap().len(), 2);
        assert_eq!(store.list_projects().await.unwrap(), vec![project.clone()]);

        store
            .push_item(&SyncQueueItem::new(MutationKind::ProjectCreate, json!({ "name": "q" })))
            .await
            .unwrap();
        assert_eq!(store.list_items().await.unwrap().len(), 3);
        assert_eq!(store.list_projects().await.unwrap(), vec![project]);
        assert!(corrupt_copies(&store).is_empty());

        let on_disk: Value = serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        let queue = on_disk["syncQueue"].as_array().unwrap();
        assert_eq!(queue.len(), 4);
        assert!(queue.iter().any(|item| item["kind"] == json!("license_revoke")));
    }

    #[tokio::test]
    async fn put_project_replaces_by_local_id() {
        let (_dir, store) = temp_store();
        let mut project = PendingProject::new(json!({ "name": "draft" }));
        store.put_project(&project).await.unwrap();

        project.payload = json!({ "name": "final" });
        store.put_project(&project).await.unwrap();

        let listed = store.list_projects().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].payload, json!({ "name": "final" }));
    }

    #[tokio::test]
    async fn mark_synced_and_queue_bookkeeping() {
        let (_dir, store) = temp_store();
        let project = PendingProject::new(json!({ "name": "Test Project 10:15:00" }));
        store.put_project(&project).await.unwrap();
        assert!(store.mark_synced(project.local_id, Some("srv-9"), Utc::now()).await.unwrap());
        let synced = &store.list_projects().await.unwrap()[0];
        assert!(!synced.pending_sync);
        assert_eq!(synced.current_id(), "srv-9");

        let item = SyncQueueItem::new(MutationKind::ProjectDelete, json!({ "id": "abc123" }));
        store.push_item(&item).await.unwrap();
        assert!(store.record_attempt(item.id, Utc::now()).await.unwrap());
        assert_eq!(store.list_items().await.unwrap()[0].attempts, 1);

        assert!(store.remove_item(item.id).await.unwrap());
        assert!(!store.record_attempt(item.id, Utc::now()).await.unwrap());
        assert!(store.list_items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_layout_uses_named_record_sets() {
        let (_dir, store) = temp_store();
        store
            .push_item(&SyncQueueItem::new(MutationKind::ProjectCreate, json!({ "name": "p" })))
            .await
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert!(raw["offlineProjects"].as_array().unwrap().is_empty());
        assert_eq!(raw["syncQueue"][0]["kind"], json!("project_create"));
        assert_eq!(raw["syncQueue"][0]["attempts"], json!(0));
    }
}
