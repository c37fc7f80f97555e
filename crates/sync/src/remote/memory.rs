use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::{RemoteDocument, RemoteError, RemoteStore};

/// In-memory document store.
///
/// Intended for tests/dev. Supports failure injection: the whole store can
/// be made unreachable, single collections inaccessible, and single
/// documents (or every create) made to fail.
#[derive(Debug)]
pub struct InMemoryRemoteStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Map<String, Value>>>>,
    reachable: AtomicBool,
    inaccessible: RwLock<HashSet<String>>,
    failing_ids: RwLock<HashSet<String>>,
    fail_creates: AtomicBool,
    writes: AtomicUsize,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            inaccessible: RwLock::new(HashSet::new()),
            failing_ids: RwLock::new(HashSet::new()),
            fail_creates: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When unreachable, every call fails with a network error.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make a collection name fail as inaccessible.
    pub fn set_collection_accessible(&self, collection: &str, accessible: bool) {
        let mut set = self.inaccessible.write().unwrap_or_else(|p| p.into_inner());
        if accessible {
            set.remove(collection);
        } else {
            set.insert(collection.to_string());
        }
    }

    /// Make writes targeting document `id` fail with a server error.
    pub fn fail_document(&self, id: &str, failing: bool) {
        let mut set = self.failing_ids.write().unwrap_or_else(|p| p.into_inner());
        if failing {
            set.insert(id.to_string());
        } else {
            set.remove(id);
        }
    }

    /// Make every create fail with a server error.
    pub fn fail_creates(&self, failing: bool) {
        self.fail_creates.store(failing, Ordering::SeqCst);
    }

    /// Seed a document with a known id.
    pub fn insert_document(&self, collection: &str, id: &str, data: Value) {
        let data = match data {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        self.collections
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<RemoteDocument> {
        let collections = self.collections.read().unwrap_or_else(|p| p.into_inner());
        collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| RemoteDocument {
                id: id.to_string(),
                data: data.clone(),
            })
    }

    /// Number of successful writes (create, update, archive).
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self, collection: &str) -> Result<(), RemoteError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("remote unreachable".into()));
        }
        let inaccessible = self.inaccessible.read().unwrap_or_else(|p| p.into_inner());
        if inaccessible.contains(collection) {
            return Err(RemoteError::Inaccessible(collection.to_string()));
        }
        Ok(())
    }

    fn check_document(&self, id: &str) -> Result<(), RemoteError> {
        let failing = self.failing_ids.read().unwrap_or_else(|p| p.into_inner());
        if failing.contains(id) {
            return Err(RemoteError::Api(500, format!("write to {id} rejected")));
        }
        Ok(())
    }

    fn merge(&self, collection: &str, id: &str, changes: &Value) -> Result<(), RemoteError> {
        self.check(collection)?;
        self.check_document(id)?;

        let Value::Object(changes) = changes else {
            return Err(RemoteError::InvalidPayload("changes must be an object".into()));
        };

        let mut collections = self.collections.write().unwrap_or_else(|p| p.into_inner());
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        for (key, value) in changes {
            doc.insert(key.clone(), value.clone());
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn create(&self, collection: &str, payload: &Value) -> Result<String, RemoteError> {
        self.check(collection)?;
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(RemoteError::Api(500, "create rejected".into()));
        }

        let Value::Object(data) = payload else {
            return Err(RemoteError::InvalidPayload("document must be an object".into()));
        };

        let id = Uuid::now_v7().simple().to_string();
        let mut data = data.clone();
        data.remove("id");
        data.entry("createdAt")
            .or_insert_with(|| json!(Utc::now().to_rfc3339()));

        self.collections
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), data);

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, changes: &Value) -> Result<(), RemoteError> {
        self.merge(collection, id, changes)
    }

    async fn archive(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let changes = json!({
            "status": "archived",
            "archivedAt": Utc::now().to_rfc3339(),
        });
        self.merge(collection, id, &changes)
    }

    async fn list(&self, collection: &str) -> Result<Vec<RemoteDocument>, RemoteError> {
        self.check(collection)?;
        let collections = self.collections.read().unwrap_or_else(|p| p.into_inner());
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| RemoteDocument {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Network("remote unreachable".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_assigns_ids_and_counts_writes() {
        let remote = InMemoryRemoteStore::new();
        let id = remote.create("projects", &json!({ "name": "p", "id": "local" })).await.unwrap();
        assert!(!id.is_empty());
        assert_ne!(id, "local");

        let docs = remote.list("projects").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, id);
        assert_eq!(remote.write_count(), 1);
    }

    #[tokio::test]
    async fn archive_marks_status() {
        let remote = InMemoryRemoteStore::new();
        remote.insert_document("projects", "abc123", json!({ "name": "p" }));
        remote.archive("projects", "abc123").await.unwrap();

        let doc = remote.document("projects", "abc123").unwrap();
        assert!(doc.is_archived());
        assert!(doc.data.contains_key("archivedAt"));

        assert_eq!(
            remote.archive("projects", "missing").await,
            Err(RemoteError::NotFound("missing".into()))
        );
    }

    #[tokio::test]
    async fn injected_failures() {
        let remote = InMemoryRemoteStore::new();
        remote.set_collection_accessible("licenseKeys", false);
        assert!(matches!(
            remote.list("licenseKeys").await,
            Err(RemoteError::Inaccessible(_))
        ));

        remote.insert_document("projects", "abc123", json!({}));
        remote.fail_document("abc123", true);
        assert!(matches!(
            remote.update("projects", "abc123", &json!({ "name": "x" })).await,
            Err(RemoteError::Api(500, _))
        ));

        remote.set_reachable(false);
        assert!(matches!(remote.ping().await, Err(RemoteError::Network(_))));
        assert_eq!(remote.write_count(), 0);
    }
}
