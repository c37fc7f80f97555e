//! Remote document database.
//!
//! The engine treats the remote as an opaque collection store. Collection
//! names passed here are physical names; see [`crate::collections`] for the
//! logical-name layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod http;
pub mod memory;

pub use http::HttpRemoteStore;
pub use memory::InMemoryRemoteStore;

/// A document as returned by a collection listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    #[serde(flatten)]
    pub data: serde_json::Map<String, Value>,
}

impl RemoteDocument {
    pub fn status(&self) -> Option<&str> {
        self.data.get("status").and_then(Value::as_str)
    }

    pub fn is_archived(&self) -> bool {
        self.status() == Some("archived")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({0}): {1}")]
    Api(u16, String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("document not found: {0}")]
    NotFound(String),
    /// The collection is missing or not readable under this name.
    #[error("collection inaccessible: {0}")]
    Inaccessible(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl RemoteError {
    /// Errors that mean "not found under this collection name", which
    /// justify trying the next candidate name.
    pub fn is_inaccessible(&self) -> bool {
        match self {
            RemoteError::Inaccessible(_) | RemoteError::NotFound(_) => true,
            RemoteError::Api(status, _) => *status == 403 || *status == 404,
            _ => false,
        }
    }
}

/// Remote collection store abstraction.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create a document and return its server-assigned id.
    async fn create(&self, collection: &str, payload: &Value) -> Result<String, RemoteError>;

    /// Merge `changes` into an existing document.
    async fn update(&self, collection: &str, id: &str, changes: &Value) -> Result<(), RemoteError>;

    /// Mark a document archived.
    async fn archive(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    async fn list(&self, collection: &str) -> Result<Vec<RemoteDocument>, RemoteError>;

    /// Cheap reachability request.
    async fn ping(&self) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inaccessible_classification() {
        assert!(RemoteError::Inaccessible("projects".into()).is_inaccessible());
        assert!(RemoteError::Api(404, String::new()).is_inaccessible());
        assert!(RemoteError::Api(403, String::new()).is_inaccessible());
        assert!(!RemoteError::Api(500, String::new()).is_inaccessible());
        assert!(!RemoteError::Network("reset".into()).is_inaccessible());
        assert!(RemoteError::NotFound("abc123".into()).is_inaccessible());
        assert!(!RemoteError::InvalidPayload("no id".into()).is_inaccessible());
    }

    #[test]
    fn documents_flatten_fields() {
        let doc: RemoteDocument =
            serde_json::from_value(json!({ "id": "abc123", "name": "p", "status": "archived" }))
                .unwrap();
        assert_eq!(doc.id, "abc123");
        assert_eq!(doc.data.get("name"), Some(&json!("p")));
        assert!(doc.is_archived());
    }
}
