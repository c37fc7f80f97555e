//! HTTP client for the remote document API.
//!
//! Routes:
//! - `POST   {api}/collections/{c}/documents` → `{ "id": ... }`
//! - `PATCH  {api}/collections/{c}/documents/{id}`
//! - `GET    {api}/collections/{c}/documents` → `[{ "id": ..., ... }]`
//! - `HEAD   {api}` for reachability

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{RemoteDocument, RemoteError, RemoteStore};

/// Remote store backed by the document REST API.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    base: Url,
    token: Option<String>,
    client: Client,
}

#[derive(Deserialize)]
struct CreatedDocument {
    id: String,
}

impl HttpRemoteStore {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let base = Url::parse(api_url)
            .map_err(|e| RemoteError::InvalidPayload(format!("invalid API url '{api_url}': {e}")))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::InvalidPayload(format!(
                "API url '{api_url}' cannot carry paths"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            base,
            token: None,
            client,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// `{api}/collections/{collection}/documents[/{id}]`, segments escaped.
    pub fn documents_url(&self, collection: &str, id: Option<&str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["collections", collection, "documents"]);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        url
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, RemoteError> {
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(RemoteError::Api(status, resp.text().await.unwrap_or_default()));
        }

        Ok(resp)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create(&self, collection: &str, payload: &Value) -> Result<String, RemoteError> {
        let url = self.documents_url(collection, None);
        let resp = self.send(self.client.post(url).json(payload)).await?;

        let created: CreatedDocument = resp
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))?;
        if created.id.is_empty() {
            return Err(RemoteError::Parse("server returned an empty document id".into()));
        }

        Ok(created.id)
    }

    async fn update(&self, collection: &str, id: &str, changes: &Value) -> Result<(), RemoteError> {
        let url = self.documents_url(collection, Some(id));
        self.send(self.client.patch(url).json(changes)).await?;
        Ok(())
    }

    async fn archive(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let changes = json!({
            "status": "archived",
            "archivedAt": Utc::now().to_rfc3339(),
        });
        self.update(collection, id, &changes).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<RemoteDocument>, RemoteError> {
        let url = self.documents_url(collection, None);
        let resp = self.send(self.client.get(url)).await?;
        resp.json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        let resp = self
            .authorize(self.client.head(self.base.clone()))
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        // Any answer from the server means it is reachable, except a
        // gateway reporting the upstream as down.
        if resp.status().is_server_error() {
            return Err(RemoteError::Api(resp.status().as_u16(), String::new()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_urls_are_escaped_and_nested() {
        let store = HttpRemoteStore::new("https://api.backbonelogic.com/v1/", Duration::from_secs(5))
            .unwrap();
        assert_eq!(
            store.documents_url("projects", None).as_str(),
            "https://api.backbonelogic.com/v1/collections/projects/documents"
        );
        assert_eq!(
            store.documents_url("license_keys", Some("a b/c")).as_str(),
            "https://api.backbonelogic.com/v1/collections/license_keys/documents/a%20b%2Fc"
        );
    }

    #[test]
    fn rejects_unusable_urls() {
        assert!(HttpRemoteStore::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpRemoteStore::new("mailto:ops@backbonelogic.com", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let store = HttpRemoteStore::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(matches!(store.ping().await, Err(RemoteError::Network(_))));
        assert!(matches!(
            store.create("projects", &json!({ "name": "p" })).await,
            Err(RemoteError::Network(_))
        ));
    }
}
