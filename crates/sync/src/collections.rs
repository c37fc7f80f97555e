//! Logical → physical collection names.
//!
//! The remote database holds some collections under two names: the current
//! camelCase name and a legacy snake_case one. [`CollectionTable`] lists the
//! candidates for each logical name in the order they are tried, and
//! [`FallbackRemote`] runs every remote call through that list.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::remote::{RemoteDocument, RemoteError, RemoteStore};

/// Collections the dashboard reads and writes.
const DASHBOARD_COLLECTIONS: &[&str] = &[
    "projects",
    "licenses",
    "licenseKeys",
    "subscriptions",
    "billingHistory",
    "downloads",
    "userProfiles",
    "apiKeys",
    "analyticsEvents",
];

/// Legacy snake_case spelling of a camelCase name.
///
/// `licenseKeys` → `license_keys`; names without capitals are unchanged.
pub fn snake_case_alias(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Ordered candidate names per logical collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionTable {
    entries: HashMap<String, Vec<String>>,
}

impl Default for CollectionTable {
    fn default() -> Self {
        Self::dashboard()
    }
}

impl CollectionTable {
    /// Empty table: every logical name maps to itself only.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The dashboard collections, each with its legacy alias.
    pub fn dashboard() -> Self {
        DASHBOARD_COLLECTIONS
            .iter()
            .fold(Self::empty(), |table, name| table.with_legacy_alias(name))
    }

    /// Map `logical` to explicit candidates, tried in the given order.
    pub fn with_candidates<I, S>(mut self, logical: &str, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = Vec::new();
        for candidate in candidates {
            let candidate = candidate.into();
            if !candidate.is_empty() && !list.contains(&candidate) {
                list.push(candidate);
            }
        }
        if list.is_empty() {
            list.push(logical.to_string());
        }
        self.entries.insert(logical.to_string(), list);
        self
    }

    /// Map `logical` to itself, then its snake_case alias when different.
    pub fn with_legacy_alias(self, logical: &str) -> Self {
        let alias = snake_case_alias(logical);
        self.with_candidates(logical, [logical.to_string(), alias])
    }

    /// Candidates for `logical`; unknown names map to themselves.
    pub fn candidates(&self, logical: &str) -> Vec<String> {
        self.entries
            .get(logical)
            .cloned()
            .unwrap_or_else(|| vec![logical.to_string()])
    }

    /// Run `op` against each candidate until one succeeds.
    ///
    /// Moves on only when the error says the name is inaccessible; any other
    /// error is returned immediately. If every candidate is inaccessible the
    /// last error is returned.
    pub async fn try_candidates<T, F, Fut>(&self, logical: &str, mut op: F) -> Result<T, RemoteError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let candidates = self.candidates(logical);
        let total = candidates.len();
        let mut last_err = RemoteError::Inaccessible(logical.to_string());

        for (idx, name) in candidates.into_iter().enumerate() {
            match op(name.clone()).await {
                Ok(value) => {
                    if idx > 0 {
                        tracing::debug!(logical, collection = %name, "used fallback collection");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_inaccessible() && idx + 1 < total => {
                    tracing::debug!(logical, collection = %name, error = %err, "collection inaccessible, trying next");
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err)
    }
}

/// Remote store addressed by logical collection names.
pub struct FallbackRemote {
    inner: Arc<dyn RemoteStore>,
    table: CollectionTable,
}

impl FallbackRemote {
    pub fn new(inner: Arc<dyn RemoteStore>, table: CollectionTable) -> Self {
        Self { inner, table }
    }
}

#[async_trait]
impl RemoteStore for FallbackRemote {
    async fn create(&self, collection: &str, payload: &Value) -> Result<String, RemoteError> {
        self.table
            .try_candidates(collection, |name| async move {
                self.inner.create(&name, payload).await
            })
            .await
    }

    async fn update(&self, collection: &str, id: &str, changes: &Value) -> Result<(), RemoteError> {
        self.table
            .try_candidates(collection, |name| async move {
                self.inner.update(&name, id, changes).await
            })
            .await
    }

    async fn archive(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.table
            .try_candidates(collection, |name| async move {
                self.inner.archive(&name, id).await
            })
            .await
    }

    async fn list(&self, collection: &str) -> Result<Vec<RemoteDocument>, RemoteError> {
        self.table
            .try_candidates(collection, |name| async move { self.inner.list(&name).await })
            .await
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        self.inner.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemoteStore;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn aliases() {
        assert_eq!(snake_case_alias("licenseKeys"), "license_keys");
        assert_eq!(snake_case_alias("billingHistory"), "billing_history");
        assert_eq!(snake_case_alias("projects"), "projects");
        assert_eq!(snake_case_alias("apiKeys"), "api_keys");
    }

    #[test]
    fn dashboard_table_orders_current_name_first() {
        let table = CollectionTable::dashboard();
        assert_eq!(table.candidates("licenseKeys"), vec!["licenseKeys", "license_keys"]);
        assert_eq!(table.candidates("projects"), vec!["projects"]);
        assert_eq!(table.candidates("unknownThing"), vec!["unknownThing"]);
    }

    #[test]
    fn default_table_is_the_dashboard_table() {
        assert_eq!(CollectionTable::default(), CollectionTable::dashboard());
        assert_eq!(
            CollectionTable::default().candidates("billingHistory"),
            vec!["billingHistory", "billing_history"]
        );
        assert_ne!(CollectionTable::default(), CollectionTable::empty());
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let table = CollectionTable::dashboard();
        let tried = Mutex::new(Vec::new());
        let result = table
            .try_candidates("licenseKeys", |name| {
                tried.lock().unwrap().push(name.clone());
                async move { Ok::<_, RemoteError>(name) }
            })
            .await;
        assert_eq!(result.unwrap(), "licenseKeys");
        assert_eq!(tried.into_inner().unwrap(), vec!["licenseKeys"]);
    }

    #[tokio::test]
    async fn other_errors_do_not_fall_back() {
        let table = CollectionTable::dashboard();
        let tried = Mutex::new(0);
        let result: Result<(), _> = table
            .try_candidates("licenseKeys", |_| {
                *tried.lock().unwrap() += 1;
                async { Err(RemoteError::Network("reset".into())) }
            })
            .await;
        assert_eq!(result, Err(RemoteError::Network("reset".into())));
        assert_eq!(tried.into_inner().unwrap(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_legacy_collection() {
        let inner = Arc::new(InMemoryRemoteStore::new());
        inner.set_collection_accessible("licenseKeys", false);
        inner.insert_document("license_keys", "k1", json!({ "product": "Backbone Pro" }));

        let remote = FallbackRemote::new(inner.clone(), CollectionTable::dashboard());
        let docs = remote.list("licenseKeys").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "k1");

        remote
            .update("licenseKeys", "k1", &json!({ "seats": 5 }))
            .await
            .unwrap();
        assert_eq!(
            inner.document("license_keys", "k1").unwrap().data.get("seats"),
            Some(&json!(5))
        );
    }

    #[tokio::test]
    async fn all_candidates_inaccessible_returns_last_error() {
        let inner = Arc::new(InMemoryRemoteStore::new());
        inner.set_collection_accessible("licenseKeys", false);
        inner.set_collection_accessible("license_keys", false);

        let remote = FallbackRemote::new(inner, CollectionTable::dashboard());
        assert_eq!(
            remote.list("licenseKeys").await,
            Err(RemoteError::Inaccessible("license_keys".into()))
        );
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: aliases never contain capitals and are stable.
            #[test]
            fn alias_is_lowercase_and_idempotent(name in "[a-z][a-zA-Z0-9]{0,30}") {
                let alias = snake_case_alias(&name);
                prop_assert!(!alias.chars().any(|c| c.is_ascii_uppercase()));
                prop_assert_eq!(snake_case_alias(&alias), alias.clone());
                prop_assert_eq!(alias.replace('_', ""), name.to_ascii_lowercase());
            }
        }
    }
}
