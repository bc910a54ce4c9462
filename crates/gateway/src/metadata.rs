//! Content-addressed metadata store.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use certledger_core::{CertError, CertResult, Dependency, Entity};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedMetadata {
    /// Content identifier of the stored document.
    pub content_id: String,
    /// Retrieval URL for the document.
    pub url: String,
}

/// A store that addresses JSON documents by content.
///
/// Publishing the same document twice yields the same content id.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Stores `document`.
    async fn publish(&self, document: &Value) -> CertResult<PublishedMetadata>;

    /// Retrieves a document, `NotFound` if the store has no such content.
    async fn fetch(&self, content_id: &str) -> CertResult<Value>;

    /// Retrieval URL for `content_id`.
    fn url_for(&self, content_id: &str) -> String;
}

#[derive(Debug, Default)]
struct Objects {
    documents: HashMap<String, Value>,
    failing_publishes: u32,
    publishes: u64,
}

/// In-memory metadata store.
///
/// Content ids are the hex SHA-256 of the canonical JSON encoding. Object
/// keys are serialized in sorted order, so equal documents share an id.
#[derive(Debug, Clone)]
pub struct MemoryMetadataStore {
    gateway_url: String,
    objects: Arc<RwLock<Objects>>,
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new("https://gateway.example")
    }
}

impl MemoryMetadataStore {
    /// Creates an empty store whose URLs are rooted at `gateway_url`.
    #[must_use]
    pub fn new(gateway_url: impl Into<String>) -> Self {
        let gateway_url: String = gateway_url.into();
        Self {
            gateway_url: gateway_url.trim_end_matches('/').to_owned(),
            objects: Arc::new(RwLock::new(Objects::default())),
        }
    }

    /// Fails the next `n` publishes with a transient error.
    pub fn fail_next_publishes(&self, n: u32) {
        self.objects.write().failing_publishes = n;
    }

    /// Successful publishes so far.
    #[must_use]
    pub fn publish_count(&self) -> u64 {
        self.objects.read().publishes
    }

    /// Stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().documents.len()
    }

    /// Returns `true` if nothing has been published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hex SHA-256 of the canonical JSON encoding of `document`.
///
/// # Errors
///
/// Returns [`CertError::Internal`] if the document cannot be serialized.
pub fn content_id_for(document: &Value) -> CertResult<String> {
    let canonical = serde_json::to_vec(document)
        .map_err(|e| CertError::internal_with_source("metadata serialization failed", e))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn publish(&self, document: &Value) -> CertResult<PublishedMetadata> {
        let content_id = content_id_for(document)?;
        let mut objects = self.objects.write();
        if objects.failing_publishes > 0 {
            objects.failing_publishes -= 1;
            return Err(CertError::external_transient(
                Dependency::MetadataStore,
                "simulated pinning service failure",
            ));
        }
        objects.documents.insert(content_id.clone(), document.clone());
        objects.publishes += 1;
        Ok(PublishedMetadata { url: self.url_for(&content_id), content_id })
    }

    async fn fetch(&self, content_id: &str) -> CertResult<Value> {
        self.objects
            .read()
            .documents
            .get(content_id)
            .cloned()
            .ok_or_else(|| CertError::not_found(Entity::MetadataObject, content_id))
    }

    fn url_for(&self, content_id: &str) -> String {
        format!("{}/ipfs/{content_id}", self.gateway_url)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_equal_documents_share_content_id() {
        let store = MemoryMetadataStore::default();
        let a = store.publish(&json!({"b": 1, "a": 2})).await.unwrap();
        let b = store.publish(&json!({"a": 2, "b": 1})).await.unwrap();
        assert_eq!(a.content_id, b.content_id);
        assert_eq!(store.len(), 1);
        assert_eq!(a.url, format!("https://gateway.example/ipfs/{}", a.content_id));
    }

    #[tokio::test]
    async fn test_fetch_miss_is_not_found() {
        let store = MemoryMetadataStore::default();
        let err = store.fetch("missing").await.unwrap_err();
        assert!(matches!(err, CertError::NotFound { entity: Entity::MetadataObject, .. }));
    }

    #[tokio::test]
    async fn test_injected_failure_is_transient() {
        let store = MemoryMetadataStore::new("https://gw.example/");
        store.fail_next_publishes(1);
        assert!(store.publish(&json!({"x": 1})).await.unwrap_err().is_transient());
        let published = store.publish(&json!({"x": 1})).await.unwrap();
        assert!(published.url.starts_with("https://gw.example/ipfs/"));
        assert_eq!(store.publish_count(), 1);
    }
}
