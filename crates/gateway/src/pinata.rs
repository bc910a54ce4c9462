//! Pinata-backed metadata store.

use async_trait::async_trait;
use certledger_core::{CertError, CertResult, Dependency, Entity};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    config::{PinataConfig, RetryConfig},
    metadata::{MetadataStore, PublishedMetadata},
    retry::{http_error, with_retry},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PinResponse {
    ipfs_hash: String,
}

/// Publishes documents with `pinJSONToIPFS` and reads them back through the
/// public gateway.
#[derive(Debug, Clone)]
pub struct PinataMetadataStore {
    config: PinataConfig,
    client: reqwest::Client,
    fetch_retry: RetryConfig,
}

impl PinataMetadataStore {
    /// Creates a store.
    ///
    /// # Errors
    ///
    /// Returns [`CertError::Internal`] if the HTTP client cannot be built.
    pub fn new(config: PinataConfig) -> CertResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CertError::internal_with_source("failed to build http client", e))?;
        Ok(Self { config, client, fetch_retry: RetryConfig::default() })
    }

    fn pin_name(document: &Value) -> String {
        document
            .get("certificateNumber")
            .and_then(Value::as_str)
            .map_or_else(|| "certificate-metadata".to_owned(), |n| format!("certificate-{n}"))
    }
}

#[async_trait]
impl MetadataStore for PinataMetadataStore {
    #[tracing::instrument(skip(self, document))]
    async fn publish(&self, document: &Value) -> CertResult<PublishedMetadata> {
        let body = json!({
            "pinataContent": document,
            "pinataMetadata": { "name": Self::pin_name(document) },
        });
        let response = self
            .client
            .post(format!("{}/pinning/pinJSONToIPFS", self.config.api_url))
            .bearer_auth(self.config.jwt.as_str())
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| http_error(Dependency::MetadataStore, e))?;

        let pinned: PinResponse = response
            .json()
            .await
            .map_err(|e| http_error(Dependency::MetadataStore, e))?;
        tracing::debug!(content_id = %pinned.ipfs_hash, "metadata pinned");

        Ok(PublishedMetadata { url: self.url_for(&pinned.ipfs_hash), content_id: pinned.ipfs_hash })
    }

    #[tracing::instrument(skip(self))]
    async fn fetch(&self, content_id: &str) -> CertResult<Value> {
        let url = self.url_for(content_id);
        let (client, url) = (&self.client, url.as_str());
        with_retry(&self.fetch_retry, "metadata_fetch", move || async move {
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|e| http_error(Dependency::MetadataStore, e))?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(CertError::not_found(Entity::MetadataObject, content_id));
            }
            response
                .error_for_status()
                .map_err(|e| http_error(Dependency::MetadataStore, e))?
                .json::<Value>()
                .await
                .map_err(|e| http_error(Dependency::MetadataStore, e))
        })
        .await
    }

    fn url_for(&self, content_id: &str) -> String {
        format!("{}/ipfs/{content_id}", self.config.gateway_url)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn store() -> PinataMetadataStore {
        PinataMetadataStore::new(
            PinataConfig::builder().gateway_url("https://gw.example/").jwt("token").build().unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_url_for_uses_gateway() {
        assert_eq!(store().url_for("Qm123"), "https://gw.example/ipfs/Qm123");
    }

    #[test]
    fn test_pin_name_uses_certificate_number() {
        let named = json!({"certificateNumber": "CERT-ABC-123456"});
        assert_eq!(PinataMetadataStore::pin_name(&named), "certificate-CERT-ABC-123456");
        assert_eq!(PinataMetadataStore::pin_name(&json!({})), "certificate-metadata");
    }

    #[test]
    fn test_pin_response_shape() {
        let parsed: PinResponse =
            serde_json::from_str(r#"{"IpfsHash":"Qm1","PinSize":10,"Timestamp":"t"}"#).unwrap();
        assert_eq!(parsed.ipfs_hash, "Qm1");
    }
}
