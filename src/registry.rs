//! Endpoint discovery against the tenant registry.
//!
//! The registry serves one JSON document per tenant naming the auth,
//! storage, and web endpoints. The crypto core treats it as routing
//! metadata only; nothing in it is trusted with key material.

use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::{ClientError, Result};
use crate::types::RegistryInfo;

/// HTTP client for the endpoint registry.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    /// Base URL of the registry (e.g. "https://registry.neurallog.app").
    base_url: String,

    /// Underlying HTTP client.
    client: Client,
}

impl RegistryClient {
    /// Creates a registry client.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Network` if `base_url` is not a valid
    /// absolute URL.
    pub fn new(base_url: &str) -> Result<Self> {
        Url::parse(base_url)
            .map_err(|e| ClientError::Network(format!("invalid registry URL: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        })
    }

    /// Fetches the discovery document for a tenant.
    ///
    /// Calls `GET /tenants/:tenantId`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Network` if the request fails or the
    /// response cannot be parsed.
    pub async fn discover(&self, tenant_id: &str) -> Result<RegistryInfo> {
        let url = format!("{}/tenants/{}", self.base_url, tenant_id);

        debug!(url = %url, "Fetching tenant discovery document");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Network(format!("Failed to reach registry: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::Network(format!(
                "Registry request failed ({}): {}",
                status, body
            )));
        }

        let info: RegistryInfo = response.json().await.map_err(|e| {
            ClientError::Network(format!("Failed to parse discovery document: {}", e))
        })?;

        debug!(tenant = %info.tenant_id, "Fetched discovery document");

        Ok(info)
    }
}
