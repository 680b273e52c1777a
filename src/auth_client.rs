//! Encrypted-KEK escrow against the tenant auth service.
//!
//! The auth service stores escrow blobs and per-version metadata; both
//! are opaque to it. This client moves those documents and nothing else;
//! token issuance, user records, and permission checks live entirely on
//! the service side.

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::types::{EncryptedKekBlob, KekVersionInfo};

/// API response wrapper for the version listing.
#[derive(Debug, Deserialize)]
struct KekVersionsResponse {
    /// Version metadata records, newest first.
    versions: Vec<KekVersionInfo>,
}

/// HTTP client for the tenant auth service's KEK endpoints.
#[derive(Debug, Clone)]
pub struct AuthClient {
    /// Base URL of the auth service (from the discovery document).
    base_url: String,

    /// Resource token for authentication; opaque to the core.
    access_token: String,

    /// Underlying HTTP client.
    client: Client,
}

impl AuthClient {
    /// Creates an auth client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Auth service base URL from the discovery document
    /// * `access_token` - Resource token issued by the auth service
    pub fn new(base_url: &str, access_token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            client: Client::new(),
        }
    }

    /// Fetches the escrow blob for a KEK version.
    ///
    /// Calls `GET /kek/:version`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(blob))` if a blob is escrowed for the version
    /// - `Ok(None)` if nothing is escrowed (404)
    pub async fn get_kek_blob(&self, version: &str) -> Result<Option<EncryptedKekBlob>> {
        let url = format!("{}/kek/{}", self.base_url, version);

        debug!(url = %url, "Fetching escrowed KEK blob");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ClientError::Network(format!("Failed to fetch KEK blob: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(version = %version, "No escrowed blob for version");
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::Network(format!(
                "Auth request failed ({}): {}",
                status, body
            )));
        }

        let blob: EncryptedKekBlob = response
            .json()
            .await
            .map_err(|e| ClientError::Network(format!("Failed to parse KEK blob: {}", e)))?;

        Ok(Some(blob))
    }

    /// Escrows a new blob.
    ///
    /// Calls `POST /kek` with the blob as the JSON body.
    pub async fn store_kek_blob(&self, blob: &EncryptedKekBlob) -> Result<()> {
        let url = format!("{}/kek", self.base_url);

        debug!(url = %url, version = %blob.version, "Escrowing KEK blob");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(blob)
            .send()
            .await
            .map_err(|e| ClientError::Network(format!("Failed to store KEK blob: {}", e)))?;

        ensure_success(response).await
    }

    /// Replaces the escrowed blob for a version.
    ///
    /// Calls `PUT /kek/:version` with the blob as the JSON body.
    pub async fn update_kek_blob(&self, blob: &EncryptedKekBlob) -> Result<()> {
        let url = format!("{}/kek/{}", self.base_url, blob.version);

        debug!(url = %url, "Updating escrowed KEK blob");

        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.access_token)
            .json(blob)
            .send()
            .await
            .map_err(|e| ClientError::Network(format!("Failed to update KEK blob: {}", e)))?;

        ensure_success(response).await
    }

    /// Lists the tenant's KEK version metadata.
    ///
    /// Calls `GET /kek-versions`. The caller typically feeds the active
    /// and deprecated ids into version recovery after bootstrap.
    pub async fn list_kek_versions(&self) -> Result<Vec<KekVersionInfo>> {
        let url = format!("{}/kek-versions", self.base_url);

        debug!(url = %url, "Listing KEK versions");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ClientError::Network(format!("Failed to list KEK versions: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::Network(format!(
                "Auth request failed ({}): {}",
                status, body
            )));
        }

        let data: KekVersionsResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Network(format!("Failed to parse version list: {}", e)))?;

        debug!(count = data.versions.len(), "Fetched KEK versions");

        Ok(data.versions)
    }
}

/// Maps a non-2xx response to a network error with its body.
async fn ensure_success(response: reqwest::Response) -> Result<()> {
    if response.status().is_success() {
        return Ok(());
    }
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(ClientError::Network(format!(
        "Auth request failed ({}): {}",
        status, body
    )))
}
