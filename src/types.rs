//! Wire records exchanged with the external collaborators.
//!
//! Everything here is an opaque data contract: the auth service stores
//! and returns these documents without being able to read what they
//! protect. Field names follow the service wire format (camelCase).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An OpKEK encrypted for server-side escrow.
///
/// Produced under a key derived from the Master Secret, so only a client
/// that can rebuild the hierarchy can open it. This is how
/// rotation-generated (non-derivable) KEKs survive session restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKekBlob {
    /// 12-byte IV, base64 encoded.
    pub iv: String,

    /// Encrypted OpKEK with tag appended, base64 encoded.
    pub data: String,

    /// KEK version this blob escrows.
    pub version: String,
}

/// Challenge/response proof of API key possession.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyProof {
    /// 16-byte challenge nonce, base64 encoded.
    pub nonce: String,

    /// `HMAC-SHA256(apiKey, nonce)`, base64 encoded.
    pub proof: String,
}

/// Lifecycle status of a KEK version as tracked by the auth service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KekStatus {
    /// The version new writes should use.
    Active,
    /// Readable for old entries, no longer written.
    Deprecated,
}

/// Metadata the auth service keeps per KEK version.
///
/// The client reads these during version discovery to decide which
/// versions to recover; the key material itself never appears here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KekVersionInfo {
    /// Version id (`v1`, `v2`, ... or a 16-byte hex id for rotations).
    pub id: String,

    /// When the version was created.
    pub created_at: DateTime<Utc>,

    /// Whether new writes should use this version.
    pub status: KekStatus,

    /// Operator-supplied reason the version exists (initial setup,
    /// scheduled rotation, compromise response, ...).
    pub reason: String,
}

/// Endpoint-discovery document served by the registry.
///
/// Transparent to the crypto core; only used to route storage and auth
/// calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryInfo {
    /// Tenant the endpoints belong to.
    pub tenant_id: String,

    /// Base URL of the tenant auth service.
    pub auth_url: String,

    /// Base URL of the log storage server.
    pub server_url: String,

    /// Base URL of the web console.
    pub web_url: String,

    /// Version tag of the collaborator API surface.
    pub api_version: String,
}

/// A user's public key, as handed to the rotation fan-out.
///
/// The key-pair service distributes these out of band; the core only
/// consumes the SEC1-encoded point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPublicKey {
    /// User the key belongs to.
    pub user_id: String,

    /// Uncompressed SEC1 P-256 point (65 bytes), base64 encoded.
    pub public_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kek_blob_roundtrip() {
        let blob = EncryptedKekBlob {
            iv: "AAAAAAAAAAAAAAAA".into(),
            data: "Zm9vYmFy".into(),
            version: "v2".into(),
        };
        let json = serde_json::to_string(&blob).unwrap();
        let parsed: EncryptedKekBlob = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.version, "v2");
        assert_eq!(parsed.iv, blob.iv);
    }

    #[test]
    fn version_info_uses_camel_case() {
        let json = r#"{
            "id": "v1",
            "createdAt": "2025-02-10T09:00:00Z",
            "status": "active",
            "reason": "initial setup"
        }"#;
        let info: KekVersionInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.id, "v1");
        assert_eq!(info.status, KekStatus::Active);

        let out = serde_json::to_value(&info).unwrap();
        assert!(out.get("createdAt").is_some());
        assert!(out.get("created_at").is_none());
    }

    #[test]
    fn version_status_is_lowercase_on_the_wire() {
        assert_eq!(serde_json::to_string(&KekStatus::Active).unwrap(), r#""active""#);
        assert_eq!(
            serde_json::to_string(&KekStatus::Deprecated).unwrap(),
            r#""deprecated""#
        );
    }

    #[test]
    fn registry_info_parses_discovery_document() {
        let json = r#"{
            "tenantId": "acme",
            "authUrl": "https://auth.acme.neurallog.app",
            "serverUrl": "https://logs.acme.neurallog.app",
            "webUrl": "https://acme.neurallog.app",
            "apiVersion": "v1"
        }"#;
        let info: RegistryInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.tenant_id, "acme");
        assert_eq!(info.auth_url, "https://auth.acme.neurallog.app");
        assert_eq!(info.api_version, "v1");
    }

    #[test]
    fn proof_roundtrip() {
        let proof = ApiKeyProof {
            nonce: "bm9uY2U=".into(),
            proof: "cHJvb2Y=".into(),
        };
        let json = serde_json::to_string(&proof).unwrap();
        let parsed: ApiKeyProof = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.nonce, proof.nonce);
        assert_eq!(parsed.proof, proof.proof);
    }
}
