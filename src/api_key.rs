//! API key derivation and zero-knowledge authentication.
//!
//! An API key is deterministically derived from an OpKEK, so a tenant can
//! re-mint or audit keys without storing them. The auth service only ever
//! holds `(keyId, verificationHash)`; the key itself never leaves the
//! holder. Possession is proven either by recomputing the verification
//! hash (constant time) or by a nonce challenge/response.

use crate::error::Result;
use crate::primitives::{b64_decode, b64_encode, b64url_encode, hmac_sha256, random_bytes, RandomSource, SecretKey};
use crate::types::ApiKeyProof;

/// Label prefix bound into every minted key MAC.
const API_KEY_LABEL_PREFIX: &str = "api_key:";

/// Fixed message for the verification hash.
const VERIFICATION_LABEL: &[u8] = b"verification";

/// Size of the challenge nonce in bytes.
const NONCE_SIZE: usize = 16;

/// A freshly minted API key with the artifacts each party keeps.
#[derive(Debug, Clone)]
pub struct MintedApiKey {
    /// The full key, `<keyId>.<base64url(mac)>`. Held by the caller only.
    pub api_key: String,
    /// The key's public identifier, 32 hex characters.
    pub key_id: String,
    /// Base64 verification hash, registered with the auth service.
    pub verification_hash: String,
}

/// Generates a fresh key id: 16 random bytes, hex encoded.
pub fn generate_key_id(rng: &dyn RandomSource) -> Result<String> {
    Ok(hex::encode(random_bytes(rng, 16)?))
}

/// Mints the API key for `key_id` under the given OpKEK.
///
/// `apiKey = keyId || "." || base64url(HMAC-SHA256(OpKEK, "api_key:<tenant>:<keyId>"))`
pub fn mint(op_kek: &SecretKey, tenant_id: &str, key_id: &str) -> MintedApiKey {
    let label = format!("{}{}:{}", API_KEY_LABEL_PREFIX, tenant_id, key_id);
    let mac = hmac_sha256(op_kek.as_bytes(), label.as_bytes());
    let api_key = format!("{}.{}", key_id, b64url_encode(&mac));
    let verification_hash = verification_hash(&api_key);
    MintedApiKey {
        api_key,
        key_id: key_id.to_string(),
        verification_hash,
    }
}

/// Base64 of `HMAC-SHA256(apiKey, "verification")`.
///
/// This is what the auth service stores; it cannot be inverted to the key
/// and cannot be used to answer a nonce challenge.
pub fn verification_hash(api_key: &str) -> String {
    b64_encode(&hmac_sha256(api_key.as_bytes(), VERIFICATION_LABEL))
}

/// Checks an API key against a stored verification hash in constant time.
///
/// Returns `false` for a hash that does not decode; no detail leaks about
/// how the comparison failed.
pub fn verify(api_key: &str, stored_verification_hash: &str) -> bool {
    use subtle::ConstantTimeEq;

    let expected = hmac_sha256(api_key.as_bytes(), VERIFICATION_LABEL);
    match b64_decode(stored_verification_hash) {
        Ok(stored) => expected.ct_eq(&stored).into(),
        Err(_) => false,
    }
}

/// Produces a challenge/response proof of key possession.
///
/// `proof = HMAC-SHA256(apiKey, base64(nonce))` with a fresh 16-byte
/// nonce. A verifier holding the key recomputes; one holding only the
/// verification hash cannot.
pub fn prove(api_key: &str, rng: &dyn RandomSource) -> Result<ApiKeyProof> {
    let nonce = b64_encode(&random_bytes(rng, NONCE_SIZE)?);
    let proof = b64_encode(&hmac_sha256(api_key.as_bytes(), nonce.as_bytes()));
    Ok(ApiKeyProof { nonce, proof })
}

/// Verifies a challenge/response proof against the full API key.
pub fn verify_proof(api_key: &str, proof: &ApiKeyProof) -> bool {
    use subtle::ConstantTimeEq;

    let expected = hmac_sha256(api_key.as_bytes(), proof.nonce.as_bytes());
    match b64_decode(&proof.proof) {
        Ok(claimed) => expected.ct_eq(&claimed).into(),
        Err(_) => false,
    }
}

// =============================================================================
// Tests
// =============================================================================
