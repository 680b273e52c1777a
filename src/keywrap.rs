//! Per-user OpKEK wrapping for rotation fan-out.
//!
//! When an admin rotates the tenant KEK, every still-authorized user must
//! receive the new OpKEK without it ever crossing the wire in the clear.
//! Each user holds a P-256 keypair (distributed by an external key-pair
//! service); the rotation produces one blob per user:
//!
//! 1. Draw an ephemeral P-256 scalar from the injected randomness source.
//! 2. ECDH with the user's public key.
//! 3. HKDF-SHA256 the shared secret into a wrapping key.
//! 4. AES-256-GCM the OpKEK under it.
//!
//! The ephemeral public key travels with the blob; the ephemeral private
//! key is consumed by the shared-secret computation and never stored.

use hkdf::Hkdf;
use p256::{
    elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint},
    EncodedPoint, PublicKey,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{ClientError, Result};
use crate::primitives::{
    aes_gcm_decrypt, aes_gcm_encrypt, b64_decode, b64_encode, random_bytes, random_iv,
    RandomSource, SecretKey, IV_SIZE, KEY_SIZE,
};
use crate::types::UserPublicKey;

/// Domain separation for the ECDH-derived wrapping key.
const WRAP_KEY_INFO: &str = "neurallog-kek-wrap-v1";

/// A new OpKEK encrypted to one user's public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKek {
    /// Recipient user id.
    pub user_id: String,

    /// Ephemeral P-256 public key, uncompressed SEC1 (65 bytes), base64.
    pub ephemeral_public_key: String,

    /// 12-byte IV, base64 encoded.
    pub iv: String,

    /// Encrypted OpKEK with tag appended, base64 encoded.
    pub data: String,

    /// KEK version being delivered.
    pub version: String,
}

/// Wraps `op_kek` to one recipient.
///
/// # Errors
///
/// Returns `ClientError::InvalidCiphertextFormat` if the recipient's
/// public key does not parse as a P-256 point.
pub fn wrap_op_kek(
    op_kek: &SecretKey,
    version: &str,
    recipient: &UserPublicKey,
    rng: &dyn RandomSource,
) -> Result<WrappedKek> {
    let their_public = parse_public_key(&recipient.public_key)?;

    let ephemeral = generate_ephemeral(rng)?;
    let ephemeral_public = ephemeral.public_key().to_encoded_point(false);

    let shared =
        p256::ecdh::diffie_hellman(ephemeral.to_nonzero_scalar(), their_public.as_affine());
    let wrap_key = derive_wrap_key(shared.raw_secret_bytes().as_slice())?;

    let iv = random_iv(rng)?;
    let ciphertext = aes_gcm_encrypt(&wrap_key, &iv, op_kek.as_bytes())?;

    Ok(WrappedKek {
        user_id: recipient.user_id.clone(),
        ephemeral_public_key: b64_encode(ephemeral_public.as_bytes()),
        iv: b64_encode(&iv),
        data: b64_encode(&ciphertext),
        version: version.to_string(),
    })
}

/// Unwraps a blob with the recipient's P-256 private key.
///
/// # Errors
///
/// Returns `ClientError::DecryptionFailed` for the wrong recipient key or
/// a tampered blob, `ClientError::InvalidCiphertextFormat` for malformed
/// fields.
pub fn unwrap_op_kek(recipient_key: &p256::SecretKey, wrapped: &WrappedKek) -> Result<SecretKey> {
    let ephemeral_public = parse_public_key(&wrapped.ephemeral_public_key)?;

    let shared = p256::ecdh::diffie_hellman(
        recipient_key.to_nonzero_scalar(),
        ephemeral_public.as_affine(),
    );
    let wrap_key = derive_wrap_key(shared.raw_secret_bytes().as_slice())?;

    let iv_bytes = b64_decode(&wrapped.iv)?;
    let iv: [u8; IV_SIZE] = iv_bytes
        .as_slice()
        .try_into()
        .map_err(|_| ClientError::InvalidCiphertextFormat("IV must be 12 bytes".into()))?;

    let kek_bytes = aes_gcm_decrypt(&wrap_key, &iv, &b64_decode(&wrapped.data)?)?;
    if kek_bytes.len() != KEY_SIZE {
        return Err(ClientError::InvalidCiphertextFormat(
            "unwrapped KEK has wrong size".into(),
        ));
    }
    SecretKey::from_slice(&kek_bytes)
}

/// Draws an ephemeral P-256 scalar from the injected source.
///
/// Rejection-sampled: a 32-byte draw that is zero or at least the group
/// order is discarded and redrawn (probability below 2^-32 per draw).
fn generate_ephemeral(rng: &dyn RandomSource) -> Result<p256::SecretKey> {
    loop {
        let candidate = random_bytes(rng, KEY_SIZE)?;
        if let Ok(secret) = p256::SecretKey::from_slice(&candidate) {
            return Ok(secret);
        }
    }
}

fn derive_wrap_key(shared_secret: &[u8]) -> Result<SecretKey> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; KEY_SIZE];
    hk.expand(WRAP_KEY_INFO.as_bytes(), &mut key)
        .map_err(|_| ClientError::HkdfFailed("wrap-key expand failed".into()))?;
    Ok(SecretKey::from_bytes(key))
}

fn parse_public_key(encoded: &str) -> Result<PublicKey> {
    let bytes = b64_decode(encoded)?;
    let point = EncodedPoint::from_bytes(&bytes).map_err(|_| {
        ClientError::InvalidCiphertextFormat("public key is not a SEC1 point".into())
    })?;
    Option::from(PublicKey::from_encoded_point(&point)).ok_or_else(|| {
        ClientError::InvalidCiphertextFormat("public key is not on the curve".into())
    })
}

// =============================================================================
// Tests
// =============================================================================
