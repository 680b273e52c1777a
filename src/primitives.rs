//! Cryptographic primitives shared by the whole client core.
//!
//! Everything above this module (key hierarchy, payload and name ciphers,
//! API keys) is built from the operations here:
//! - AES-256-GCM for authenticated encryption
//! - HMAC-SHA256/384/512 for tokens, verification hashes, and derived IVs
//! - HKDF-SHA256 for key derivation
//! - PBKDF2-SHA256 for recovery-phrase stretching
//! - Base64 / URL-safe unpadded Base64 codecs
//!
//! Randomness flows through the [`RandomSource`] capability so tests can
//! substitute a deterministic generator. Every other operation is a pure
//! function of its inputs.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Sha256, Sha384, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ClientError, Result};

// =============================================================================
// Constants
// =============================================================================

/// Key size in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// IV size in bytes for AES-GCM (96 bits).
pub const IV_SIZE: usize = 12;

/// Auth tag size in bytes for AES-GCM (128 bits).
pub const TAG_SIZE: usize = 16;

// =============================================================================
// Types
// =============================================================================

/// A 256-bit key that is securely zeroed when dropped.
///
/// Deliberately no `PartialEq`: key comparisons must go through
/// `subtle::ConstantTimeEq` on the raw bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    /// Creates a key from existing bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a key from a slice, failing if it is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| ClientError::InvalidCiphertextFormat("key must be 32 bytes".into()))?;
        Ok(Self(arr))
    }

    /// Creates a fresh random key from the given source.
    pub fn random(rng: &dyn RandomSource) -> Result<Self> {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Returns a reference to the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl AsRef<[u8]> for SecretKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

// =============================================================================
// Randomness
// =============================================================================

/// Capability trait for the CSPRNG.
///
/// The production implementation is [`OsRandom`]; tests inject a seeded
/// deterministic source. Passing the source explicitly keeps every
/// nondeterministic operation visible at the call site.
pub trait RandomSource: Send + Sync {
    /// Fills `dest` with random bytes.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::RandomSourceFailed` if the underlying
    /// generator cannot produce bytes. This is fatal.
    fn fill(&self, dest: &mut [u8]) -> Result<()>;
}

/// Platform CSPRNG-backed random source.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| ClientError::RandomSourceFailed(e.to_string()))
    }
}

/// Draws `n` random bytes from the given source.
pub fn random_bytes(rng: &dyn RandomSource, n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    rng.fill(&mut buf)?;
    Ok(buf)
}

/// Draws a fresh 12-byte AES-GCM IV.
pub fn random_iv(rng: &dyn RandomSource) -> Result<[u8; IV_SIZE]> {
    let mut iv = [0u8; IV_SIZE];
    rng.fill(&mut iv)?;
    Ok(iv)
}

// =============================================================================
// AEAD (AES-256-GCM)
// =============================================================================

/// Encrypts with AES-256-GCM, returning `ciphertext || 16-byte tag`.
///
/// The caller supplies the IV: payload encryption uses a fresh random IV,
/// log-name encryption a deterministic HMAC-derived one.
pub fn aes_gcm_encrypt(key: &SecretKey, iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|e| ClientError::EncryptionFailed(format!("AES-GCM: {}", e)))
}

/// Decrypts `ciphertext || tag` with AES-256-GCM.
///
/// # Errors
///
/// Returns `ClientError::DecryptionFailed` on tag mismatch. The AEAD
/// primitive performs the comparison in constant time; no distinction is
/// made between a wrong key and corrupted ciphertext.
pub fn aes_gcm_decrypt(
    key: &SecretKey,
    iv: &[u8; IV_SIZE],
    ciphertext_tag: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext_tag.len() < TAG_SIZE {
        return Err(ClientError::InvalidCiphertextFormat(
            "ciphertext shorter than the auth tag".into(),
        ));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext_tag)
        .map_err(|_| ClientError::DecryptionFailed)
}

// =============================================================================
// MACs
// =============================================================================

/// HMAC-SHA256 of `data` under `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac =
        <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// HMAC-SHA384 of `data` under `key`.
pub fn hmac_sha384(key: &[u8], data: &[u8]) -> [u8; 48] {
    let mut mac =
        <Hmac<Sha384> as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// HMAC-SHA512 of `data` under `key`.
pub fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    let mut mac =
        <Hmac<Sha512> as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

// =============================================================================
// Key Derivation Functions
// =============================================================================

/// HKDF-SHA256 over `ikm` with the given salt and info.
///
/// # Errors
///
/// Returns `ClientError::HkdfFailed` for output lengths beyond
/// 255 x 32 bytes (the RFC 5869 expand limit).
pub fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut out = vec![0u8; length];
    hk.expand(info, &mut out)
        .map_err(|_| ClientError::HkdfFailed(format!("output length {} exceeds limit", length)))?;
    Ok(out)
}

/// HKDF-SHA256 producing exactly one 256-bit key.
pub fn hkdf_sha256_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<SecretKey> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut out = [0u8; KEY_SIZE];
    hk.expand(info, &mut out)
        .map_err(|_| ClientError::HkdfFailed("32-byte expand failed".into()))?;
    Ok(SecretKey::from_bytes(out))
}

/// HKDF-SHA384 over `ikm` with the given salt and info.
pub fn hkdf_sha384(ikm: &[u8], salt: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha384>::new(Some(salt), ikm);
    let mut out = vec![0u8; length];
    hk.expand(info, &mut out)
        .map_err(|_| ClientError::HkdfFailed(format!("output length {} exceeds limit", length)))?;
    Ok(out)
}

/// HKDF-SHA512 over `ikm` with the given salt and info.
pub fn hkdf_sha512(ikm: &[u8], salt: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha512>::new(Some(salt), ikm);
    let mut out = vec![0u8; length];
    hk.expand(info, &mut out)
        .map_err(|_| ClientError::HkdfFailed(format!("output length {} exceeds limit", length)))?;
    Ok(out)
}

/// PBKDF2-HMAC-SHA256 password stretching.
///
/// # Errors
///
/// Returns `ClientError::PbkdfFailed` if `iterations` is zero.
pub fn pbkdf2_sha256(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    length: usize,
) -> Result<Vec<u8>> {
    if iterations == 0 {
        return Err(ClientError::PbkdfFailed("iteration count must be nonzero".into()));
    }
    let mut out = vec![0u8; length];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    Ok(out)
}

/// PBKDF2-HMAC-SHA512 password stretching.
pub fn pbkdf2_sha512(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    length: usize,
) -> Result<Vec<u8>> {
    if iterations == 0 {
        return Err(ClientError::PbkdfFailed("iteration count must be nonzero".into()));
    }
    let mut out = vec![0u8; length];
    pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, iterations, &mut out);
    Ok(out)
}

// =============================================================================
// Base64 Codecs
// =============================================================================

/// Encodes bytes to standard base64.
pub fn b64_encode(data: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(data)
}

/// Decodes a standard base64 string.
pub fn b64_decode(encoded: &str) -> Result<Vec<u8>> {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD
        .decode(encoded)
        .map_err(|e| ClientError::InvalidCiphertextFormat(format!("base64 decode: {}", e)))
}

/// Encodes bytes to URL-safe unpadded base64.
pub fn b64url_encode(data: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(data)
}

/// Decodes a URL-safe unpadded base64 string.
pub fn b64url_decode(encoded: &str) -> Result<Vec<u8>> {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| ClientError::InvalidCiphertextFormat(format!("base64url decode: {}", e)))
}

// =============================================================================
// Tests
// =============================================================================
