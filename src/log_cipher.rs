//! Log payload encryption.
//!
//! Payloads cross this boundary as opaque bytes (the storage-facing layer
//! picks the serialization). Each record carries the KEK version it was
//! encrypted under, so a reader can decrypt entries written before any
//! number of rotations as long as its version map holds the right OpKEK.

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};
use crate::hierarchy::KeyHierarchy;
use crate::primitives::{
    aes_gcm_decrypt, aes_gcm_encrypt, b64_decode, b64_encode, random_iv, RandomSource, IV_SIZE,
};

/// Cipher identifier embedded in every record.
pub const ALGORITHM_AES_256_GCM: &str = "aes-256-gcm";

/// Encrypted log payload as exchanged with the storage collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedLogRecord {
    /// Always `"aes-256-gcm"`.
    pub algorithm: String,

    /// 12-byte IV, base64 encoded.
    pub iv: String,

    /// Ciphertext with the 16-byte tag appended, base64 encoded.
    pub data: String,

    /// KEK version the log key was derived from. Records written by
    /// pre-versioning clients omit it; decryption then falls back to the
    /// current version.
    #[serde(rename = "kekVersion", default, skip_serializing_if = "Option::is_none")]
    pub kek_version: Option<String>,
}

/// Encrypts a payload under the currently active KEK version.
///
/// # Errors
///
/// Returns `ClientError::NoActiveKek` if the hierarchy is unset, or the
/// primitive's `EncryptionFailed` / `RandomSourceFailed`.
pub fn encrypt(
    hierarchy: &KeyHierarchy,
    rng: &dyn RandomSource,
    plaintext: &[u8],
) -> Result<EncryptedLogRecord> {
    let version = hierarchy.current_version()?.to_string();
    let key = hierarchy.log_key_for(&version)?;
    let iv = random_iv(rng)?;
    let ciphertext = aes_gcm_encrypt(&key, &iv, plaintext)?;

    Ok(EncryptedLogRecord {
        algorithm: ALGORITHM_AES_256_GCM.to_string(),
        iv: b64_encode(&iv),
        data: b64_encode(&ciphertext),
        kek_version: Some(version),
    })
}

/// Decrypts a record using the KEK version it names.
///
/// # Errors
///
/// - `ClientError::UnknownKekVersion` if the named version is not in the
///   map; the caller may recover versions and retry.
/// - `ClientError::InvalidCiphertextFormat` for a bad algorithm tag, IV
///   size, or base64.
/// - `ClientError::DecryptionFailed` on tag mismatch.
pub fn decrypt(hierarchy: &KeyHierarchy, record: &EncryptedLogRecord) -> Result<Vec<u8>> {
    if record.algorithm != ALGORITHM_AES_256_GCM {
        return Err(ClientError::InvalidCiphertextFormat(format!(
            "unsupported algorithm: {}",
            record.algorithm
        )));
    }

    let key = match &record.kek_version {
        Some(version) => hierarchy.log_key_for(version)?,
        // Legacy record without a version marker.
        None => hierarchy.log_key()?,
    };

    let iv_bytes = b64_decode(&record.iv)?;
    let iv: [u8; IV_SIZE] = iv_bytes
        .as_slice()
        .try_into()
        .map_err(|_| ClientError::InvalidCiphertextFormat("IV must be 12 bytes".into()))?;
    let ciphertext = b64_decode(&record.data)?;

    aes_gcm_decrypt(&key, &iv, &ciphertext)
}

/// Re-encrypts a record from `old_version` to `new_version` during
/// rotation fan-out. No metadata is carried over; the output is
/// indistinguishable from a record freshly written under `new_version`.
pub fn reencrypt(
    hierarchy: &KeyHierarchy,
    rng: &dyn RandomSource,
    record: &EncryptedLogRecord,
    old_version: &str,
    new_version: &str,
) -> Result<EncryptedLogRecord> {
    if record.algorithm != ALGORITHM_AES_256_GCM {
        return Err(ClientError::InvalidCiphertextFormat(format!(
            "unsupported algorithm: {}",
            record.algorithm
        )));
    }

    let old_key = hierarchy.log_key_for(old_version)?;
    let iv_bytes = b64_decode(&record.iv)?;
    let iv: [u8; IV_SIZE] = iv_bytes
        .as_slice()
        .try_into()
        .map_err(|_| ClientError::InvalidCiphertextFormat("IV must be 12 bytes".into()))?;
    let plaintext = aes_gcm_decrypt(&old_key, &iv, &b64_decode(&record.data)?)?;

    let new_key = hierarchy.log_key_for(new_version)?;
    let new_iv = random_iv(rng)?;
    let ciphertext = aes_gcm_encrypt(&new_key, &new_iv, &plaintext)?;

    Ok(EncryptedLogRecord {
        algorithm: ALGORITHM_AES_256_GCM.to_string(),
        iv: b64_encode(&new_iv),
        data: b64_encode(&ciphertext),
        kek_version: Some(new_version.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FixedRandom;

    fn hierarchy() -> KeyHierarchy {
        KeyHierarchy::from_recovery_phrase("acme", "test phrase", None).unwrap()
    }

    #[test]
    fn roundtrip() {
        let hierarchy = hierarchy();
        let rng = FixedRandom::new(20);
        let record = encrypt(&hierarchy, &rng, br#"{"msg":"hello"}"#).unwrap();

        assert_eq!(record.algorithm, "aes-256-gcm");
        assert_eq!(record.kek_version.as_deref(), Some("v1"));
        assert_eq!(decrypt(&hierarchy, &record).unwrap(), br#"{"msg":"hello"}"#);
    }

    #[test]
    fn api_key_bootstrap_roundtrip() {
        // Scenario: bootstrap purely from an API key, write, read back.
        let api_key = format!("k1.{}", crate::primitives::b64url_encode(&[0u8; 32]));
        let hierarchy = KeyHierarchy::from_api_key("acme", &api_key).unwrap();
        let rng = FixedRandom::new(21);

        let record = encrypt(&hierarchy, &rng, br#"{"msg":"hello"}"#).unwrap();
        assert_eq!(decrypt(&hierarchy, &record).unwrap(), br#"{"msg":"hello"}"#);
    }

    #[test]
    fn record_names_the_version_used() {
        let mut hierarchy = hierarchy();
        let rng = FixedRandom::new(22);

        let before = encrypt(&hierarchy, &rng, b"x").unwrap();
        let new_version = hierarchy.rotate(&rng).unwrap();
        let after = encrypt(&hierarchy, &rng, b"x").unwrap();

        assert_eq!(before.kek_version.as_deref(), Some("v1"));
        assert_eq!(after.kek_version.as_deref(), Some(new_version.as_str()));
        // Pre-rotation records stay readable.
        assert_eq!(decrypt(&hierarchy, &before).unwrap(), b"x");
        assert_eq!(decrypt(&hierarchy, &after).unwrap(), b"x");
    }

    #[test]
    fn unknown_version_is_reported_for_recovery() {
        let hierarchy = hierarchy();
        let rng = FixedRandom::new(23);
        let mut record = encrypt(&hierarchy, &rng, b"data").unwrap();
        record.kek_version = Some("v2".to_string());

        assert!(matches!(
            decrypt(&hierarchy, &record),
            Err(ClientError::UnknownKekVersion(v)) if v == "v2"
        ));
    }

    #[test]
    fn missing_version_falls_back_to_current() {
        let hierarchy = hierarchy();
        let rng = FixedRandom::new(24);
        let mut record = encrypt(&hierarchy, &rng, b"legacy").unwrap();
        record.kek_version = None;

        assert_eq!(decrypt(&hierarchy, &record).unwrap(), b"legacy");
    }

    #[test]
    fn corrupted_data_fails_closed() {
        let hierarchy = hierarchy();
        let rng = FixedRandom::new(25);
        let record = encrypt(&hierarchy, &rng, b"data").unwrap();

        let mut ciphertext = b64_decode(&record.data).unwrap();
        ciphertext[0] ^= 0x01;
        let tampered = EncryptedLogRecord {
            data: b64_encode(&ciphertext),
            ..record.clone()
        };
        assert!(matches!(
            decrypt(&hierarchy, &tampered),
            Err(ClientError::DecryptionFailed)
        ));
    }

    #[test]
    fn wrong_algorithm_is_a_format_error() {
        let hierarchy = hierarchy();
        let rng = FixedRandom::new(26);
        let mut record = encrypt(&hierarchy, &rng, b"data").unwrap();
        record.algorithm = "aes-128-cbc".to_string();
        assert!(matches!(
            decrypt(&hierarchy, &record),
            Err(ClientError::InvalidCiphertextFormat(_))
        ));
    }

    #[test]
    fn reencrypt_moves_record_to_new_version() {
        let mut hierarchy = hierarchy();
        let rng = FixedRandom::new(27);

        let original = encrypt(&hierarchy, &rng, b"rotate me").unwrap();
        let new_version = hierarchy.rotate(&rng).unwrap();

        let moved = reencrypt(&hierarchy, &rng, &original, "v1", &new_version).unwrap();
        assert_eq!(moved.kek_version.as_deref(), Some(new_version.as_str()));
        assert_eq!(decrypt(&hierarchy, &moved).unwrap(), b"rotate me");

        // Idempotent modulo IV randomness: moving an already-moved record
        // within the same version still decrypts to the same plaintext.
        let again = reencrypt(&hierarchy, &rng, &moved, &new_version, &new_version).unwrap();
        assert_eq!(decrypt(&hierarchy, &again).unwrap(), b"rotate me");
    }

    #[test]
    fn wire_format_uses_kek_version_field_name() {
        let hierarchy = hierarchy();
        let rng = FixedRandom::new(28);
        let record = encrypt(&hierarchy, &rng, b"payload").unwrap();

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["algorithm"], "aes-256-gcm");
        assert_eq!(json["kekVersion"], "v1");
        assert!(json.get("kek_version").is_none());

        // A record without kekVersion still parses (legacy writers).
        let legacy: EncryptedLogRecord = serde_json::from_str(
            r#"{"algorithm":"aes-256-gcm","iv":"AAAAAAAAAAAAAAAA","data":"AAAA"}"#,
        )
        .unwrap();
        assert!(legacy.kek_version.is_none());
    }
}
