//! Deterministic log-name encryption and search tokens.
//!
//! Log names are lookup keys: the server routes requests by encrypted
//! name, so the same plaintext under the same OpKEK must produce the same
//! ciphertext across sessions. The IV is therefore derived as
//! `HMAC-SHA256(logNameKey, "iv:" || plaintext)[..12]` instead of drawn
//! from the CSPRNG. This is nonce-safe: two distinct plaintexts can never
//! share an IV under the same key, and identical plaintexts produce the
//! identical (intended) ciphertext. A fixed IV would NOT be safe here.
//!
//! Search tokens are keyed HMACs over lowercased terms. The server does
//! exact set-membership matching and learns nothing about term content,
//! frequency, or position.

use std::collections::HashSet;

use crate::error::{ClientError, Result};
use crate::hierarchy::KeyHierarchy;
use crate::primitives::{
    aes_gcm_decrypt, aes_gcm_encrypt, b64url_decode, b64url_encode, hmac_sha256, SecretKey,
    IV_SIZE, TAG_SIZE,
};

/// Domain-separation prefix for the derived IV.
const IV_PREFIX: &[u8] = b"iv:";

/// Encrypts a log name deterministically under the current OpKEK.
///
/// Wire layout, URL-safe unpadded base64 of:
/// `| 1B version length | version bytes | 12B iv | ciphertext+tag |`
///
/// # Errors
///
/// Returns `ClientError::NoActiveKek` if the hierarchy is unset, and
/// `ClientError::InvalidCiphertextFormat` for version ids longer than
/// 255 bytes.
pub fn encrypt_log_name(hierarchy: &KeyHierarchy, name: &str) -> Result<String> {
    let version = hierarchy.current_version()?.to_string();
    let key = hierarchy.log_name_key_for(&version)?;
    encode_versioned(&key, &version, name)
}

/// Decrypts an encrypted log name, using the version embedded in it.
///
/// # Errors
///
/// - `ClientError::InvalidCiphertextFormat` for malformed base64 or a
///   truncated header.
/// - `ClientError::UnknownKekVersion` if the embedded version is not in
///   the map.
/// - `ClientError::DecryptionFailed` on tag mismatch.
pub fn decrypt_log_name(hierarchy: &KeyHierarchy, encoded: &str) -> Result<String> {
    let blob = b64url_decode(encoded)?;

    let (version, rest) = split_versioned_header(&blob)?;
    let key = hierarchy.log_name_key_for(&version)?;

    let iv: [u8; IV_SIZE] = rest[..IV_SIZE]
        .try_into()
        .expect("header split guarantees 12 IV bytes");
    let plaintext = aes_gcm_decrypt(&key, &iv, &rest[IV_SIZE..])?;

    String::from_utf8(plaintext).map_err(|_| ClientError::DecryptionFailed)
}

/// Derives deterministic search tokens for a query string.
///
/// The query is lowercased and split into terms; each term maps to
/// URL-safe base64 of `HMAC-SHA256(searchKey, term)`. Duplicate terms
/// collapse; order follows first occurrence.
pub fn search_tokens(hierarchy: &KeyHierarchy, query: &str) -> Result<Vec<String>> {
    let key = hierarchy.search_key()?;
    Ok(tokenize(query)
        .map(|term| token_for(&key, term))
        .collect::<IndexSet>()
        .into_tokens())
}

/// Derives the index-side token set for a payload about to be written.
///
/// Tokens come from the payload's serialized form, so a search for any
/// term appearing in it will match.
pub fn index_tokens(hierarchy: &KeyHierarchy, payload: &[u8]) -> Result<Vec<String>> {
    let text = String::from_utf8_lossy(payload);
    search_tokens(hierarchy, &text)
}

/// Lowercases and splits on every non-alphanumeric byte.
///
/// Queries are whitespace-separated so this matches plain term splitting;
/// payload-side input is a JSON serialization, where quotes, braces, and
/// colons must also separate terms or no token would ever line up with a
/// query token.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn token_for(key: &SecretKey, term: String) -> String {
    b64url_encode(&hmac_sha256(key.as_bytes(), term.as_bytes()))
}

/// Insertion-ordered token set.
#[derive(Default)]
struct IndexSet {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl IndexSet {
    fn into_tokens(self) -> Vec<String> {
        self.ordered
    }
}

impl FromIterator<String> for IndexSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut set = IndexSet::default();
        for token in iter {
            if set.seen.insert(token.clone()) {
                set.ordered.push(token);
            }
        }
        set
    }
}

/// Builds the versioned blob for a name under the given key and version.
fn encode_versioned(key: &SecretKey, version: &str, name: &str) -> Result<String> {
    let version_bytes = version.as_bytes();
    if version_bytes.len() > u8::MAX as usize {
        return Err(ClientError::InvalidCiphertextFormat(
            "version id exceeds 255 bytes".into(),
        ));
    }

    let mac = hmac_sha256(key.as_bytes(), &[IV_PREFIX, name.as_bytes()].concat());
    let iv: [u8; IV_SIZE] = mac[..IV_SIZE]
        .try_into()
        .expect("HMAC-SHA256 output is longer than an IV");

    let ciphertext = aes_gcm_encrypt(key, &iv, name.as_bytes())?;

    let mut blob = Vec::with_capacity(1 + version_bytes.len() + IV_SIZE + ciphertext.len());
    blob.push(version_bytes.len() as u8);
    blob.extend_from_slice(version_bytes);
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    Ok(b64url_encode(&blob))
}

/// Splits `| 1B verLen | version | iv+ciphertext |`, validating lengths.
fn split_versioned_header(blob: &[u8]) -> Result<(String, &[u8])> {
    let Some((&version_len, rest)) = blob.split_first() else {
        return Err(ClientError::InvalidCiphertextFormat("empty blob".into()));
    };
    let version_len = version_len as usize;
    if rest.len() < version_len + IV_SIZE + TAG_SIZE {
        return Err(ClientError::InvalidCiphertextFormat(
            "blob shorter than its header claims".into(),
        ));
    }
    let version = std::str::from_utf8(&rest[..version_len])
        .map_err(|_| ClientError::InvalidCiphertextFormat("version id is not UTF-8".into()))?;
    Ok((version.to_string(), &rest[version_len..]))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FixedRandom;

    fn hierarchy() -> KeyHierarchy {
        KeyHierarchy::from_recovery_phrase("acme", "test phrase", None).unwrap()
    }

    #[test]
    fn log_name_encryption_is_deterministic() {
        // Scenario: the same name twice under one OpKEK, then under a
        // rotated OpKEK; both decrypt, only the first pair is identical.
        let mut hierarchy = hierarchy();
        let first = encrypt_log_name(&hierarchy, "app-logs").unwrap();
        let second = encrypt_log_name(&hierarchy, "app-logs").unwrap();
        assert_eq!(first, second);

        let rng = FixedRandom::new(30);
        hierarchy.rotate(&rng).unwrap();
        let rotated = encrypt_log_name(&hierarchy, "app-logs").unwrap();
        assert_ne!(first, rotated);

        assert_eq!(decrypt_log_name(&hierarchy, &first).unwrap(), "app-logs");
        assert_eq!(decrypt_log_name(&hierarchy, &rotated).unwrap(), "app-logs");
    }

    #[test]
    fn distinct_names_encrypt_distinctly() {
        let hierarchy = hierarchy();
        let a = encrypt_log_name(&hierarchy, "app-logs").unwrap();
        let b = encrypt_log_name(&hierarchy, "app-log").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn encrypted_names_are_url_safe() {
        let hierarchy = hierarchy();
        let encoded = encrypt_log_name(&hierarchy, "prod/api logs + metrics").unwrap();
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn tampered_name_fails_closed() {
        let hierarchy = hierarchy();
        let encoded = encrypt_log_name(&hierarchy, "app-logs").unwrap();
        let mut blob = b64url_decode(&encoded).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(
            decrypt_log_name(&hierarchy, &b64url_encode(&blob)),
            Err(ClientError::DecryptionFailed)
        ));
    }

    #[test]
    fn truncated_blob_is_a_format_error() {
        let hierarchy = hierarchy();
        let encoded = encrypt_log_name(&hierarchy, "app-logs").unwrap();
        let blob = b64url_decode(&encoded).unwrap();
        for len in [0, 1, 5, 20] {
            assert!(matches!(
                decrypt_log_name(&hierarchy, &b64url_encode(&blob[..len])),
                Err(ClientError::InvalidCiphertextFormat(_))
            ));
        }
    }

    #[test]
    fn name_from_unknown_version_reports_it() {
        let full = KeyHierarchy::from_recovery_phrase(
            "acme",
            "test phrase",
            Some(&["v1".to_string(), "v2".to_string()]),
        )
        .unwrap();
        let partial = hierarchy(); // v1 only

        // full's current is v2; partial cannot look that up.
        let encoded = encrypt_log_name(&full, "app-logs").unwrap();
        assert!(matches!(
            decrypt_log_name(&partial, &encoded),
            Err(ClientError::UnknownKekVersion(v)) if v == "v2"
        ));
    }

    #[test]
    fn search_tokens_are_deterministic() {
        let hierarchy = hierarchy();
        let a = search_tokens(&hierarchy, "error timeout").unwrap();
        let b = search_tokens(&hierarchy, "error timeout").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn search_tokens_are_case_insensitive() {
        let hierarchy = hierarchy();
        assert_eq!(
            search_tokens(&hierarchy, "ERROR Timeout").unwrap(),
            search_tokens(&hierarchy, "error timeout").unwrap()
        );
    }

    #[test]
    fn duplicate_terms_collapse() {
        let hierarchy = hierarchy();
        let tokens = search_tokens(&hierarchy, "retry retry retry").unwrap();
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn index_tokens_cover_query_terms() {
        // Scenario: query "error timeout" vs a payload containing only
        // "error": the index set must include the first query token and
        // exclude the second.
        let hierarchy = hierarchy();
        let query = search_tokens(&hierarchy, "error timeout").unwrap();
        let index =
            index_tokens(&hierarchy, br#"{"level":"error","msg":"disk full"}"#).unwrap();

        assert!(index.contains(&query[0]));
        assert!(!index.contains(&query[1]));
    }

    #[test]
    fn tokens_depend_on_the_active_kek() {
        let mut hierarchy = hierarchy();
        let before = search_tokens(&hierarchy, "error").unwrap();
        let rng = FixedRandom::new(31);
        hierarchy.rotate(&rng).unwrap();
        let after = search_tokens(&hierarchy, "error").unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn tokenizer_splits_json_punctuation() {
        let terms: Vec<String> = tokenize(r#"{"level":"error","code":500}"#).collect();
        assert_eq!(terms, vec!["level", "error", "code", "500"]);
    }

    #[test]
    fn tokenizer_handles_unicode_terms() {
        let terms: Vec<String> = tokenize("Fehler: zeitüberschreitung").collect();
        assert_eq!(terms, vec!["fehler", "zeitüberschreitung"]);
    }
}
