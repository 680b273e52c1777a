//! The tenant key hierarchy.
//!
//! Derivation chain:
//!
//! ```text
//! bootstrap secret (recovery phrase | mnemonic | password | API key)
//!     │
//!     ├─ Master Secret (32 bytes, in memory only)
//!     │      └─ HKDF → Master KEK
//!     │                 └─ HKDF per version → Operational KEK (OpKEK)
//!     │                           ├─ HKDF "logs"      → log key
//!     │                           ├─ HKDF "log-names" → log-name key
//!     │                           └─ HKDF "search"    → search key
//!     └─ (API-key path: HMAC → single OpKEK, no Master Secret)
//! ```
//!
//! The hierarchy owns the `version → OpKEK` map and the current-version
//! pointer. Encryption always uses the current version; decryption uses
//! whichever version the ciphertext names. The map never shrinks during a
//! session, and all key material is zeroed on drop.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::mnemonic;
use crate::primitives::{
    hkdf_sha256_key, hmac_sha256, pbkdf2_sha256, random_bytes, RandomSource, SecretKey,
};

// =============================================================================
// Derivation labels
// =============================================================================

/// PBKDF2 iteration count for the recovery-phrase bootstrap.
const RECOVERY_PBKDF2_ITERATIONS: u32 = 100_000;

/// Argon2id memory parameter for the password bootstrap (64 MB).
const ARGON2_MEMORY_KB: u32 = 65536;

/// Argon2id iterations.
const ARGON2_ITERATIONS: u32 = 3;

/// Argon2id parallelism.
const ARGON2_PARALLELISM: u32 = 4;

/// HKDF salt for the Master KEK.
const MASTER_KEK_SALT: &str = "NeuralLog-MasterKEK";

/// HKDF info for the Master KEK.
const MASTER_KEK_INFO: &str = "master-key-encryption-key";

/// HKDF salt prefix for per-version OpKEKs; the version id is appended.
const OP_KEK_SALT_PREFIX: &str = "NeuralLog-OpKEK-";

/// HKDF info for OpKEKs.
const OP_KEK_INFO: &str = "operational-key-encryption-key";

/// Subkey derivation labels: (salt, info) per purpose.
const LOG_KEY_LABELS: (&str, &str) = ("NeuralLog-LogKey", "logs");
const LOG_NAME_KEY_LABELS: (&str, &str) = ("NeuralLog-LogNameKey", "log-names");
const SEARCH_KEY_LABELS: (&str, &str) = ("NeuralLog-SearchKey", "search");

/// HKDF labels for the escrow wrapping key.
const ESCROW_KEY_LABELS: (&str, &str) = ("NeuralLog-KEKEscrow", "kek-encryption");

/// Version id registered by the API-key bootstrap and used when no
/// explicit version set is supplied.
const DEFAULT_VERSION: &str = "v1";

// =============================================================================
// KeyHierarchy
// =============================================================================

/// Per-session key hierarchy for one tenant.
pub struct KeyHierarchy {
    /// Tenant all derivations are salted with.
    tenant_id: String,
    /// 32-byte root secret; absent for API-key bootstraps.
    master_secret: Option<SecretKey>,
    /// Derived once from the master secret; absent for API-key bootstraps.
    master_kek: Option<SecretKey>,
    /// Known OpKEKs by version id. Never shrinks during a session.
    versions: HashMap<String, SecretKey>,
    /// Version used by all encrypt operations.
    current: Option<String>,
}

impl KeyHierarchy {
    // -------------------------------------------------------------------------
    // Bootstrap
    // -------------------------------------------------------------------------

    /// Bootstraps from a high-entropy recovery phrase.
    ///
    /// Master Secret = PBKDF2-SHA256(phrase, "NeuralLog-<tenant>-MasterSecret",
    /// 100 000 iterations, 32 bytes).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidRecoveryPhrase` for an empty phrase and
    /// `ClientError::KekMapEmpty` for an explicitly empty version set.
    pub fn from_recovery_phrase(
        tenant_id: &str,
        phrase: &str,
        versions: Option<&[String]>,
    ) -> Result<Self> {
        if phrase.trim().is_empty() {
            return Err(ClientError::InvalidRecoveryPhrase(
                "phrase must not be empty".into(),
            ));
        }
        let salt = format!("NeuralLog-{}-MasterSecret", tenant_id);
        let stretched = pbkdf2_sha256(
            phrase.as_bytes(),
            salt.as_bytes(),
            RECOVERY_PBKDF2_ITERATIONS,
            32,
        )?;
        let master_secret = SecretKey::from_slice(&stretched)?;
        Self::from_master_secret(tenant_id, master_secret, versions)
    }

    /// Bootstraps from a BIP-39 mnemonic.
    ///
    /// The tenant id doubles as the BIP-39 passphrase, then
    /// Master Secret = HKDF(seed, "neurallog:<tenant>", "master-secret").
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidMnemonic` if the checksum does not
    /// validate.
    pub fn from_mnemonic(
        tenant_id: &str,
        phrase: &str,
        versions: Option<&[String]>,
    ) -> Result<Self> {
        let seed = mnemonic::to_seed(phrase, tenant_id)?;
        let salt = format!("neurallog:{}", tenant_id);
        let master_secret = hkdf_sha256_key(&seed, salt.as_bytes(), b"master-secret")?;
        Self::from_master_secret(tenant_id, master_secret, versions)
    }

    /// Bootstraps from a username/password pair.
    ///
    /// Master Secret = Argon2id(password, SHA-256("NeuralLog-<tenant>:<user>")[..16]).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::PbkdfFailed` if Argon2 rejects its parameters.
    pub fn from_password(
        tenant_id: &str,
        username: &str,
        password: &str,
        versions: Option<&[String]>,
    ) -> Result<Self> {
        use argon2::{Algorithm, Argon2, Params, Version};

        let params = Params::new(ARGON2_MEMORY_KB, ARGON2_ITERATIONS, ARGON2_PARALLELISM, Some(32))
            .map_err(|e| ClientError::PbkdfFailed(format!("Argon2 params: {}", e)))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt_input = format!("NeuralLog-{}:{}", tenant_id, username);
        let digest = Sha256::digest(salt_input.as_bytes());

        let mut master = [0u8; 32];
        argon2
            .hash_password_into(password.as_bytes(), &digest[..16], &mut master)
            .map_err(|e| ClientError::PbkdfFailed(format!("Argon2 hashing: {}", e)))?;

        Self::from_master_secret(tenant_id, SecretKey::from_bytes(master), versions)
    }

    /// Bootstraps from an API key: a single OpKEK derived as
    /// HMAC-SHA256(apiKey, "kek:<tenant>"), registered as `v1`.
    ///
    /// No Master Secret or Master KEK exists in this mode, so additional
    /// versions cannot be derived locally.
    pub fn from_api_key(tenant_id: &str, api_key: &str) -> Result<Self> {
        let label = format!("kek:{}", tenant_id);
        let kek = SecretKey::from_bytes(hmac_sha256(api_key.as_bytes(), label.as_bytes()));

        let mut versions = HashMap::new();
        versions.insert(DEFAULT_VERSION.to_string(), kek);

        debug!(tenant = %tenant_id, "bootstrapped hierarchy from API key");
        Ok(Self {
            tenant_id: tenant_id.to_string(),
            master_secret: None,
            master_kek: None,
            versions,
            current: Some(DEFAULT_VERSION.to_string()),
        })
    }

    /// Common tail of the three master-secret bootstraps: derives the
    /// Master KEK and the requested OpKEK versions.
    ///
    /// With no explicit version set, `v1` is derived. With several versions
    /// and no designated current, the lexicographically largest wins.
    fn from_master_secret(
        tenant_id: &str,
        master_secret: SecretKey,
        versions: Option<&[String]>,
    ) -> Result<Self> {
        let master_kek = hkdf_sha256_key(
            master_secret.as_bytes(),
            MASTER_KEK_SALT.as_bytes(),
            MASTER_KEK_INFO.as_bytes(),
        )?;

        let default = [DEFAULT_VERSION.to_string()];
        let requested = versions.unwrap_or(&default);
        if requested.is_empty() {
            return Err(ClientError::KekMapEmpty);
        }

        let mut map = HashMap::new();
        for version in requested {
            map.insert(version.clone(), derive_op_kek(&master_kek, version)?);
        }
        let current = requested.iter().max().cloned();

        debug!(
            tenant = %tenant_id,
            versions = requested.len(),
            "bootstrapped key hierarchy"
        );
        Ok(Self {
            tenant_id: tenant_id.to_string(),
            master_secret: Some(master_secret),
            master_kek: Some(master_kek),
            versions: map,
            current,
        })
    }

    // -------------------------------------------------------------------------
    // Version map
    // -------------------------------------------------------------------------

    /// The tenant this hierarchy belongs to.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// The version used by encrypt operations.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NoActiveKek` in the unset state.
    pub fn current_version(&self) -> Result<&str> {
        self.current.as_deref().ok_or(ClientError::NoActiveKek)
    }

    /// All known version ids, unordered.
    pub fn known_versions(&self) -> Vec<String> {
        self.versions.keys().cloned().collect()
    }

    /// Whether a version is present in the map.
    pub fn has_version(&self, version: &str) -> bool {
        self.versions.contains_key(version)
    }

    /// Designates `version` as current.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::UnknownKekVersion` if the version is not in
    /// the map; the map is never populated implicitly here.
    pub fn set_current(&mut self, version: &str) -> Result<()> {
        if !self.versions.contains_key(version) {
            return Err(ClientError::UnknownKekVersion(version.to_string()));
        }
        self.current = Some(version.to_string());
        Ok(())
    }

    /// Looks up the OpKEK for a version.
    pub fn op_kek(&self, version: &str) -> Result<&SecretKey> {
        self.versions
            .get(version)
            .ok_or_else(|| ClientError::UnknownKekVersion(version.to_string()))
    }

    /// The OpKEK for the current version.
    pub fn current_op_kek(&self) -> Result<&SecretKey> {
        self.op_kek(self.current_version()?)
    }

    /// Derives any missing requested versions from the Master KEK.
    ///
    /// Idempotent: versions already present are left untouched. Only
    /// derivable (non-rotated) versions can be recovered this way;
    /// rotation-generated KEKs come back through escrow blobs instead.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::HkdfFailed` when this session has no Master
    /// KEK (API-key bootstrap).
    pub fn recover_versions(&mut self, versions: &[String]) -> Result<()> {
        let master_kek = self.master_kek.as_ref().ok_or_else(|| {
            ClientError::HkdfFailed("recover versions: no master KEK in this session".into())
        })?;
        for version in versions {
            if !self.versions.contains_key(version) {
                let kek = derive_op_kek(master_kek, version)?;
                self.versions.insert(version.clone(), kek);
            }
        }
        if self.current.is_none() {
            self.current = self.versions.keys().max().cloned();
        }
        Ok(())
    }

    /// Registers an externally recovered OpKEK (e.g. opened from a
    /// server-side escrow blob). Existing entries are not overwritten.
    pub fn insert_version(&mut self, version: &str, kek: SecretKey) {
        self.versions.entry(version.to_string()).or_insert(kek);
        if self.current.is_none() {
            self.current = Some(version.to_string());
        }
    }

    /// Generates a fresh random OpKEK under a new 16-byte hex id, inserts
    /// it, and makes it current. Returns the new version id.
    pub fn rotate(&mut self, rng: &dyn RandomSource) -> Result<String> {
        let new_kek = SecretKey::random(rng)?;
        let mut id = hex::encode(random_bytes(rng, 16)?);
        // A collision over 128 bits will not happen; the loop documents
        // the uniqueness requirement rather than defends it.
        while self.versions.contains_key(&id) {
            id = hex::encode(random_bytes(rng, 16)?);
        }
        self.versions.insert(id.clone(), new_kek);
        self.current = Some(id.clone());
        debug!(version = %id, "rotated operational KEK");
        Ok(id)
    }

    // -------------------------------------------------------------------------
    // Subkeys
    // -------------------------------------------------------------------------

    /// Log-payload key for the current version.
    pub fn log_key(&self) -> Result<SecretKey> {
        self.log_key_for(self.current_version()?)
    }

    /// Log-payload key for an explicit version.
    pub fn log_key_for(&self, version: &str) -> Result<SecretKey> {
        self.subkey(version, LOG_KEY_LABELS)
    }

    /// Log-name key for the current version.
    pub fn log_name_key(&self) -> Result<SecretKey> {
        self.log_name_key_for(self.current_version()?)
    }

    /// Log-name key for an explicit version.
    pub fn log_name_key_for(&self, version: &str) -> Result<SecretKey> {
        self.subkey(version, LOG_NAME_KEY_LABELS)
    }

    /// Search-token key for the current version.
    pub fn search_key(&self) -> Result<SecretKey> {
        self.subkey(self.current_version()?, SEARCH_KEY_LABELS)
    }

    /// Escrow wrapping key, derived from the Master Secret.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::HkdfFailed` when this session holds no Master
    /// Secret (API-key bootstrap).
    pub fn escrow_key(&self) -> Result<SecretKey> {
        let master_secret = self.master_secret.as_ref().ok_or_else(|| {
            ClientError::HkdfFailed("escrow key: no master secret in this session".into())
        })?;
        hkdf_sha256_key(
            master_secret.as_bytes(),
            ESCROW_KEY_LABELS.0.as_bytes(),
            ESCROW_KEY_LABELS.1.as_bytes(),
        )
    }

    /// Subkeys are re-derived on every use so they can never outlive a
    /// KEK change.
    fn subkey(&self, version: &str, (salt, info): (&str, &str)) -> Result<SecretKey> {
        let op_kek = self.op_kek(version)?;
        hkdf_sha256_key(op_kek.as_bytes(), salt.as_bytes(), info.as_bytes())
    }
}

/// OpKEK for a version: HKDF(MasterKEK, "NeuralLog-OpKEK-<v>").
fn derive_op_kek(master_kek: &SecretKey, version: &str) -> Result<SecretKey> {
    let salt = format!("{}{}", OP_KEK_SALT_PREFIX, version);
    hkdf_sha256_key(master_kek.as_bytes(), salt.as_bytes(), OP_KEK_INFO.as_bytes())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FixedRandom;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn vs(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn recovery_phrase_bootstrap_is_deterministic() {
        let a = KeyHierarchy::from_recovery_phrase("acme", "correct horse battery staple", None)
            .unwrap();
        let b = KeyHierarchy::from_recovery_phrase("acme", "correct horse battery staple", None)
            .unwrap();
        assert_eq!(
            a.current_op_kek().unwrap().as_bytes(),
            b.current_op_kek().unwrap().as_bytes()
        );
        assert_eq!(
            a.log_key().unwrap().as_bytes(),
            b.log_key().unwrap().as_bytes()
        );
    }

    #[test]
    fn recovery_phrase_is_tenant_scoped() {
        let a = KeyHierarchy::from_recovery_phrase("acme", "same phrase", None).unwrap();
        let b = KeyHierarchy::from_recovery_phrase("globex", "same phrase", None).unwrap();
        assert_ne!(
            a.current_op_kek().unwrap().as_bytes(),
            b.current_op_kek().unwrap().as_bytes()
        );
    }

    #[test]
    fn empty_recovery_phrase_is_rejected() {
        assert!(matches!(
            KeyHierarchy::from_recovery_phrase("acme", "   ", None),
            Err(ClientError::InvalidRecoveryPhrase(_))
        ));
    }

    #[test]
    fn mnemonic_bootstrap_reproduces_master_material() {
        // Same phrase and tenant on two independent bootstraps must agree
        // byte for byte; a different tenant must not.
        let a = KeyHierarchy::from_mnemonic("acme", TEST_MNEMONIC, None).unwrap();
        let b = KeyHierarchy::from_mnemonic("acme", TEST_MNEMONIC, None).unwrap();
        let c = KeyHierarchy::from_mnemonic("initech", TEST_MNEMONIC, None).unwrap();
        assert_eq!(
            a.current_op_kek().unwrap().as_bytes(),
            b.current_op_kek().unwrap().as_bytes()
        );
        assert_ne!(
            a.current_op_kek().unwrap().as_bytes(),
            c.current_op_kek().unwrap().as_bytes()
        );
    }

    #[test]
    fn invalid_mnemonic_is_rejected() {
        assert!(matches!(
            KeyHierarchy::from_mnemonic("acme", "not a real mnemonic phrase here", None),
            Err(ClientError::InvalidMnemonic(_))
        ));
    }

    #[test]
    fn password_bootstrap_is_deterministic_and_user_scoped() {
        let a = KeyHierarchy::from_password("acme", "alice", "hunter2!", None).unwrap();
        let b = KeyHierarchy::from_password("acme", "alice", "hunter2!", None).unwrap();
        let c = KeyHierarchy::from_password("acme", "bob", "hunter2!", None).unwrap();
        assert_eq!(
            a.current_op_kek().unwrap().as_bytes(),
            b.current_op_kek().unwrap().as_bytes()
        );
        assert_ne!(
            a.current_op_kek().unwrap().as_bytes(),
            c.current_op_kek().unwrap().as_bytes()
        );
    }

    #[test]
    fn api_key_bootstrap_has_single_version_and_no_master() {
        let mut hierarchy = KeyHierarchy::from_api_key("acme", "k1.AAAA").unwrap();
        assert_eq!(hierarchy.current_version().unwrap(), "v1");
        assert_eq!(hierarchy.known_versions(), vec!["v1".to_string()]);
        assert!(hierarchy.escrow_key().is_err());
        assert!(hierarchy.recover_versions(&vs(&["v2"])).is_err());
    }

    #[test]
    fn default_bootstrap_version_is_v1() {
        let hierarchy = KeyHierarchy::from_recovery_phrase("acme", "phrase", None).unwrap();
        assert_eq!(hierarchy.current_version().unwrap(), "v1");
    }

    #[test]
    fn explicit_empty_version_set_is_rejected() {
        assert!(matches!(
            KeyHierarchy::from_recovery_phrase("acme", "phrase", Some(&[])),
            Err(ClientError::KekMapEmpty)
        ));
    }

    #[test]
    fn current_defaults_to_lexicographically_largest() {
        let hierarchy =
            KeyHierarchy::from_recovery_phrase("acme", "phrase", Some(&vs(&["v1", "v3", "v2"])))
                .unwrap();
        assert_eq!(hierarchy.current_version().unwrap(), "v3");
    }

    #[test]
    fn set_current_requires_known_version() {
        let mut hierarchy =
            KeyHierarchy::from_recovery_phrase("acme", "phrase", Some(&vs(&["v1", "v2"])))
                .unwrap();
        hierarchy.set_current("v1").unwrap();
        assert_eq!(hierarchy.current_version().unwrap(), "v1");
        assert!(matches!(
            hierarchy.set_current("v9"),
            Err(ClientError::UnknownKekVersion(v)) if v == "v9"
        ));
    }

    #[test]
    fn recover_versions_is_idempotent_and_derivable() {
        let full =
            KeyHierarchy::from_recovery_phrase("acme", "phrase", Some(&vs(&["v1", "v2"])))
                .unwrap();
        let mut partial =
            KeyHierarchy::from_recovery_phrase("acme", "phrase", Some(&vs(&["v2"]))).unwrap();

        assert!(partial.op_kek("v1").is_err());
        partial.recover_versions(&vs(&["v1"])).unwrap();
        partial.recover_versions(&vs(&["v1"])).unwrap();
        assert_eq!(
            partial.op_kek("v1").unwrap().as_bytes(),
            full.op_kek("v1").unwrap().as_bytes()
        );
        // Recovery must not disturb the current pointer.
        assert_eq!(partial.current_version().unwrap(), "v2");
    }

    #[test]
    fn rotate_inserts_fresh_current_version() {
        let rng = FixedRandom::new(11);
        let mut hierarchy = KeyHierarchy::from_recovery_phrase("acme", "phrase", None).unwrap();
        let old_kek = hierarchy.current_op_kek().unwrap().clone();

        let version = hierarchy.rotate(&rng).unwrap();
        assert_eq!(version.len(), 32);
        assert!(version.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hierarchy.current_version().unwrap(), version);
        // Old version stays readable.
        assert_eq!(hierarchy.op_kek("v1").unwrap().as_bytes(), old_kek.as_bytes());
        assert_ne!(
            hierarchy.current_op_kek().unwrap().as_bytes(),
            old_kek.as_bytes()
        );
    }

    #[test]
    fn subkeys_are_purpose_separated() {
        let hierarchy = KeyHierarchy::from_recovery_phrase("acme", "phrase", None).unwrap();
        let log = hierarchy.log_key().unwrap();
        let name = hierarchy.log_name_key().unwrap();
        let search = hierarchy.search_key().unwrap();
        assert_ne!(log.as_bytes(), name.as_bytes());
        assert_ne!(log.as_bytes(), search.as_bytes());
        assert_ne!(name.as_bytes(), search.as_bytes());
    }

    #[test]
    fn subkeys_are_version_scoped() {
        let hierarchy =
            KeyHierarchy::from_recovery_phrase("acme", "phrase", Some(&vs(&["v1", "v2"])))
                .unwrap();
        assert_ne!(
            hierarchy.log_key_for("v1").unwrap().as_bytes(),
            hierarchy.log_key_for("v2").unwrap().as_bytes()
        );
    }

    #[test]
    fn unknown_version_lookup_fails() {
        let hierarchy = KeyHierarchy::from_recovery_phrase("acme", "phrase", None).unwrap();
        assert!(matches!(
            hierarchy.op_kek("v7"),
            Err(ClientError::UnknownKekVersion(v)) if v == "v7"
        ));
    }

    #[test]
    fn insert_version_does_not_overwrite() {
        let rng = FixedRandom::new(12);
        let mut hierarchy = KeyHierarchy::from_recovery_phrase("acme", "phrase", None).unwrap();
        let original = hierarchy.op_kek("v1").unwrap().clone();
        hierarchy.insert_version("v1", SecretKey::random(&rng).unwrap());
        assert_eq!(hierarchy.op_kek("v1").unwrap().as_bytes(), original.as_bytes());
    }

    #[test]
    fn escrow_key_is_stable_and_distinct() {
        let a = KeyHierarchy::from_recovery_phrase("acme", "phrase", None).unwrap();
        let b = KeyHierarchy::from_recovery_phrase("acme", "phrase", None).unwrap();
        assert_eq!(a.escrow_key().unwrap().as_bytes(), b.escrow_key().unwrap().as_bytes());
        assert_ne!(
            a.escrow_key().unwrap().as_bytes(),
            a.current_op_kek().unwrap().as_bytes()
        );
    }
}
