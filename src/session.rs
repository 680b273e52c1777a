//! Session coordination: bootstrap, rotation, and KEK escrow.
//!
//! A [`Session`] owns one tenant's [`KeyHierarchy`] behind a read/write
//! lock. Encrypt, decrypt, and derive operations take shared access;
//! rotation, recovery, and current-version changes take exclusive access,
//! which also serializes concurrent rotations. No lock is held across an
//! await point, and a rotation issued strictly before an encrypt is
//! observed by it.
//!
//! Bootstrap is the only expensive path (PBKDF2/Argon2 stretching); it is
//! cancelable at the KDF boundary and a cancelled bootstrap constructs
//! nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api_key::{self, MintedApiKey};
use crate::error::{ClientError, Result};
use crate::hierarchy::KeyHierarchy;
use crate::keywrap::{self, WrappedKek};
use crate::log_cipher::{self, EncryptedLogRecord};
use crate::name_cipher;
use crate::primitives::{
    aes_gcm_decrypt, aes_gcm_encrypt, b64_decode, b64_encode, random_iv, OsRandom, RandomSource,
    SecretKey, IV_SIZE, KEY_SIZE,
};
use crate::shamir::{self, Share};
use crate::types::{EncryptedKekBlob, UserPublicKey};

// =============================================================================
// Bootstrap inputs
// =============================================================================

/// The secret a session is bootstrapped from.
#[derive(Clone)]
pub enum BootstrapOptions {
    /// Username/password pair, stretched with Argon2id.
    Password { username: String, password: String },
    /// BIP-39 mnemonic phrase.
    Mnemonic { phrase: String },
    /// High-entropy recovery phrase.
    RecoveryPhrase { phrase: String },
    /// A minted API key; yields a single non-derivable KEK version.
    ApiKey { api_key: String },
}

impl std::fmt::Debug for BootstrapOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secrets themselves.
        let variant = match self {
            BootstrapOptions::Password { .. } => "Password",
            BootstrapOptions::Mnemonic { .. } => "Mnemonic",
            BootstrapOptions::RecoveryPhrase { .. } => "RecoveryPhrase",
            BootstrapOptions::ApiKey { .. } => "ApiKey",
        };
        write!(f, "BootstrapOptions::{}([REDACTED])", variant)
    }
}

/// Cooperative cancellation flag for bootstrap.
///
/// Checked at the KDF boundary; flipping it after the hierarchy has been
/// committed has no effect.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Result of a KEK rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationOutcome {
    /// The freshly generated version id, now current.
    pub version: String,
    /// Operator-supplied reason, recorded with the version metadata.
    pub reason: String,
    /// One wrapped copy of the new OpKEK per still-authorized user.
    pub wrapped_keks: Vec<WrappedKek>,
}

// =============================================================================
// Session
// =============================================================================

/// One tenant session: the key hierarchy plus the randomness capability.
///
/// Higher layers compose by passing the session in; nothing here holds a
/// back-reference to anything.
pub struct Session {
    tenant_id: String,
    hierarchy: RwLock<KeyHierarchy>,
    rng: Arc<dyn RandomSource>,
}

impl Session {
    /// Bootstraps a session with the platform CSPRNG.
    pub fn bootstrap(
        tenant_id: &str,
        options: BootstrapOptions,
        versions: Option<Vec<String>>,
    ) -> Result<Self> {
        Self::bootstrap_with(
            tenant_id,
            options,
            versions,
            Arc::new(OsRandom),
            &CancelToken::new(),
        )
    }

    /// Bootstraps with an explicit randomness capability and cancel token.
    ///
    /// # Errors
    ///
    /// `ClientError::Cancelled` if the token fires before the derived
    /// hierarchy is committed; bootstrap-path errors otherwise (see
    /// [`KeyHierarchy`]).
    pub fn bootstrap_with(
        tenant_id: &str,
        options: BootstrapOptions,
        versions: Option<Vec<String>>,
        rng: Arc<dyn RandomSource>,
        cancel: &CancelToken,
    ) -> Result<Self> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let version_slice = versions.as_deref();
        let hierarchy = match &options {
            BootstrapOptions::Password { username, password } => {
                KeyHierarchy::from_password(tenant_id, username, password, version_slice)?
            }
            BootstrapOptions::Mnemonic { phrase } => {
                KeyHierarchy::from_mnemonic(tenant_id, phrase, version_slice)?
            }
            BootstrapOptions::RecoveryPhrase { phrase } => {
                KeyHierarchy::from_recovery_phrase(tenant_id, phrase, version_slice)?
            }
            BootstrapOptions::ApiKey { api_key } => {
                KeyHierarchy::from_api_key(tenant_id, api_key)?
            }
        };

        // The stretch is done; a cancellation that raced it discards the
        // result rather than committing a half-observed session.
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        debug!(tenant = %tenant_id, "session bootstrapped");
        Ok(Self {
            tenant_id: tenant_id.to_string(),
            hierarchy: RwLock::new(hierarchy),
            rng,
        })
    }

    /// The tenant this session belongs to.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// The KEK version all new writes use.
    pub fn current_version(&self) -> Result<String> {
        Ok(self.read().current_version()?.to_string())
    }

    /// All version ids this session can decrypt.
    pub fn known_versions(&self) -> Vec<String> {
        self.read().known_versions()
    }

    // -------------------------------------------------------------------------
    // Payloads, names, tokens
    // -------------------------------------------------------------------------

    /// Encrypts a log payload under the current KEK version.
    pub fn encrypt_log(&self, plaintext: &[u8]) -> Result<EncryptedLogRecord> {
        log_cipher::encrypt(&self.read(), self.rng.as_ref(), plaintext)
    }

    /// Decrypts a log record using the version it names.
    pub fn decrypt_log(&self, record: &EncryptedLogRecord) -> Result<Vec<u8>> {
        log_cipher::decrypt(&self.read(), record)
    }

    /// Re-encrypts a record onto a new version during lazy rotation.
    pub fn reencrypt_log(
        &self,
        record: &EncryptedLogRecord,
        old_version: &str,
        new_version: &str,
    ) -> Result<EncryptedLogRecord> {
        log_cipher::reencrypt(&self.read(), self.rng.as_ref(), record, old_version, new_version)
    }

    /// Deterministically encrypts a log name for server-side lookup.
    pub fn encrypt_log_name(&self, name: &str) -> Result<String> {
        name_cipher::encrypt_log_name(&self.read(), name)
    }

    /// Decrypts an encrypted log name.
    pub fn decrypt_log_name(&self, encoded: &str) -> Result<String> {
        name_cipher::decrypt_log_name(&self.read(), encoded)
    }

    /// Deterministic search tokens for a query.
    pub fn search_tokens(&self, query: &str) -> Result<Vec<String>> {
        name_cipher::search_tokens(&self.read(), query)
    }

    /// Index-side token set for a payload about to be written.
    pub fn index_tokens(&self, payload: &[u8]) -> Result<Vec<String>> {
        name_cipher::index_tokens(&self.read(), payload)
    }

    /// Mints an API key under a specific version (default: current).
    pub fn mint_api_key(&self, version: Option<&str>) -> Result<MintedApiKey> {
        let hierarchy = self.read();
        let op_kek = match version {
            Some(v) => hierarchy.op_kek(v)?,
            None => hierarchy.current_op_kek()?,
        };
        let key_id = api_key::generate_key_id(self.rng.as_ref())?;
        Ok(api_key::mint(op_kek, &self.tenant_id, &key_id))
    }

    // -------------------------------------------------------------------------
    // Version management
    // -------------------------------------------------------------------------

    /// Designates an already-known version as current.
    pub fn set_current(&self, version: &str) -> Result<()> {
        self.write().set_current(version)
    }

    /// Derives any missing requested versions from the Master KEK.
    pub fn recover_versions(&self, versions: &[String]) -> Result<()> {
        self.write().recover_versions(versions)
    }

    /// Rotates the tenant KEK.
    ///
    /// Generates a fresh OpKEK under a new id, makes it current, and wraps
    /// it to every recipient not in `revoked_user_ids`. Revoked users keep
    /// whatever old OpKEKs they already had (old entries were never secret
    /// from them) but receive nothing for the new version.
    ///
    /// External collaborators re-encrypt stored payloads lazily via
    /// [`Session::reencrypt_log`].
    pub fn rotate(
        &self,
        reason: &str,
        revoked_user_ids: &[String],
        recipients: &[UserPublicKey],
    ) -> Result<RotationOutcome> {
        let (version, new_kek) = {
            let mut hierarchy = self.write();
            let version = hierarchy.rotate(self.rng.as_ref())?;
            let kek = hierarchy.op_kek(&version)?.clone();
            (version, kek)
        };

        let mut wrapped_keks = Vec::new();
        for recipient in recipients {
            if revoked_user_ids.contains(&recipient.user_id) {
                continue;
            }
            wrapped_keks.push(keywrap::wrap_op_kek(
                &new_kek,
                &version,
                recipient,
                self.rng.as_ref(),
            )?);
        }

        debug!(
            version = %version,
            reason = %reason,
            recipients = wrapped_keks.len(),
            revoked = revoked_user_ids.len(),
            "rotated tenant KEK"
        );
        Ok(RotationOutcome {
            version,
            reason: reason.to_string(),
            wrapped_keks,
        })
    }

    // -------------------------------------------------------------------------
    // Escrow
    // -------------------------------------------------------------------------

    /// Escrows the current OpKEK for server-side storage.
    pub fn escrow_blob(&self) -> Result<EncryptedKekBlob> {
        let version = self.current_version()?;
        self.escrow_blob_for(&version)
    }

    /// Escrows a specific OpKEK version.
    ///
    /// The blob is AES-256-GCM under a key derived from the Master
    /// Secret, so the server stores it without being able to open it.
    pub fn escrow_blob_for(&self, version: &str) -> Result<EncryptedKekBlob> {
        let hierarchy = self.read();
        let escrow_key = hierarchy.escrow_key()?;
        let op_kek = hierarchy.op_kek(version)?;

        let iv = random_iv(self.rng.as_ref())?;
        let data = aes_gcm_encrypt(&escrow_key, &iv, op_kek.as_bytes())?;
        Ok(EncryptedKekBlob {
            iv: b64_encode(&iv),
            data: b64_encode(&data),
            version: version.to_string(),
        })
    }

    /// Opens an escrow blob and registers its OpKEK.
    ///
    /// This is how rotation-generated versions come back after a restart:
    /// they cannot be re-derived, only recovered from escrow.
    pub fn open_escrow_blob(&self, blob: &EncryptedKekBlob) -> Result<()> {
        let kek = {
            let hierarchy = self.read();
            let escrow_key = hierarchy.escrow_key()?;
            let iv_bytes = b64_decode(&blob.iv)?;
            let iv: [u8; IV_SIZE] = iv_bytes
                .as_slice()
                .try_into()
                .map_err(|_| ClientError::InvalidCiphertextFormat("IV must be 12 bytes".into()))?;
            let kek_bytes = aes_gcm_decrypt(&escrow_key, &iv, &b64_decode(&blob.data)?)?;
            if kek_bytes.len() != KEY_SIZE {
                return Err(ClientError::InvalidCiphertextFormat(
                    "escrowed KEK has wrong size".into(),
                ));
            }
            SecretKey::from_slice(&kek_bytes)?
        };
        self.write().insert_version(&blob.version, kek);
        Ok(())
    }

    /// Splits the current OpKEK into `total` Shamir shares with the given
    /// threshold, for offline escrow across custodians.
    pub fn share_op_kek(&self, total: u8, threshold: u8) -> Result<Vec<Share>> {
        let hierarchy = self.read();
        let op_kek = hierarchy.current_op_kek()?;
        shamir::split(op_kek.as_bytes(), total, threshold, self.rng.as_ref())
    }

    /// Reconstructs an OpKEK from shares and registers it under `version`.
    pub fn recover_op_kek_from_shares(&self, version: &str, shares: &[Share]) -> Result<()> {
        let kek_bytes = shamir::reconstruct(shares, KEY_SIZE)?;
        let kek = SecretKey::from_slice(&kek_bytes)?;
        self.write().insert_version(version, kek);
        Ok(())
    }

    // -------------------------------------------------------------------------

    fn read(&self) -> RwLockReadGuard<'_, KeyHierarchy> {
        self.hierarchy.read().expect("key hierarchy lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, KeyHierarchy> {
        self.hierarchy.write().expect("key hierarchy lock poisoned")
    }
}

// =============================================================================
// Tests
// =============================================================================
