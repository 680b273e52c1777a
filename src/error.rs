//! Error types for the client crypto core.
//!
//! Every public operation returns either a value or exactly one of these
//! variants. Messages name the failing operation and the primitive's
//! reason; they never carry key material, plaintext, IVs, or tokens.

use thiserror::Error;

/// Primary error type for client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// BIP-39 mnemonic failed validation (word list or checksum).
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Recovery phrase was rejected before derivation.
    #[error("Invalid recovery phrase: {0}")]
    InvalidRecoveryPhrase(String),

    /// PBKDF2 or Argon2 stretching failed.
    #[error("Password derivation failed: {0}")]
    PbkdfFailed(String),

    /// HKDF expansion failed (e.g. output length beyond 255 x hash size).
    #[error("HKDF derivation failed: {0}")]
    HkdfFailed(String),

    /// No operational KEK is active; bootstrap or recovery is required.
    #[error("No active KEK in the key hierarchy")]
    NoActiveKek,

    /// Ciphertext references a KEK version this session has not recovered.
    #[error("Unknown KEK version: {0}")]
    UnknownKekVersion(String),

    /// The version map holds no KEKs at all.
    #[error("KEK version map is empty")]
    KekMapEmpty,

    /// AEAD encryption failed.
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// AEAD tag verification failed: wrong key or corrupted ciphertext.
    #[error("Decryption failed (wrong key or corrupted data)")]
    DecryptionFailed,

    /// Versioned-blob header or encoding is malformed.
    #[error("Invalid ciphertext format: {0}")]
    InvalidCiphertextFormat(String),

    /// Fewer shares were supplied than the reconstruction threshold.
    #[error("Insufficient shares: need {needed}, got {got}")]
    InsufficientShares { needed: usize, got: usize },

    /// Two shares carry the same x-coordinate.
    #[error("Duplicate share x-coordinate: {0}")]
    DuplicateShareX(u8),

    /// A share's payload length does not match the secret length.
    #[error("Share length does not match the secret length")]
    InvalidShareLength,

    /// The platform CSPRNG is unavailable. Fatal.
    #[error("Random source failed: {0}")]
    RandomSourceFailed(String),

    /// Bootstrap was cancelled at the KDF boundary; no state was changed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Collaborator request failed (registry or auth service).
    #[error("Network error: {0}")]
    Network(String),
}

/// Convenience type alias for Results using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;
