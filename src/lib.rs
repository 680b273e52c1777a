//! Client-side cryptographic core for NeuralLog.
//!
//! NeuralLog is a multi-tenant log service whose server is untrusted: log
//! names, payloads, and search index tokens are all encrypted on the
//! client under a tenant-local key hierarchy. This crate implements that
//! hierarchy and everything keyed from it:
//!
//! - deterministic derivation from a recovery phrase, BIP-39 mnemonic,
//!   password, or API key ([`hierarchy`], [`session`])
//! - authenticated payload encryption with embedded KEK versioning
//!   ([`log_cipher`])
//! - deterministic, lookup-safe log-name encryption and search tokens
//!   ([`name_cipher`])
//! - API key minting and zero-knowledge possession proofs ([`api_key`])
//! - KEK rotation with per-user ECDH fan-out ([`keywrap`]) and escrow,
//!   including k-of-n Shamir sharing ([`shamir`])
//!
//! The storage and auth services only ever see the opaque records defined
//! in [`types`].

pub mod api_key;
pub mod auth_client;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod keywrap;
pub mod log_cipher;
pub mod mnemonic;
pub mod name_cipher;
pub mod primitives;
pub mod registry;
pub mod session;
pub mod shamir;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{ClientError, Result};
pub use session::{BootstrapOptions, CancelToken, Session};
