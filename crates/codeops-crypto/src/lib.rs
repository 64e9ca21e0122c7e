//! CodeOps Vault crypto core
//!
//! Provides the three cryptographic building blocks the vault is built on:
//! - HKDF key derivation (RFC 5869, HMAC-SHA-256)
//! - Shamir secret sharing over GF(2^8) for seal/unseal
//! - The versioned envelope encryption engine (AES-256-GCM, wrapped DEKs)
//!
//! Everything here is synchronous and allocation-light; the async service
//! layer lives in `codeops-core`.

pub mod engine;
pub mod error;
pub mod kdf;
pub mod shamir;

pub use engine::{EncryptionEngine, DEFAULT_KEY_ID, ENVELOPE_VERSION};
pub use error::{CryptoError, Result};
