//! Error types for the crypto core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    /// Input failed validation before any cryptography ran.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Authentication tag mismatch, truncated envelope, or share
    /// reconstruction that does not yield the expected secret.
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    /// Envelope declared a version this implementation does not speak.
    #[error("unsupported envelope version: {0}")]
    VersionMismatch(u8),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
