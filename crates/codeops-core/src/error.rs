//! Error taxonomy for the vault core
//!
//! Business errors carry caller-safe messages and cross the API boundary
//! verbatim. `Internal` wraps a source that is logged server-side and
//! rendered as a generic message.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    /// Named entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Business-rule violation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Authorization layer denied the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Cryptographic tag mismatch, corrupt envelope, or a Shamir
    /// reconstruction that does not match the configured master key.
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    /// The seal gate refused the operation.
    #[error("vault is sealed")]
    Sealed,

    /// Reserved functionality.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Uncategorised failure. Details are logged, not surfaced.
    #[error("internal error")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl VaultError {
    pub fn internal<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(Box::new(source))
    }

    /// Stable machine-readable kind, used by the HTTP layer for status
    /// mapping and by audit details.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not-found",
            Self::InvalidInput(_) => "invalid-input",
            Self::Forbidden(_) => "forbidden",
            Self::IntegrityFailure(_) => "integrity-failure",
            Self::Sealed => "sealed",
            Self::NotImplemented(_) => "not-implemented",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<codeops_crypto::CryptoError> for VaultError {
    fn from(err: codeops_crypto::CryptoError) -> Self {
        use codeops_crypto::CryptoError;
        match err {
            CryptoError::InvalidInput(msg) => Self::InvalidInput(msg),
            CryptoError::IntegrityFailure(msg) => Self::IntegrityFailure(msg),
            CryptoError::VersionMismatch(v) => {
                Self::InvalidInput(format!("unsupported envelope version {v}"))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(VaultError::NotFound("x".into()).kind(), "not-found");
        assert_eq!(VaultError::Sealed.kind(), "sealed");
        assert_eq!(
            VaultError::internal(std::io::Error::other("boom")).kind(),
            "internal"
        );
    }

    #[test]
    fn internal_display_is_generic() {
        let err = VaultError::internal(std::io::Error::other("connection string with password"));
        assert_eq!(err.to_string(), "internal error");
    }
}
