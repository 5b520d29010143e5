//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in envelope encryption or secret derivation.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid password (empty)")]
    EmptyPassword,

    #[error("invalid secret: {0}")]
    InvalidSecret(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// Every decode-side failure — malformed hex, short buffers, tag
    /// mismatch, frame-length mismatch — collapses into this one class so
    /// callers cannot use the failure mode as a padding oracle.
    #[error("transport decode failed: {0}")]
    Decode(String),
}
