//! Client error types.
//!
//! The taxonomy matters for control flow: `Auth` is fatal and never
//! retried, `Connectivity` is retried indefinitely inside the client,
//! everything else propagates to the caller immediately.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur talking to the platform.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unauthorized: incorrect session id ({0})")]
    Auth(String),

    #[error("server not reachable: {0}")]
    Connectivity(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] crawlbridge_crypto::CryptoError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("file access error: {0}")]
    File(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl ClientError {
    /// True for failures that must never be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Auth(_) | ClientError::Cancelled)
    }
}
