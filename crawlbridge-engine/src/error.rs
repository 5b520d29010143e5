//! Engine error types.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while orchestrating a crawl.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    /// Per-file: logged and the walk continues. Top-level directory:
    /// aborts the whole run.
    #[error("file access error at {path}: {reason}")]
    FileAccess { path: String, reason: String },

    #[error("directory service error: {0}")]
    Directory(String),

    #[error(transparent)]
    Client(#[from] crawlbridge_client::ClientError),

    #[error(transparent)]
    Cache(#[from] crawlbridge_cache::CacheError),

    #[error(transparent)]
    Crypto(#[from] crawlbridge_crypto::CryptoError),

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn file_access(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        EngineError::FileAccess {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures that must end the process, not just the run.
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::Cancelled => true,
            EngineError::Client(e) => e.is_fatal(),
            _ => false,
        }
    }
}
