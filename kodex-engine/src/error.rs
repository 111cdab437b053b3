//! Engine error types.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in engine operations.
///
/// Messages never carry key bytes; they name objects, users and
/// collaborators only.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("key container is incomplete: missing {0}")]
    IncompleteContainer(String),

    #[error("remote fetch failed: {0}")]
    Fetch(String),

    #[error("remote call timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    #[error("local storage error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("security check failed: {0}")]
    Security(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] kodex_crypto::CryptoError),

    #[error("partial batch: {found} of {requested} keys retrieved")]
    PartialBatch { requested: usize, found: usize },

    #[error("key container is sealed")]
    SealedContainer,

    #[error("no container could be loaded")]
    NoContainer,

    #[error("share operation failed: {0}")]
    Share(String),

    #[error("index construction failed: {0}")]
    Index(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// True for transient remote failures a caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Fetch(_) | EngineError::Timeout { .. })
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}
