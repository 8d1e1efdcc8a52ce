//! Error types for the cache abstraction.

use thiserror::Error;

/// Errors that can occur in cache operations.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("cache error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
