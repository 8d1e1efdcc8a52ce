//! Error types for the repository layer.

use thiserror::Error;

/// Errors that can occur during persistence operations.
#[derive(Error, Debug)]
pub enum RepoError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be mapped back to a domain record.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

impl RepoError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptRow(msg.into())
    }

    /// Returns `true` if a write may succeed on retry. Used by the engines'
    /// persist-then-publish path, which retries exactly once.
    pub fn is_transient(&self) -> bool {
        match self {
            RepoError::Database(e) => !matches!(
                e,
                sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::Decode(_)
                    | sqlx::Error::TypeNotFound { .. }
            ),
            _ => false,
        }
    }
}

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;
