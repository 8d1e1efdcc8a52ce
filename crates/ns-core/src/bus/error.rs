//! Error types for the event bus abstraction.

use thiserror::Error;

/// Errors that can occur in event bus operations.
///
/// Transient errors ([`Connection`](Self::Connection),
/// [`Timeout`](Self::Timeout)) can be retried; the broker transport retries
/// them internally with capped exponential backoff and degrades to the
/// in-process transport in the meantime. Permanent errors
/// ([`Serialization`](Self::Serialization), [`Closed`](Self::Closed))
/// indicate a bug or shutdown and should not be retried.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to reach the broker (DNS, TCP, or protocol-level failure).
    #[error("connection error: {0}")]
    Connection(String),

    /// The publish could not be enqueued within `publish_timeout`.
    #[error("publish timed out: {0}")]
    Timeout(String),

    /// Payload could not be serialized or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The bus has been closed; no further publishes are accepted.
    #[error("bus closed")]
    Closed,

    /// Catch-all for failures that fit no other category.
    #[error("bus error: {0}")]
    Unknown(String),
}

impl BusError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    /// Returns `true` if the operation may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }

    /// Error kind as a static string for logging and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::Serialization(_) => "serialization",
            Self::Closed => "closed",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for event bus operations.
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BusError::connection("refused").is_transient());
        assert!(BusError::timeout("100ms").is_transient());
        assert!(!BusError::serialization("bad json").is_transient());
        assert!(!BusError::Closed.is_transient());
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(BusError::connection("x").kind(), "connection");
        assert_eq!(BusError::Closed.kind(), "closed");
    }
}
