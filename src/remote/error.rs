//! Error types for remote source operations

use ferry_core_resilience::RateLimitSignal;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors a remote source may raise from any call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote demands a pause before this call may be repeated
    #[error("Rate limited: retry after {wait_secs}s")]
    RateLimited { wait_secs: u64 },

    /// Operation not supported for this object or batch
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// Object or batch does not exist (deleted, never existed)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote returned something unusable
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Content may not leave its origin (protected source, foreign boundary)
    #[error("Cross-boundary restriction: {0}")]
    CrossBoundary(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    pub fn rate_limited(wait_secs: u64) -> Self {
        RemoteError::RateLimited { wait_secs }
    }

    /// Check if this is a "slow down" signal
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RemoteError::RateLimited { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

impl RateLimitSignal for RemoteError {
    fn rate_limit_wait(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { wait_secs } => Some(Duration::from_secs(*wait_secs)),
            _ => None,
        }
    }
}

impl From<io::Error> for RemoteError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => RemoteError::NotFound(err.to_string()),
            _ => RemoteError::Io(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_signal() {
        let err = RemoteError::rate_limited(17);
        assert!(err.is_rate_limited());
        assert_eq!(err.rate_limit_wait(), Some(Duration::from_secs(17)));
        assert_eq!(err.to_string(), "Rate limited: retry after 17s");

        assert_eq!(RemoteError::Network("reset".into()).rate_limit_wait(), None);
    }

    #[test]
    fn test_io_conversion() {
        let missing: RemoteError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(missing.is_not_found());

        let other: RemoteError = io::Error::other("disk").into();
        assert!(matches!(other, RemoteError::Io(_)));
    }
}
