/*!
 * Error types for ferry
 */

use crate::core::batch::BatchSummary;
use crate::remote::RemoteError;
use ferry_core_resilience::{CancelReason, GuardError, ResilienceError};
use std::fmt;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Error, Debug)]
pub enum TransferError {
    /// A remote call failed for a reason other than rate limiting
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Rate limiting could not be mitigated within the retry budget
    #[error("Flood stop: remote demanded a {wait_secs}s wait after retries were spent")]
    FloodStop { wait_secs: u64 },

    /// The task was cancelled by its owner
    #[error("Transfer cancelled")]
    Cancelled,

    /// A task with the same identity is still running
    #[error("A task is already active for {0}")]
    TaskAlreadyActive(String),

    /// Local I/O error (temp file creation, writes)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Assembled file does not have the advertised size
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Object exceeds the configured size ceiling
    #[error("Object of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    /// Chunk size too small for the object
    #[error("Object would need {chunks} chunks, more than the {limit} allowed")]
    TooManyChunks { chunks: u64, limit: u64 },

    /// Every item of a batch failed or was skipped; the summary says why
    #[error("No item of batch {} was delivered", .summary.batch)]
    NothingDelivered { summary: Box<BatchSummary> },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A worker unit panicked or was aborted
    #[error("Task join error: {0}")]
    Join(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl TransferError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            TransferError::FloodStop { .. } | TransferError::Cancelled => EXIT_CANCELLED,
            TransferError::Config(_) | TransferError::TaskAlreadyActive(_) => EXIT_FATAL,
            _ => EXIT_PARTIAL,
        }
    }

    /// Check if this error must terminate the task and never be retried
    pub fn is_fatal(&self) -> bool {
        match self {
            TransferError::FloodStop { .. } => true,
            TransferError::Cancelled => true,
            TransferError::TaskAlreadyActive(_) => true,
            TransferError::Config(_) => true,

            TransferError::Remote(_) => false,
            TransferError::Io(_) => false,
            TransferError::SizeMismatch { .. } => false,
            TransferError::TooLarge { .. } => false,
            TransferError::TooManyChunks { .. } => false,
            TransferError::NothingDelivered { .. } => false,
            TransferError::Join(_) => false,
            TransferError::Other(_) => false,
        }
    }

    /// Check if this error is a rate-limit signal that a guard may wait out
    pub fn is_transient(&self) -> bool {
        matches!(self, TransferError::Remote(e) if e.is_rate_limited())
    }

    /// Check if this error ended the task through cancellation (user or flood stop)
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            TransferError::Cancelled | TransferError::FloodStop { .. }
        )
    }

    /// Batch summary carried by the error, if any
    pub fn batch_summary(&self) -> Option<&BatchSummary> {
        match self {
            TransferError::NothingDelivered { summary } => Some(&**summary),
            _ => None,
        }
    }

    /// Get error category for logging and summaries
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransferError::Remote(e) if e.is_rate_limited() => ErrorCategory::Transient,
            e if e.is_fatal() => ErrorCategory::Fatal,
            _ => ErrorCategory::RecoverableLocal,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate-limit signals, handled by the guard with a bounded retry
    Transient,
    /// One chunk or item failed; siblings carry on
    RecoverableLocal,
    /// Flood stop, cancellation or unusable setup; the task ends
    Fatal,
    /// Expected branch that switches strategy (direct copy refused)
    FallbackTriggering,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::RecoverableLocal => write!(f, "recoverable"),
            ErrorCategory::Fatal => write!(f, "fatal"),
            ErrorCategory::FallbackTriggering => write!(f, "fallback"),
        }
    }
}

impl From<CancelReason> for TransferError {
    fn from(reason: CancelReason) -> Self {
        match reason {
            CancelReason::User => TransferError::Cancelled,
            CancelReason::FloodStop { wait_secs } => TransferError::FloodStop { wait_secs },
        }
    }
}

impl From<GuardError<RemoteError>> for TransferError {
    fn from(err: GuardError<RemoteError>) -> Self {
        match err {
            GuardError::Cancelled(reason) => reason.into(),
            GuardError::FloodStop { wait, .. } => TransferError::FloodStop {
                wait_secs: wait.as_secs(),
            },
            GuardError::Failed(e) => TransferError::Remote(e),
        }
    }
}

impl From<ResilienceError> for TransferError {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::AlreadyActive(id) => TransferError::TaskAlreadyActive(id),
            other => TransferError::Other(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for TransferError {
    fn from(err: tokio::task::JoinError) -> Self {
        TransferError::Join(err.to_string())
    }
}

impl From<toml::de::Error> for TransferError {
    fn from(err: toml::de::Error) -> Self {
        TransferError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        TransferError::Config(format!("JSON parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::batch::DeliveryPath;
    use std::time::Duration;

    #[test]
    fn test_fatal_errors() {
        assert!(TransferError::FloodStop { wait_secs: 30 }.is_fatal());
        assert!(TransferError::Cancelled.is_fatal());
        assert!(TransferError::Config("bad".to_string()).is_fatal());
        assert!(TransferError::TaskAlreadyActive("u1".to_string()).is_fatal());
    }

    #[test]
    fn test_non_fatal_errors() {
        assert!(!TransferError::Io(io::Error::other("test")).is_fatal());
        assert!(!TransferError::Remote(RemoteError::Network("reset".into())).is_fatal());
        assert!(!TransferError::TooLarge { size: 10, limit: 5 }.is_fatal());
        assert!(!TransferError::Other("test".to_string()).is_fatal());
    }

    #[test]
    fn test_categories_follow_taxonomy() {
        assert_eq!(
            TransferError::Remote(RemoteError::rate_limited(5)).category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            TransferError::Remote(RemoteError::Malformed("x".into())).category(),
            ErrorCategory::RecoverableLocal
        );
        assert_eq!(
            TransferError::FloodStop { wait_secs: 5 }.category(),
            ErrorCategory::Fatal
        );
        assert_eq!(ErrorCategory::RecoverableLocal.to_string(), "recoverable");
        assert_eq!(ErrorCategory::FallbackTriggering.to_string(), "fallback");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(TransferError::Cancelled.exit_code(), EXIT_CANCELLED);
        assert_eq!(
            TransferError::FloodStop { wait_secs: 1 }.exit_code(),
            EXIT_CANCELLED
        );
        assert_eq!(TransferError::Config("x".into()).exit_code(), EXIT_FATAL);
    }

    #[test]
    fn test_nothing_delivered_carries_summary() {
        let err = TransferError::NothingDelivered {
            summary: Box::new(BatchSummary {
                batch: "album".into(),
                delivery: DeliveryPath::Undelivered,
                items: Vec::new(),
                elapsed_ms: 0,
            }),
        };
        assert_eq!(err.to_string(), "No item of batch album was delivered");
        assert_eq!(err.exit_code(), EXIT_PARTIAL);
        assert!(!err.is_fatal());
        assert_eq!(err.batch_summary().map(|s| s.delivery), Some(DeliveryPath::Undelivered));
        assert!(TransferError::Cancelled.batch_summary().is_none());
    }

    #[test]
    fn test_guard_error_conversion() {
        let flood: TransferError = GuardError::<RemoteError>::FloodStop {
            wait: Duration::from_secs(12),
            attempts: 2,
        }
        .into();
        assert!(matches!(flood, TransferError::FloodStop { wait_secs: 12 }));

        let sibling_flood: TransferError =
            GuardError::<RemoteError>::Cancelled(CancelReason::FloodStop { wait_secs: 3 }).into();
        assert!(matches!(sibling_flood, TransferError::FloodStop { wait_secs: 3 }));

        let user: TransferError = GuardError::<RemoteError>::Cancelled(CancelReason::User).into();
        assert!(matches!(user, TransferError::Cancelled));

        let failed: TransferError =
            GuardError::Failed(RemoteError::NotFound("gone".into())).into();
        assert!(matches!(failed, TransferError::Remote(RemoteError::NotFound(_))));
    }

    #[test]
    fn test_error_display() {
        let err = TransferError::SizeMismatch {
            expected: 10,
            actual: 7,
        };
        assert_eq!(err.to_string(), "Size mismatch: expected 10 bytes, got 7");
    }
}
