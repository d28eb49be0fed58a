/*!
 * Ferry - concurrent chunked relay of media and batches
 *
 * Moves large objects and ordered batches out of a rate-limited remote service
 * and re-delivers them elsewhere:
 * - Parallel ranged downloads into pre-sized temporary files
 * - Two-phase batch delivery: server-side direct copy, else download,
 *   reassemble in order and upload
 * - Duplicate detection by content identity
 * - Rate-limit waits with bounded retries, escalating to a task-wide flood stop
 * - Cooperative cancellation through a task registry
 * - Temporary files removed on every exit path
 */

pub mod cli_progress;
pub mod cli_style;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod relay;
pub mod remote;

// Re-export commonly used types
pub use config::{DedupScope, TransferConfig};
pub use core::{
    BatchSummary, ChunkedTransferEngine, CollectionTransferOrchestrator, DedupSet, ItemStatus,
    ObjectSummary, ProgressEvent, ProgressPublisher, RangeSummary, StopReason,
};
pub use error::{Result, TransferError};
pub use relay::{BatchReport, MultiBatchSummary, Relay};
pub use remote::{LocalStore, RemoteError, RemoteSource, SharedRemote};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
