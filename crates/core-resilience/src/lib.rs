//! Ferry Core Resilience: cooperative control primitives for rate-limited transfers
//!
//! # Overview
//!
//! This crate holds the pieces every transfer unit consults around a remote call:
//!
//! - **Rate-Limit Guard**: Suspends a unit for the wait a remote demands, then lets the
//!   caller decide whether to retry, give up, or stop the whole task (FloodStop)
//! - **Cancellation Registry**: Per-task cancel flags and status sinks, polled by workers
//! - **Task State**: The transfer lifecycle and its legal transitions
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Storage (temp files, download directories)
//! - The remote service and its wire format
//! - Application-specific concerns (batches, captions, upload kinds)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      Relay / Engine / Orchestrator      │
//! └─────────────┬───────────────────────────┘
//!               │ register(task id)
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Cancellation Registry             │  ← One record per task
//! │  (cancel flag, reason, status sink)     │
//! └─────────────┬───────────────────────────┘
//!               │ TaskHandle (cloned into every unit)
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Rate-Limit Guard                  │  ← Checks cancel, honours waits
//! │  (retry budget per call site)           │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         Remote endpoint
//!               │
//!     wait persists past budget?
//!               │
//!               ▼
//!   FloodStop ──► task cancel flag raised ──► siblings stop scheduling
//! ```
//!
//! # Usage Example
//!
//! ```
//! use ferry_core_resilience::{
//!     CancellationRegistry, GuardError, RateLimitGuard, RateLimitSignal, RetryBudget,
//! };
//! use std::time::Duration;
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("slow down")]
//! struct SlowDown;
//!
//! impl RateLimitSignal for SlowDown {
//!     fn rate_limit_wait(&self) -> Option<Duration> {
//!         None
//!     }
//! }
//!
//! # async fn example() -> Result<(), GuardError<SlowDown>> {
//! let registry = CancellationRegistry::new();
//! let registration = registry.register("user-7").expect("fresh id");
//! let guard = RateLimitGuard::default();
//!
//! let value = guard
//!     .run(registration.handle(), RetryBudget::escalating(1), || async {
//!         Ok::<_, SlowDown>(42)
//!     })
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

pub mod cancellation;
pub mod error;
pub mod flood_guard;
pub mod task_state;

// Re-export main types for convenience
pub use cancellation::{CancelReason, CancellationRegistry, Registration, TaskHandle, TaskId};
pub use error::{GuardError, ResilienceError};
pub use flood_guard::{
    Exhaustion, GuardedCall, RateLimitGuard, RateLimitSignal, RetryBudget, DEFAULT_MARGIN,
};
pub use task_state::TaskState;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use ferry_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::cancellation::{CancelReason, CancellationRegistry, TaskHandle, TaskId};
    pub use super::error::{GuardError, ResilienceError};
    pub use super::flood_guard::{RateLimitGuard, RateLimitSignal, RetryBudget};
    pub use super::task_state::TaskState;
}
