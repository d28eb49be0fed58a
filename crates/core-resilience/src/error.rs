//! Error types for the resilience primitives

use crate::cancellation::CancelReason;
use crate::task_state::TaskState;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the registry and task bookkeeping
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// A task with this identity is already registered
    #[error("Task already active: {0}")]
    AlreadyActive(String),

    /// Illegal lifecycle transition
    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTransition { from: TaskState, to: TaskState },
}

/// Outcome of a guarded remote call that did not produce a value
#[derive(Error, Debug)]
pub enum GuardError<E>
where
    E: std::error::Error + 'static,
{
    /// The enclosing task was cancelled before the call was issued
    #[error("Task cancelled ({0})")]
    Cancelled(CancelReason),

    /// Rate limiting persisted past the caller's retry budget
    #[error("Rate limit not mitigated after {attempts} attempt(s), remote asked for {}s", .wait.as_secs())]
    FloodStop { wait: Duration, attempts: u32 },

    /// The remote call failed for a reason other than rate limiting
    #[error(transparent)]
    Failed(E),
}

impl<E> GuardError<E>
where
    E: std::error::Error + 'static,
{
    /// True for outcomes that must terminate the whole task
    pub fn is_fatal(&self) -> bool {
        matches!(self, GuardError::Cancelled(_) | GuardError::FloodStop { .. })
    }
}
