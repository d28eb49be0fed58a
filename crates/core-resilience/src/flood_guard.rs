//! Rate-limit guard: suspend on "slow down" signals, escalate when they persist
//!
//! Remote endpoints throttle callers by failing a call with a mandatory wait
//! ("flood wait"). The guard wraps exactly one remote invocation: when the call
//! fails with such a signal it suspends the calling unit for the mandated wait plus
//! a fixed margin and tells the caller a retry is permitted. It never loops on its
//! own; how many retries a call site gets is the caller's [`RetryBudget`].
//!
//! [`RateLimitGuard::run`] is the loop most call sites want: it checks the task's
//! cancel flag before every attempt, spends the budget, and on exhaustion either
//! yields a `FloodStop` to the caller or escalates it to the whole task by raising
//! the task's cancel flag, which sibling units observe cooperatively.
//!
//! ```text
//!   attempt ──► Ok ─────────────────────────────► Completed
//!      │
//!      ├──► Err(other) ─────────────────────────► Failed(e)
//!      │
//!      └──► Err(wait w)
//!              │ budget left?
//!              ├── yes ──► sleep(w + margin) ──► attempt again
//!              └── no ───► FloodStop { w } ──(EscalateTask)──► cancel task
//! ```
//!
//! Sleeping is per unit: a wait on one unit never blocks unrelated calls.

use crate::cancellation::{CancelReason, TaskHandle};
use crate::error::GuardError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default margin added to every mandated wait
pub const DEFAULT_MARGIN: Duration = Duration::from_secs(2);

/// Errors that may carry a mandatory "slow down" interval
pub trait RateLimitSignal {
    /// The wait demanded by the remote, or `None` if this is not a rate-limit signal
    fn rate_limit_wait(&self) -> Option<Duration>;
}

/// Result of a single guarded invocation
#[derive(Debug)]
pub enum GuardedCall<T, E> {
    /// The call produced a value
    Completed(T),
    /// The call was rate limited; the guard already waited and a retry may follow
    RetryPermitted { waited: Duration },
    /// The call was rate limited and the guard did not wait
    RateLimited { wait: Duration },
    /// The call failed for another reason
    Failed(E),
}

/// What happens when a call site runs out of rate-limit retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    /// Raise the task's cancel flag with a FloodStop reason
    EscalateTask,
    /// Report FloodStop to the caller only; the task carries on
    Yield,
}

/// Per call site retry policy for rate-limit signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub retries: u32,
    pub on_exhausted: Exhaustion,
}

impl RetryBudget {
    /// Budget whose exhaustion stops the whole task (chunk fetches, single uploads)
    pub fn escalating(retries: u32) -> Self {
        Self {
            retries,
            on_exhausted: Exhaustion::EscalateTask,
        }
    }

    /// Budget whose exhaustion only abandons the current strategy (bulk copy, bulk upload)
    pub fn yielding(retries: u32) -> Self {
        Self {
            retries,
            on_exhausted: Exhaustion::Yield,
        }
    }
}

/// Wraps remote calls and honours their rate-limit signals
#[derive(Debug, Clone, Copy)]
pub struct RateLimitGuard {
    margin: Duration,
}

impl Default for RateLimitGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MARGIN)
    }
}

impl RateLimitGuard {
    pub fn new(margin: Duration) -> Self {
        Self { margin }
    }

    pub fn margin(&self) -> Duration {
        self.margin
    }

    /// Invoke one remote call; on a rate-limit signal, sleep the mandated wait plus
    /// margin and report that a retry is permitted.
    pub async fn call_with_guard<T, E, Fut>(&self, call: Fut) -> GuardedCall<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitSignal,
    {
        match Self::observe(call).await {
            GuardedCall::RateLimited { wait } => {
                debug!(
                    wait_secs = wait.as_secs(),
                    margin_ms = self.margin.as_millis() as u64,
                    "Rate limited, suspending unit"
                );
                tokio::time::sleep(wait + self.margin).await;
                GuardedCall::RetryPermitted { waited: wait }
            }
            other => other,
        }
    }

    /// Invoke one remote call and classify its outcome without waiting
    pub async fn observe<T, E, Fut>(call: Fut) -> GuardedCall<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitSignal,
    {
        match call.await {
            Ok(value) => GuardedCall::Completed(value),
            Err(e) => match e.rate_limit_wait() {
                Some(wait) => GuardedCall::RateLimited { wait },
                None => GuardedCall::Failed(e),
            },
        }
    }

    /// Run `op` under `budget`, checking the task's cancel flag before each attempt.
    pub async fn run<T, E, F, Fut>(
        &self,
        handle: &TaskHandle,
        budget: RetryBudget,
        mut op: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitSignal + std::error::Error + 'static,
    {
        let mut attempts = 0u32;
        let mut retries_used = 0u32;

        loop {
            if handle.is_cancelled() {
                let reason = handle.cancel_reason().unwrap_or(CancelReason::User);
                return Err(GuardError::Cancelled(reason));
            }

            attempts += 1;
            let outcome = if retries_used < budget.retries {
                self.call_with_guard(op()).await
            } else {
                Self::observe(op()).await
            };

            match outcome {
                GuardedCall::Completed(value) => return Ok(value),
                GuardedCall::Failed(e) => return Err(GuardError::Failed(e)),
                GuardedCall::RetryPermitted { .. } => {
                    retries_used += 1;
                }
                GuardedCall::RateLimited { wait } => {
                    warn!(
                        task = %handle.id(),
                        attempts,
                        wait_secs = wait.as_secs(),
                        "Rate limit retry budget exhausted"
                    );
                    if budget.on_exhausted == Exhaustion::EscalateTask {
                        handle.flood_stop(wait);
                    }
                    return Err(GuardError::FloodStop { wait, attempts });
                }
            }
        }
    }
}
