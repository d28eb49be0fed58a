//! Cooperative cancellation for long-running transfer tasks
//!
//! Every task gets a record holding a cancel flag, the reason the flag was raised
//! and a status sink. Workers receive a [`TaskHandle`] and poll
//! [`TaskHandle::is_cancelled`] before each remote call and before committing
//! completed work. Nothing is interrupted forcibly: in-flight work finishes or fails
//! on its own, no new work starts once the flag is observed.
//!
//! The [`CancellationRegistry`] maps task identities to their records so an outside
//! caller (a CLI signal handler, a chat command) can cancel by identity. Records
//! leave the registry exactly once, when the owning [`Registration`] is finished or
//! dropped.
//!
//! # Example
//!
//! ```
//! use ferry_core_resilience::{CancellationRegistry, TaskState};
//!
//! let registry = CancellationRegistry::new();
//! let registration = registry.register("user-42").unwrap();
//! let handle = registration.handle().clone();
//!
//! assert!(!handle.is_cancelled());
//! registry.request_cancel(&"user-42".into());
//! assert!(handle.is_cancelled());
//!
//! registration.finish(TaskState::Cancelled);
//! assert!(registry.is_empty());
//! ```

use crate::error::ResilienceError;
use crate::task_state::TaskState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Identity of a task (one per requester in the relay)
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        TaskId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        TaskId(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        TaskId(value)
    }
}

/// Why a task's cancel flag was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Explicit request from the task's owner
    User,
    /// Rate limiting could not be mitigated within the retry budget
    FloodStop { wait_secs: u64 },
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::User => write!(f, "cancelled by user"),
            CancelReason::FloodStop { wait_secs } => {
                write!(f, "flood stop, remote demanded a {}s wait", wait_secs)
            }
        }
    }
}

struct TaskRecord {
    id: TaskId,
    cancelled: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    status: watch::Sender<TaskState>,
}

/// Shared handle to a task record, cheap to clone into worker units
#[derive(Clone)]
pub struct TaskHandle {
    record: Arc<TaskRecord>,
}

impl TaskHandle {
    /// Create a handle that is not tracked by any registry
    pub fn detached(id: impl Into<TaskId>) -> Self {
        let (status, _) = watch::channel(TaskState::Pending);
        Self {
            record: Arc::new(TaskRecord {
                id: id.into(),
                cancelled: AtomicBool::new(false),
                reason: Mutex::new(None),
                status,
            }),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.record.id
    }

    /// Poll the cancel flag
    pub fn is_cancelled(&self) -> bool {
        self.record.cancelled.load(Ordering::Acquire)
    }

    /// Raise the cancel flag. The first reason recorded wins.
    ///
    /// Returns `true` if this call raised the flag.
    pub fn request_cancel(&self, reason: CancelReason) -> bool {
        let mut slot = self
            .record
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if slot.is_some() {
            return false;
        }

        *slot = Some(reason);
        self.record.cancelled.store(true, Ordering::Release);
        debug!(task = %self.record.id, %reason, "Cancel flag raised");
        true
    }

    /// Escalate unmitigated rate limiting to a task-wide stop
    pub fn flood_stop(&self, wait: Duration) -> bool {
        let raised = self.request_cancel(CancelReason::FloodStop {
            wait_secs: wait.as_secs(),
        });
        if raised {
            warn!(
                task = %self.record.id,
                wait_secs = wait.as_secs(),
                "Rate limiting persisted, stopping task"
            );
        }
        raised
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        *self
            .record
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state as seen by the status sink
    pub fn state(&self) -> TaskState {
        *self.record.status.borrow()
    }

    /// Move the task to `next`, publishing it to subscribers.
    ///
    /// Re-entering the current state is a no-op.
    pub fn transition(&self, next: TaskState) -> Result<(), ResilienceError> {
        let mut result = Ok(());
        self.record.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                result = Err(ResilienceError::InvalidTransition {
                    from: *current,
                    to: next,
                });
                false
            }
        });
        result
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.record.status.subscribe()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.record.id)
            .field("cancelled", &self.is_cancelled())
            .field("state", &self.state())
            .finish()
    }
}

/// Process-wide map from task identity to task record
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    tasks: Arc<RwLock<HashMap<TaskId, TaskHandle>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a record for a new task.
    ///
    /// Fails if a task with the same identity is still active.
    pub fn register(&self, id: impl Into<TaskId>) -> Result<Registration, ResilienceError> {
        let id = id.into();
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);

        if tasks.contains_key(&id) {
            return Err(ResilienceError::AlreadyActive(id.to_string()));
        }

        let handle = TaskHandle::detached(id.clone());
        tasks.insert(id, handle.clone());

        Ok(Registration {
            registry: self.clone(),
            handle,
            released: false,
        })
    }

    /// Request cancellation of a task on behalf of its owner
    pub fn request_cancel(&self, id: &TaskId) -> bool {
        self.cancel_with(id, CancelReason::User)
    }

    /// Raise the cancel flag of a task with a specific reason
    pub fn cancel_with(&self, id: &TaskId, reason: CancelReason) -> bool {
        match self.handle(id) {
            Some(handle) => handle.request_cancel(reason),
            None => false,
        }
    }

    pub fn is_cancelled(&self, id: &TaskId) -> bool {
        self.handle(id).is_some_and(|h| h.is_cancelled())
    }

    pub fn handle(&self, id: &TaskId) -> Option<TaskHandle> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Identities of every registered task
    pub fn active(&self) -> Vec<TaskId> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: &TaskId) -> Option<TaskHandle> {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }
}

/// Ownership of a registered task record.
///
/// The record is removed from the registry when the registration is finished or
/// dropped, whichever comes first.
pub struct Registration {
    registry: CancellationRegistry,
    handle: TaskHandle,
    released: bool,
}

impl Registration {
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    /// Publish the terminal state and release the record.
    ///
    /// Returns the state the task actually ended in: a task already terminal keeps
    /// its state.
    pub fn finish(mut self, state: TaskState) -> TaskState {
        debug_assert!(state.is_terminal());
        if let Err(e) = self.handle.transition(state) {
            debug!(task = %self.handle.id(), error = %e, "Terminal transition ignored");
        }
        self.release();
        self.handle.state()
    }

    fn release(&mut self) {
        if !self.released {
            self.registry.remove(self.handle.id());
            self.released = true;
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.released && !self.handle.state().is_terminal() {
            // Owner bailed out without a verdict
            let state = if self.handle.is_cancelled() {
                TaskState::Cancelled
            } else {
                TaskState::Failed
            };
            let _ = self.handle.transition(state);
        }
        self.release();
    }
}
