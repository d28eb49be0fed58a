/*!
 * Transfer task: one object moving through the lifecycle
 *
 * A [`TransferTask`] carries what the engine needs to download one object (its
 * metadata, destination and chunk plan) together with its own lifecycle state and
 * the [`TaskHandle`] of the enclosing task, whose cancel flag it polls.
 *
 * Lifecycle changes are validated locally and mirrored to the task's status sink
 * through a [`StatusPublisher`]. A range relay runs many objects under one task, so
 * its per-object tasks use a silent publisher and the relay reports task-level
 * states itself.
 */

use crate::core::chunk::ChunkPlan;
use crate::error::{Result, TransferError};
use crate::remote::{BatchLocator, Destination, ObjectLocator, RemoteMetadata};
use ferry_core_resilience::{CancelReason, TaskHandle, TaskState};
use tracing::debug;

/// Mirrors lifecycle states to a task's status sink, or nowhere
#[derive(Debug, Clone, Default)]
pub struct StatusPublisher {
    handle: Option<TaskHandle>,
}

impl StatusPublisher {
    pub fn to(handle: &TaskHandle) -> Self {
        Self {
            handle: Some(handle.clone()),
        }
    }

    pub fn silent() -> Self {
        Self { handle: None }
    }

    /// Best effort: a transition the sink rejects (already terminal) is logged and dropped
    pub fn publish(&self, state: TaskState) {
        if let Some(handle) = &self.handle {
            if let Err(e) = handle.transition(state) {
                debug!(task = %handle.id(), error = %e, "Status not published");
            }
        }
    }
}

/// One object to download, with its chunk plan and lifecycle
#[derive(Debug)]
pub struct TransferTask {
    metadata: RemoteMetadata,
    destination: Destination,
    plan: ChunkPlan,
    state: TaskState,
    handle: TaskHandle,
    status: StatusPublisher,
}

impl TransferTask {
    pub fn new(
        metadata: RemoteMetadata,
        destination: Destination,
        chunk_size: u64,
        handle: TaskHandle,
    ) -> Result<Self> {
        let plan = ChunkPlan::new(metadata.total_size, chunk_size)?;
        let status = StatusPublisher::to(&handle);
        Ok(Self {
            metadata,
            destination,
            plan,
            state: TaskState::Pending,
            handle,
            status,
        })
    }

    /// Keep lifecycle changes local to this object
    pub fn with_status(mut self, status: StatusPublisher) -> Self {
        self.status = status;
        self
    }

    pub fn source(&self) -> &ObjectLocator {
        &self.metadata.locator
    }

    pub fn batch(&self) -> Option<&BatchLocator> {
        self.metadata.batch.as_ref()
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn metadata(&self) -> &RemoteMetadata {
        &self.metadata
    }

    pub fn total_size(&self) -> u64 {
        self.metadata.total_size
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn advance(&mut self, next: TaskState) -> Result<()> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(TransferError::Other(format!(
                "illegal transition {} -> {} for {}",
                self.state,
                next,
                self.source()
            )));
        }

        debug!(object = %self.source(), from = %self.state, to = %next, "Task transition");
        self.state = next;
        self.status.publish(next);
        Ok(())
    }

    /// Fail fast if the enclosing task was cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        check_cancelled(&self.handle)
    }

    /// Record the terminal state matching `err`
    pub fn conclude_with_error(&mut self, err: &TransferError) {
        let terminal = if err.is_cancellation() {
            TaskState::Cancelled
        } else {
            TaskState::Failed
        };
        if !self.state.is_terminal() {
            // Any live state may fail or be cancelled
            let _ = self.advance(terminal);
        }
    }
}

/// The error matching a raised cancel flag, if any
pub fn check_cancelled(handle: &TaskHandle) -> Result<()> {
    if handle.is_cancelled() {
        let reason = handle.cancel_reason().unwrap_or(CancelReason::User);
        return Err(reason.into());
    }
    Ok(())
}
