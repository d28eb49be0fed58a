/*!
 * Relay service: the entry point for every transfer request
 *
 * A [`Relay`] owns the task registry and the transfer components, and runs each
 * request as one registered task:
 *
 * ```text
 *   relay_object / relay_batch / relay_batches / relay_range
 *        │
 *        ├─► registry.register(task id)   (TaskAlreadyActive if taken)
 *        ├─► run the components under the task's handle
 *        └─► registration.finish(terminal state)   (exactly once, also on drop)
 * ```
 *
 * Cancellation goes through [`Relay::cancel`]; every component polls the task's
 * flag before it starts new remote work.
 */

use crate::config::{DedupScope, TransferConfig};
use crate::core::batch::{BatchSummary, CollectionTransferOrchestrator};
use crate::core::dedup::DedupSet;
use crate::core::engine::ChunkedTransferEngine;
use crate::core::object::{ObjectDelivery, ObjectSummary};
use crate::core::progress::{ProgressPublisher, SharedSink};
use crate::core::range::{RangeRelay, RangeSummary, StopReason};
use crate::core::task::StatusPublisher;
use crate::error::{Result, TransferError};
use crate::remote::{BatchLocator, Destination, ObjectLocator, SharedRemote};
use ferry_core_resilience::{CancellationRegistry, TaskHandle, TaskId, TaskState};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Outcome of one batch within a multi-batch relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch: BatchLocator,
    pub summary: Option<BatchSummary>,
    pub error: Option<String>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.summary.as_ref().is_some_and(BatchSummary::is_success)
    }
}

/// Aggregate result of [`Relay::relay_batches`], batches in input order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiBatchSummary {
    pub batches: Vec<BatchReport>,
    pub stop: StopReason,
    pub elapsed_ms: u64,
}

impl MultiBatchSummary {
    pub fn succeeded(&self) -> usize {
        self.batches.iter().filter(|b| b.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.batches.len() - self.succeeded()
    }
}

/// Owns the task registry and runs transfer requests against one remote
pub struct Relay {
    remote: SharedRemote,
    config: TransferConfig,
    registry: CancellationRegistry,
    orchestrator: CollectionTransferOrchestrator,
    objects: ObjectDelivery,
    ranges: RangeRelay,
}

impl Relay {
    /// Validate `config` and build the transfer components
    pub fn new(remote: SharedRemote, config: TransferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(
            remote,
            config,
            CancellationRegistry::new(),
            Arc::new(ProgressPublisher::noop()),
        ))
    }

    /// Report download progress to `sink`
    pub fn with_sink(self, sink: SharedSink) -> Self {
        Self::assemble(self.remote, self.config, self.registry, sink)
    }

    fn assemble(
        remote: SharedRemote,
        config: TransferConfig,
        registry: CancellationRegistry,
        sink: SharedSink,
    ) -> Self {
        let engine = ChunkedTransferEngine::new(remote.clone(), &config).with_sink(sink);
        let orchestrator = CollectionTransferOrchestrator::new(engine.clone(), &config);
        let objects = ObjectDelivery::new(engine, &config);
        let ranges = RangeRelay::new(remote.clone(), objects.clone(), orchestrator.clone(), &config);
        Self {
            remote,
            config,
            registry,
            orchestrator,
            objects,
            ranges,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    /// Request cooperative cancellation of an active task
    pub fn cancel(&self, id: &TaskId) -> bool {
        let found = self.registry.request_cancel(id);
        if found {
            info!(task = %id, "Cancellation requested");
        }
        found
    }

    /// Relay one object
    pub async fn relay_object(
        &self,
        id: impl Into<TaskId>,
        locator: &ObjectLocator,
        destination: &Destination,
    ) -> Result<ObjectSummary> {
        let registration = self.registry.register(id)?;
        let handle = registration.handle().clone();
        let dedup = DedupSet::new();

        let result = self
            .objects
            .relay(locator, destination, &dedup, &handle, &StatusPublisher::to(&handle))
            .await;

        let terminal = match &result {
            Ok(summary) if summary.outcome.is_delivered() => TaskState::Succeeded,
            Ok(_) => TaskState::Failed,
            Err(e) => terminal_for_error(e),
        };
        registration.finish(terminal);
        result
    }

    /// Relay one batch, direct copy first
    pub async fn relay_batch(
        &self,
        id: impl Into<TaskId>,
        batch: &BatchLocator,
        destination: &Destination,
    ) -> Result<BatchSummary> {
        let registration = self.registry.register(id)?;
        let handle = registration.handle().clone();
        let dedup = DedupSet::new();

        let result = self
            .orchestrator
            .transfer_batch(batch, destination, &dedup, &handle, &StatusPublisher::to(&handle))
            .await;

        let terminal = match &result {
            Ok(_) => TaskState::Succeeded,
            Err(e) => terminal_for_error(e),
        };
        registration.finish(terminal);
        result
    }

    /// Relay independent batches, at most `max_concurrent_batches` in flight.
    ///
    /// Reports come back in input order. Once the task is cancelled or flood
    /// stopped, batches not yet started report the stop instead of running.
    pub async fn relay_batches(
        &self,
        id: impl Into<TaskId>,
        batches: &[BatchLocator],
        destination: &Destination,
    ) -> Result<MultiBatchSummary> {
        let registration = self.registry.register(id)?;
        let handle = registration.handle().clone();
        let started = Instant::now();
        let run_dedup = DedupSet::new();
        let _ = handle.transition(TaskState::Downloading);

        let reports: Vec<BatchReport> = stream::iter(batches.iter().cloned())
            .map(|batch| {
                let dedup = self.dedup_for_batch(&run_dedup);
                let handle = &handle;
                async move {
                    let outcome = self
                        .orchestrator
                        .transfer_batch(&batch, destination, &dedup, handle, &StatusPublisher::silent())
                        .await;
                    match outcome {
                        Ok(summary) => BatchReport {
                            batch,
                            summary: Some(summary),
                            error: None,
                        },
                        Err(e) => {
                            if !e.is_fatal() {
                                warn!(batch = %batch, error = %e, "Batch failed");
                            }
                            let error = Some(e.to_string());
                            let summary = match e {
                                TransferError::NothingDelivered { summary } => Some(*summary),
                                _ => None,
                            };
                            BatchReport {
                                batch,
                                summary,
                                error,
                            }
                        }
                    }
                }
            })
            .buffered(self.config.max_concurrent_batches.max(1))
            .collect()
            .await;

        let stop = stop_reason(&handle);
        let summary = MultiBatchSummary {
            batches: reports,
            stop,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        let terminal = if !stop.is_completed() {
            TaskState::Cancelled
        } else if summary.succeeded() > 0 {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        };
        info!(
            task = %handle.id(),
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            stop = %stop,
            "Batch relay finished"
        );
        registration.finish(terminal);
        Ok(summary)
    }

    /// Relay an ordered list of objects one at a time
    pub async fn relay_range(
        &self,
        id: impl Into<TaskId>,
        locators: &[ObjectLocator],
        destination: &Destination,
    ) -> Result<RangeSummary> {
        let registration = self.registry.register(id)?;
        let handle = registration.handle().clone();
        let dedup = DedupSet::new();
        let _ = handle.transition(TaskState::Downloading);

        let summary = self.ranges.run(locators, destination, &dedup, &handle).await;

        let terminal = if !summary.stop.is_completed() {
            TaskState::Cancelled
        } else if summary.failed() == 0 || summary.succeeded() > 0 {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        };
        registration.finish(terminal);
        Ok(summary)
    }

    fn dedup_for_batch(&self, run_dedup: &DedupSet) -> DedupSet {
        match self.config.dedup_scope {
            DedupScope::Run => run_dedup.clone(),
            DedupScope::Batch => DedupSet::new(),
        }
    }
}

fn terminal_for_error(err: &TransferError) -> TaskState {
    if err.is_cancellation() {
        TaskState::Cancelled
    } else {
        TaskState::Failed
    }
}

fn stop_reason(handle: &TaskHandle) -> StopReason {
    match handle.cancel_reason() {
        None => StopReason::Completed,
        Some(reason) => StopReason::from_error(&reason.into()).unwrap_or(StopReason::Cancelled),
    }
}
