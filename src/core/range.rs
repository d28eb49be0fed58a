/*!
 * Range relay: an ordered list of objects, one at a time
 *
 * Each object is looked up and delivered in order, with a configurable pause
 * between items. An object that belongs to a batch hands the whole batch to the
 * [`CollectionTransferOrchestrator`] the first time one of its members is seen;
 * later members of the same batch are skipped. Objects missing at the source are
 * skipped rather than failed.
 *
 * The loop checks the task's cancel flag before every item. Cancellation or a
 * flood stop ends the loop, and the summary records why it stopped.
 */

use crate::config::TransferConfig;
use crate::core::batch::CollectionTransferOrchestrator;
use crate::core::dedup::DedupSet;
use crate::core::object::ObjectDelivery;
use crate::core::task::{check_cancelled, StatusPublisher};
use crate::error::TransferError;
use crate::remote::{BatchLocator, Destination, ObjectLocator, RemoteError, SharedRemote};
use ferry_core_resilience::{RateLimitGuard, RetryBudget, TaskHandle};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why a sequential relay stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// Every item was processed
    Completed,
    /// The user cancelled the task
    Cancelled,
    /// Rate limiting could not be mitigated
    FloodStop { wait_secs: u64 },
}

impl StopReason {
    /// The stop reason a fatal error stands for, if it is one
    pub fn from_error(err: &TransferError) -> Option<Self> {
        match err {
            TransferError::Cancelled => Some(StopReason::Cancelled),
            TransferError::FloodStop { wait_secs } => Some(StopReason::FloodStop {
                wait_secs: *wait_secs,
            }),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StopReason::Completed)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Completed => write!(f, "completed"),
            StopReason::Cancelled => write!(f, "cancelled by user"),
            StopReason::FloodStop { wait_secs } => {
                write!(f, "stopped by rate limiting ({}s wait demanded)", wait_secs)
            }
        }
    }
}

/// Coarse per-item outcome of a range relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeItemStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeItem {
    pub locator: ObjectLocator,
    pub status: RangeItemStatus,
    /// Batch handled on behalf of this item
    pub batch: Option<BatchLocator>,
    pub detail: Option<String>,
}

/// Aggregate result of a range relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSummary {
    pub items: Vec<RangeItem>,
    pub stop: StopReason,
    /// Items never reached because the relay stopped early
    pub not_attempted: usize,
    pub elapsed_ms: u64,
}

impl RangeSummary {
    fn count(&self, status: RangeItemStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(RangeItemStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(RangeItemStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(RangeItemStatus::Skipped)
    }
}

/// Sequential relay over an ordered list of objects
#[derive(Clone)]
pub struct RangeRelay {
    remote: SharedRemote,
    objects: ObjectDelivery,
    orchestrator: CollectionTransferOrchestrator,
    guard: RateLimitGuard,
    unit_retries: u32,
    item_delay: Duration,
}

impl RangeRelay {
    pub fn new(
        remote: SharedRemote,
        objects: ObjectDelivery,
        orchestrator: CollectionTransferOrchestrator,
        config: &TransferConfig,
    ) -> Self {
        Self {
            remote,
            objects,
            orchestrator,
            guard: RateLimitGuard::new(config.rate_limit_margin()),
            unit_retries: config.rate_limit.unit_retries,
            item_delay: config.item_delay(),
        }
    }

    /// Relay `locators` in order.
    ///
    /// Never fails as a whole: a fatal condition ends the loop and is reported
    /// through [`RangeSummary::stop`].
    pub async fn run(
        &self,
        locators: &[ObjectLocator],
        destination: &Destination,
        dedup: &DedupSet,
        handle: &TaskHandle,
    ) -> RangeSummary {
        let started = Instant::now();
        let silent = StatusPublisher::silent();
        let mut handled_batches: HashSet<BatchLocator> = HashSet::new();
        let mut items = Vec::with_capacity(locators.len());
        let mut stop = StopReason::Completed;
        let mut pause_before_next = false;

        for locator in locators {
            if pause_before_next && !self.item_delay.is_zero() {
                tokio::time::sleep(self.item_delay).await;
            }

            match self
                .relay_one(locator, destination, dedup, handle, &silent, &mut handled_batches)
                .await
            {
                Ok((item, worked)) => {
                    pause_before_next = worked;
                    items.push(item);
                }
                Err(reason) => {
                    stop = reason;
                    break;
                }
            }
        }

        let not_attempted = locators.len() - items.len();
        let summary = RangeSummary {
            items,
            stop,
            not_attempted,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            task = %handle.id(),
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            skipped = summary.skipped(),
            stop = %summary.stop,
            "Range relay finished"
        );
        summary
    }

    /// One item. `Ok((item, worked))`, where `worked` is false when nothing was
    /// asked of the remote beyond the lookup; `Err` carries the reason to stop.
    async fn relay_one(
        &self,
        locator: &ObjectLocator,
        destination: &Destination,
        dedup: &DedupSet,
        handle: &TaskHandle,
        status: &StatusPublisher,
        handled_batches: &mut HashSet<BatchLocator>,
    ) -> std::result::Result<(RangeItem, bool), StopReason> {
        if let Err(e) = check_cancelled(handle) {
            return Err(StopReason::from_error(&e).unwrap_or(StopReason::Cancelled));
        }

        let mut item = RangeItem {
            locator: locator.clone(),
            status: RangeItemStatus::Failed,
            batch: None,
            detail: None,
        };

        let remote = &self.remote;
        let lookup = self
            .guard
            .run(handle, RetryBudget::escalating(self.unit_retries), || {
                remote.get_metadata(locator)
            })
            .await
            .map_err(TransferError::from);

        let metadata = match lookup {
            Ok(metadata) => metadata,
            Err(TransferError::Remote(RemoteError::NotFound(_))) => {
                debug!(object = %locator, "Object missing at source, skipping");
                item.status = RangeItemStatus::Skipped;
                item.detail = Some("missing at source".to_string());
                return Ok((item, false));
            }
            Err(e) => return settle(item, e).map(|item| (item, true)),
        };

        if let Some(batch) = metadata.batch.clone() {
            item.batch = Some(batch.clone());
            if !handled_batches.insert(batch.clone()) {
                item.status = RangeItemStatus::Skipped;
                item.detail = Some(format!("delivered with batch {}", batch));
                return Ok((item, false));
            }

            let outcome = self
                .orchestrator
                .transfer_batch(&batch, destination, dedup, handle, status)
                .await;
            return match outcome {
                Ok(summary) => {
                    item.status = RangeItemStatus::Succeeded;
                    item.detail = Some(format!(
                        "batch {}: {} delivered, {} failed, {} skipped",
                        batch,
                        summary.succeeded(),
                        summary.failed(),
                        summary.skipped()
                    ));
                    Ok((item, true))
                }
                Err(e) => settle(item, e).map(|item| (item, true)),
            };
        }

        match self
            .objects
            .deliver(metadata, destination, dedup, handle, status)
            .await
        {
            Ok(outcome) if outcome.is_delivered() => {
                item.status = RangeItemStatus::Succeeded;
                Ok((item, true))
            }
            Ok(outcome) => {
                item.status = RangeItemStatus::Skipped;
                item.detail = Some(outcome.to_string());
                Ok((item, false))
            }
            Err(e) => settle(item, e).map(|item| (item, true)),
        }
    }
}

/// Record a failed item, or turn a fatal error into the reason to stop
fn settle(mut item: RangeItem, err: TransferError) -> std::result::Result<RangeItem, StopReason> {
    if let Some(reason) = StopReason::from_error(&err) {
        warn!(object = %item.locator, reason = %reason, "Range relay stopping");
        return Err(reason);
    }
    warn!(object = %item.locator, error = %err, category = %err.category(), "Item failed");
    item.status = RangeItemStatus::Failed;
    item.detail = Some(err.to_string());
    Ok(item)
}
