//! Collection transfer orchestration
//!
//! Delivers a batch (an ordered group of related items) to a destination in two
//! phases.
//!
//! # Phase A: direct copy
//!
//! One server-side "copy everything" call. It costs no local disk and no chunked
//! bandwidth, so it is always tried first. A rate-limit signal gets the bulk retry
//! budget; if the signal persists, or the remote refuses the copy for any other
//! reason (unsupported, malformed batch, cross-boundary restriction), the
//! orchestrator falls through to Phase B. That branch is expected, not an error.
//!
//! # Phase B: download, reassemble, upload
//!
//! ```text
//!   list members ──► metadata (bounded, in order)
//!        │
//!        ▼
//!   plan in batch order:  duplicate? ──► SkippedDuplicate
//!                         too large? ──► SkippedTooLarge
//!                         no media?  ──► SkippedNoContent
//!                         claim identity, schedule download
//!        │
//!        ▼
//!   downloads (bounded, completion order) ──► re-sort by batch position
//!        │
//!        ▼
//!   bulk upload ──fails──► individual uploads (isolated, paced)
//! ```
//!
//! Every temporary file is removed once the upload attempt that used it has
//! concluded, whatever the outcome.

use crate::config::TransferConfig;
use crate::core::artifact::LocalArtifact;
use crate::core::dedup::DedupSet;
use crate::core::engine::ChunkedTransferEngine;
use crate::core::task::{check_cancelled, StatusPublisher};
use crate::error::{ErrorCategory, Result, TransferError};
use crate::remote::{
    BatchLocator, Destination, ObjectLocator, PreparedMedia, RemoteError, RemoteMetadata,
};
use ferry_core_resilience::{GuardError, RateLimitGuard, RetryBudget, TaskHandle, TaskState};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one batch member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Succeeded,
    Failed,
    SkippedDuplicate,
    SkippedTooLarge,
    SkippedNoContent,
}

impl ItemStatus {
    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            ItemStatus::SkippedDuplicate | ItemStatus::SkippedTooLarge | ItemStatus::SkippedNoContent
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemStatus::Succeeded => "succeeded",
            ItemStatus::Failed => "failed",
            ItemStatus::SkippedDuplicate => "skipped (duplicate)",
            ItemStatus::SkippedTooLarge => "skipped (too large)",
            ItemStatus::SkippedNoContent => "skipped (no content)",
        };
        f.write_str(name)
    }
}

/// How the batch reached its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPath {
    /// Server-side copy (Phase A)
    DirectCopy,
    /// One grouped upload of every prepared item
    BulkUpload,
    /// Items uploaded one at a time after the bulk upload failed
    IndividualUpload,
    /// Nothing was uploaded
    Undelivered,
}

/// Per-item record in a [`BatchSummary`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub index: usize,
    pub locator: ObjectLocator,
    pub status: ItemStatus,
    pub bytes: u64,
    /// Reason for a failure or skip
    pub detail: Option<String>,
}

impl ItemOutcome {
    fn new(index: usize, locator: ObjectLocator, status: ItemStatus) -> Self {
        Self {
            index,
            locator,
            status,
            bytes: 0,
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Result of one batch transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch: BatchLocator,
    pub delivery: DeliveryPath,
    /// Member outcomes in batch order (empty after a direct copy)
    pub items: Vec<ItemOutcome>,
    pub elapsed_ms: u64,
}

impl BatchSummary {
    pub fn count(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(ItemStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(ItemStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.items.iter().filter(|i| i.status.is_skipped()).count()
    }

    pub fn bytes(&self) -> u64 {
        self.items.iter().map(|i| i.bytes).sum()
    }

    /// A batch succeeds when the direct copy worked or at least one item was delivered
    pub fn is_success(&self) -> bool {
        self.delivery == DeliveryPath::DirectCopy || self.succeeded() > 0
    }
}

/// Limits and budgets the orchestrator runs with
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    pub max_concurrent_items: usize,
    pub bulk_retries: u32,
    pub unit_retries: u32,
    pub upload_delay: Duration,
    pub max_item_bytes: u64,
}

impl From<&TransferConfig> for BatchSettings {
    fn from(config: &TransferConfig) -> Self {
        Self {
            max_concurrent_items: config.max_concurrent_batch_items.max(1),
            bulk_retries: config.rate_limit.bulk_retries,
            unit_retries: config.rate_limit.unit_retries,
            upload_delay: config.upload_delay(),
            max_item_bytes: config.size_limits.max_bytes(),
        }
    }
}

/// Two-phase batch transfer
#[derive(Clone)]
pub struct CollectionTransferOrchestrator {
    engine: ChunkedTransferEngine,
    settings: BatchSettings,
    guard: RateLimitGuard,
}

/// A member cleared for download
struct PlannedItem {
    index: usize,
    metadata: RemoteMetadata,
}

impl CollectionTransferOrchestrator {
    pub fn new(engine: ChunkedTransferEngine, config: &TransferConfig) -> Self {
        Self {
            engine,
            settings: BatchSettings::from(config),
            guard: RateLimitGuard::new(config.rate_limit_margin()),
        }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Deliver `batch` to `destination`.
    ///
    /// Fails with a fatal error on cancellation or flood stop, and with
    /// `NothingDelivered` (carrying the per-item summary) when Phase B ends
    /// without a single delivered item.
    pub async fn transfer_batch(
        &self,
        batch: &BatchLocator,
        destination: &Destination,
        dedup: &DedupSet,
        handle: &TaskHandle,
        status: &StatusPublisher,
    ) -> Result<BatchSummary> {
        let started = Instant::now();
        check_cancelled(handle)?;

        if self.direct_copy(batch, destination, handle).await? {
            status.publish(TaskState::Uploading);
            info!(batch = %batch, "Batch delivered by direct copy");
            return Ok(BatchSummary {
                batch: batch.clone(),
                delivery: DeliveryPath::DirectCopy,
                items: Vec::new(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }

        let summary = self
            .download_and_upload(batch, destination, dedup, handle, status, started)
            .await?;

        info!(
            batch = %batch,
            delivery = ?summary.delivery,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            skipped = summary.skipped(),
            "Batch finished"
        );

        if summary.is_success() {
            Ok(summary)
        } else {
            Err(TransferError::NothingDelivered {
                summary: Box::new(summary),
            })
        }
    }

    /// Phase A. `Ok(false)` means "fall through to Phase B".
    async fn direct_copy(
        &self,
        batch: &BatchLocator,
        destination: &Destination,
        handle: &TaskHandle,
    ) -> Result<bool> {
        let remote = self.engine.remote();
        let attempt = self
            .guard
            .run(
                handle,
                RetryBudget::yielding(self.settings.bulk_retries),
                || remote.copy_batch(batch, destination),
            )
            .await;

        match attempt {
            Ok(()) => Ok(true),
            Err(GuardError::Cancelled(reason)) => Err(reason.into()),
            Err(GuardError::FloodStop { wait, attempts }) => {
                info!(
                    batch = %batch,
                    attempts,
                    wait_secs = wait.as_secs(),
                    "Direct copy still rate limited, falling back to download"
                );
                Ok(false)
            }
            Err(GuardError::Failed(e)) => {
                info!(
                    batch = %batch,
                    category = %ErrorCategory::FallbackTriggering,
                    reason = %e,
                    "Direct copy refused, falling back to download"
                );
                Ok(false)
            }
        }
    }

    /// Phase B
    async fn download_and_upload(
        &self,
        batch: &BatchLocator,
        destination: &Destination,
        dedup: &DedupSet,
        handle: &TaskHandle,
        status: &StatusPublisher,
        started: Instant,
    ) -> Result<BatchSummary> {
        status.publish(TaskState::Downloading);

        let remote = self.engine.remote();
        let members = self
            .guard
            .run(
                handle,
                RetryBudget::escalating(self.settings.unit_retries),
                || remote.list_batch_members(batch),
            )
            .await?;
        debug!(batch = %batch, members = members.len(), "Listed batch members");

        let mut outcomes: BTreeMap<usize, ItemOutcome> = BTreeMap::new();
        let planned = self
            .plan(members, dedup, handle, &mut outcomes)
            .await?;

        let mut prepared = self
            .download_all(planned, destination, handle, &mut outcomes)
            .await?;
        prepared.sort_by_key(|(item, _)| item.index);

        check_cancelled(handle)?;
        status.publish(TaskState::Assembling);

        let delivery = if prepared.is_empty() {
            DeliveryPath::Undelivered
        } else {
            status.publish(TaskState::Uploading);
            self.upload(destination, prepared, handle, &mut outcomes)
                .await?
        };

        Ok(BatchSummary {
            batch: batch.clone(),
            delivery,
            items: outcomes.into_values().collect(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Fetch metadata for every member and decide, in batch order, what to download
    async fn plan(
        &self,
        members: Vec<ObjectLocator>,
        dedup: &DedupSet,
        handle: &TaskHandle,
        outcomes: &mut BTreeMap<usize, ItemOutcome>,
    ) -> Result<Vec<PlannedItem>> {
        let remote = self.engine.remote();
        let budget = RetryBudget::escalating(self.settings.unit_retries);

        let lookups: Vec<(usize, ObjectLocator, Result<RemoteMetadata>)> =
            stream::iter(members.into_iter().enumerate())
                .map(|(index, locator)| async move {
                    let meta = self
                        .guard
                        .run(handle, budget, || remote.get_metadata(&locator))
                        .await
                        .map_err(TransferError::from);
                    (index, locator, meta)
                })
                .buffered(self.settings.max_concurrent_items)
                .collect()
                .await;

        let mut planned = Vec::new();
        for (index, locator, lookup) in lookups {
            let metadata = match lookup {
                Ok(metadata) => metadata,
                Err(e) if e.is_fatal() => return Err(e),
                Err(TransferError::Remote(RemoteError::NotFound(detail))) => {
                    outcomes.insert(
                        index,
                        ItemOutcome::new(index, locator, ItemStatus::SkippedNoContent)
                            .with_detail(detail),
                    );
                    continue;
                }
                Err(e) => {
                    outcomes.insert(
                        index,
                        ItemOutcome::new(index, locator, ItemStatus::Failed)
                            .with_detail(e.to_string()),
                    );
                    continue;
                }
            };

            if !metadata.kind.is_media() {
                outcomes.insert(
                    index,
                    ItemOutcome::new(index, locator, ItemStatus::SkippedNoContent)
                        .with_detail(format!("{} item", metadata.kind)),
                );
                continue;
            }

            if let Some(identity) = &metadata.content_identity {
                if dedup.contains(identity) {
                    debug!(object = %locator, identity = %identity, "Duplicate content, skipping");
                    outcomes.insert(
                        index,
                        ItemOutcome::new(index, locator, ItemStatus::SkippedDuplicate),
                    );
                    continue;
                }
            }

            if metadata.total_size > self.settings.max_item_bytes {
                let too_large = TransferError::TooLarge {
                    size: metadata.total_size,
                    limit: self.settings.max_item_bytes,
                };
                outcomes.insert(
                    index,
                    ItemOutcome::new(index, locator, ItemStatus::SkippedTooLarge)
                        .with_detail(too_large.to_string()),
                );
                continue;
            }

            // Claimed before the download; never released
            if let Some(identity) = &metadata.content_identity {
                if !dedup.claim(identity) {
                    outcomes.insert(
                        index,
                        ItemOutcome::new(index, locator, ItemStatus::SkippedDuplicate),
                    );
                    continue;
                }
            }

            planned.push(PlannedItem { index, metadata });
        }

        Ok(planned)
    }

    /// Download planned items concurrently; returned in completion order
    async fn download_all(
        &self,
        planned: Vec<PlannedItem>,
        destination: &Destination,
        handle: &TaskHandle,
        outcomes: &mut BTreeMap<usize, ItemOutcome>,
    ) -> Result<Vec<(PreparedMedia, LocalArtifact)>> {
        let settled: Vec<(PlannedItem, Result<LocalArtifact>)> = stream::iter(planned)
            .map(|item| async move {
                let downloaded = self
                    .download_item(&item.metadata, destination, handle)
                    .await;
                (item, downloaded)
            })
            .buffer_unordered(self.settings.max_concurrent_items)
            .collect()
            .await;

        let mut prepared = Vec::with_capacity(settled.len());
        let mut fatal: Option<TransferError> = None;

        for (item, downloaded) in settled {
            let locator = item.metadata.locator.clone();
            match downloaded {
                Ok(artifact) => {
                    let media = PreparedMedia {
                        index: item.index,
                        source: locator,
                        kind: item.metadata.kind,
                        path: artifact.path_buf(),
                        caption: item.metadata.caption.clone(),
                        file_name: item.metadata.delivery_name(),
                        size: artifact.size(),
                    };
                    prepared.push((media, artifact));
                }
                Err(e) => {
                    outcomes.insert(
                        item.index,
                        ItemOutcome::new(item.index, locator, ItemStatus::Failed)
                            .with_detail(e.to_string()),
                    );
                    if e.is_fatal() && fatal.is_none() {
                        fatal = Some(e);
                    }
                }
            }
        }

        match fatal {
            // Dropping `prepared` removes every downloaded file
            Some(e) => Err(e),
            None => Ok(prepared),
        }
    }

    async fn download_item(
        &self,
        metadata: &RemoteMetadata,
        destination: &Destination,
        handle: &TaskHandle,
    ) -> Result<LocalArtifact> {
        let mut task = self
            .engine
            .new_task(metadata.clone(), destination.clone(), handle.clone())?
            .with_status(StatusPublisher::silent());
        self.engine.transfer(&mut task).await
    }

    /// Bulk upload, falling back to isolated individual uploads
    async fn upload(
        &self,
        destination: &Destination,
        prepared: Vec<(PreparedMedia, LocalArtifact)>,
        handle: &TaskHandle,
        outcomes: &mut BTreeMap<usize, ItemOutcome>,
    ) -> Result<DeliveryPath> {
        let remote = self.engine.remote();
        let items: Vec<PreparedMedia> = prepared.iter().map(|(item, _)| item.clone()).collect();

        let bulk = self
            .guard
            .run(
                handle,
                RetryBudget::yielding(self.settings.bulk_retries),
                || remote.bulk_upload(destination, &items),
            )
            .await;

        match bulk {
            Ok(()) => {
                for (item, _artifact) in prepared {
                    outcomes.insert(item.index, delivered(&item));
                }
                return Ok(DeliveryPath::BulkUpload);
            }
            Err(GuardError::Cancelled(reason)) => return Err(reason.into()),
            Err(e) => {
                warn!(
                    items = items.len(),
                    error = %e,
                    "Bulk upload failed, uploading items individually"
                );
            }
        }

        for (position, (item, artifact)) in prepared.into_iter().enumerate() {
            if position > 0 && !self.settings.upload_delay.is_zero() {
                tokio::time::sleep(self.settings.upload_delay).await;
            }

            let single = self
                .guard
                .run(
                    handle,
                    RetryBudget::escalating(self.settings.unit_retries),
                    || remote.upload_single(destination, &item),
                )
                .await;

            match single {
                Ok(()) => {
                    outcomes.insert(item.index, delivered(&item));
                }
                Err(e @ GuardError::Failed(_)) => {
                    warn!(object = %item.source, error = %e, "Item upload failed");
                    outcomes.insert(
                        item.index,
                        ItemOutcome::new(item.index, item.source.clone(), ItemStatus::Failed)
                            .with_detail(e.to_string()),
                    );
                }
                // Cancellation or flood stop ends the batch
                Err(fatal) => return Err(fatal.into()),
            }
            drop(artifact);
        }

        Ok(DeliveryPath::IndividualUpload)
    }
}

fn delivered(item: &PreparedMedia) -> ItemOutcome {
    ItemOutcome {
        index: item.index,
        locator: item.source.clone(),
        status: ItemStatus::Succeeded,
        bytes: item.size,
        detail: None,
    }
}
