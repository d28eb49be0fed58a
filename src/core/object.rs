/*!
 * Single-object delivery
 *
 * Moves one object from the source to a destination: text is forwarded as-is,
 * media is downloaded through the [`ChunkedTransferEngine`], uploaded once and the
 * local copy removed. Objects without content, over the size ceiling or already
 * seen in this run are skipped with a reason instead of failing.
 */

use crate::config::TransferConfig;
use crate::core::dedup::DedupSet;
use crate::core::engine::ChunkedTransferEngine;
use crate::core::task::{check_cancelled, StatusPublisher};
use crate::error::{Result, TransferError};
use crate::remote::{Destination, MediaKind, ObjectLocator, PreparedMedia, RemoteMetadata};
use ferry_core_resilience::{RateLimitGuard, RetryBudget, TaskHandle, TaskState};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;
use tracing::{debug, info};

/// What happened to one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ObjectOutcome {
    Delivered { bytes: u64 },
    SentText { chars: usize },
    SkippedNoContent,
    SkippedDuplicate,
    SkippedTooLarge { size: u64, limit: u64 },
}

impl ObjectOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(
            self,
            ObjectOutcome::Delivered { .. } | ObjectOutcome::SentText { .. }
        )
    }
}

impl fmt::Display for ObjectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectOutcome::Delivered { bytes } => write!(f, "delivered {} bytes", bytes),
            ObjectOutcome::SentText { chars } => write!(f, "sent {} characters of text", chars),
            ObjectOutcome::SkippedNoContent => write!(f, "skipped, nothing to deliver"),
            ObjectOutcome::SkippedDuplicate => write!(f, "skipped, duplicate content"),
            ObjectOutcome::SkippedTooLarge { size, limit } => {
                write!(f, "skipped, {} bytes exceeds the {} byte limit", size, limit)
            }
        }
    }
}

/// Result of a single-object relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub locator: ObjectLocator,
    #[serde(flatten)]
    pub outcome: ObjectOutcome,
    pub elapsed_ms: u64,
}

/// Download-then-upload for one object
#[derive(Clone)]
pub struct ObjectDelivery {
    engine: ChunkedTransferEngine,
    guard: RateLimitGuard,
    unit_retries: u32,
    max_bytes: u64,
}

impl ObjectDelivery {
    pub fn new(engine: ChunkedTransferEngine, config: &TransferConfig) -> Self {
        Self {
            engine,
            guard: RateLimitGuard::new(config.rate_limit_margin()),
            unit_retries: config.rate_limit.unit_retries,
            max_bytes: config.size_limits.max_bytes(),
        }
    }

    /// Look up `locator` and deliver it
    pub async fn relay(
        &self,
        locator: &ObjectLocator,
        destination: &Destination,
        dedup: &DedupSet,
        handle: &TaskHandle,
        status: &StatusPublisher,
    ) -> Result<ObjectSummary> {
        let started = Instant::now();
        let remote = self.engine.remote();
        let metadata = self
            .guard
            .run(handle, RetryBudget::escalating(self.unit_retries), || {
                remote.get_metadata(locator)
            })
            .await?;

        let outcome = self
            .deliver(metadata, destination, dedup, handle, status)
            .await?;
        Ok(ObjectSummary {
            locator: locator.clone(),
            outcome,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Deliver an object whose metadata is already known
    pub async fn deliver(
        &self,
        metadata: RemoteMetadata,
        destination: &Destination,
        dedup: &DedupSet,
        handle: &TaskHandle,
        status: &StatusPublisher,
    ) -> Result<ObjectOutcome> {
        check_cancelled(handle)?;

        match metadata.kind {
            MediaKind::Text => return self.send_text(&metadata, destination, handle, status).await,
            MediaKind::None => {
                debug!(object = %metadata.locator, "No content to deliver");
                return Ok(ObjectOutcome::SkippedNoContent);
            }
            _ => {}
        }

        if let Some(identity) = &metadata.content_identity {
            if dedup.contains(identity) {
                debug!(object = %metadata.locator, identity = %identity, "Duplicate content, skipping");
                return Ok(ObjectOutcome::SkippedDuplicate);
            }
        }

        if metadata.total_size > self.max_bytes {
            info!(
                object = %metadata.locator,
                size = metadata.total_size,
                limit = self.max_bytes,
                "Object exceeds size limit, skipping"
            );
            return Ok(ObjectOutcome::SkippedTooLarge {
                size: metadata.total_size,
                limit: self.max_bytes,
            });
        }

        if let Some(identity) = &metadata.content_identity {
            if !dedup.claim(identity) {
                return Ok(ObjectOutcome::SkippedDuplicate);
            }
        }

        let mut task = self
            .engine
            .new_task(metadata, destination.clone(), handle.clone())?
            .with_status(status.clone());
        let artifact = self.engine.transfer(&mut task).await?;

        let item = PreparedMedia {
            index: 0,
            source: task.source().clone(),
            kind: task.metadata().kind,
            path: artifact.path_buf(),
            caption: task.metadata().caption.clone(),
            file_name: task.metadata().delivery_name(),
            size: artifact.size(),
        };

        task.advance(TaskState::Uploading)?;
        let remote = self.engine.remote();
        let uploaded = self
            .guard
            .run(handle, RetryBudget::escalating(self.unit_retries), || {
                remote.upload_single(destination, &item)
            })
            .await;
        // The upload attempt has concluded either way
        drop(artifact);

        match uploaded {
            Ok(()) => {
                task.advance(TaskState::Succeeded)?;
                info!(object = %item.source, bytes = item.size, destination = %destination, "Object delivered");
                Ok(ObjectOutcome::Delivered { bytes: item.size })
            }
            Err(e) => {
                let err = TransferError::from(e);
                task.conclude_with_error(&err);
                Err(err)
            }
        }
    }

    async fn send_text(
        &self,
        metadata: &RemoteMetadata,
        destination: &Destination,
        handle: &TaskHandle,
        status: &StatusPublisher,
    ) -> Result<ObjectOutcome> {
        let text = match metadata.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text,
            _ => return Ok(ObjectOutcome::SkippedNoContent),
        };

        status.publish(TaskState::Uploading);
        let remote = self.engine.remote();
        self.guard
            .run(handle, RetryBudget::escalating(self.unit_retries), || {
                remote.send_text(destination, text)
            })
            .await?;
        status.publish(TaskState::Succeeded);

        debug!(object = %metadata.locator, chars = text.chars().count(), "Text forwarded");
        Ok(ObjectOutcome::SentText {
            chars: text.chars().count(),
        })
    }
}
