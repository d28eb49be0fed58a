/*!
 * Chunked transfer engine
 *
 * Downloads one object as independently fetched byte ranges into a pre-sized
 * temporary file:
 *
 * ```text
 *   allocate(total_size) ──► plan ranges ──► for each range:
 *                                              acquire slot
 *                                              cancelled / aborted? stop scheduling
 *                                              spawn unit:
 *                                                guarded fetch_range (1 retry)
 *                                                cancelled? skip the write
 *                                                open ─ seek ─ write ─ flush
 *                                                record progress
 *                            drain every unit ──► first error wins, file dropped
 *                                             └─► verify size ──► LocalArtifact
 * ```
 *
 * Units write disjoint ranges, so no lock guards the file itself. The first
 * failing unit raises a local abort flag; already running siblings finish on their
 * own, no new unit starts, and the artifact (with its file) is dropped once all of
 * them have settled. A rate-limit signal that persists past the unit's retry budget
 * escalates to the enclosing task, which stops every sibling cooperatively.
 *
 * Sources without ranged access are fetched whole in a single call.
 */

use crate::config::TransferConfig;
use crate::core::artifact::LocalArtifact;
use crate::core::chunk::ChunkRange;
use crate::core::progress::{ProgressPublisher, ProgressTracker, SharedSink};
use crate::core::task::{check_cancelled, TransferTask};
use crate::error::{Result, TransferError};
use crate::remote::{Destination, ObjectLocator, RemoteError, RemoteMetadata, SharedRemote};
use ferry_core_resilience::{RateLimitGuard, RetryBudget, TaskHandle, TaskState};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Settings the engine runs with
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub chunk_size: u64,
    pub max_concurrent_chunks: usize,
    /// Rate-limit retries per chunk fetch
    pub unit_retries: u32,
    pub progress_interval: Duration,
    pub download_dir: PathBuf,
    pub rate_limit_margin: Duration,
}

impl From<&TransferConfig> for EngineConfig {
    fn from(config: &TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size_bytes,
            max_concurrent_chunks: config.max_concurrent_chunks.max(1),
            unit_retries: config.rate_limit.unit_retries,
            progress_interval: config.progress_interval(),
            download_dir: config.download_dir.clone(),
            rate_limit_margin: config.rate_limit_margin(),
        }
    }
}

/// Parallel ranged downloader for single objects
#[derive(Clone)]
pub struct ChunkedTransferEngine {
    remote: SharedRemote,
    config: EngineConfig,
    guard: RateLimitGuard,
    sink: SharedSink,
}

impl ChunkedTransferEngine {
    pub fn new(remote: SharedRemote, config: &TransferConfig) -> Self {
        let config = EngineConfig::from(config);
        Self {
            remote,
            guard: RateLimitGuard::new(config.rate_limit_margin),
            config,
            sink: Arc::new(ProgressPublisher::noop()),
        }
    }

    /// Send progress to `sink` instead of discarding it
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn remote(&self) -> &SharedRemote {
        &self.remote
    }

    /// Build a task for `metadata` under the enclosing task's handle
    pub fn new_task(
        &self,
        metadata: RemoteMetadata,
        destination: Destination,
        handle: TaskHandle,
    ) -> Result<TransferTask> {
        TransferTask::new(metadata, destination, self.config.chunk_size, handle)
    }

    /// Download the task's object into a temporary file of exactly `total_size` bytes.
    ///
    /// On success the task is left in `Assembling`; the caller owns the artifact and
    /// decides when it is removed. On error the task is concluded as `Failed` or
    /// `Cancelled` and no file remains.
    pub async fn transfer(&self, task: &mut TransferTask) -> Result<LocalArtifact> {
        match self.run(task).await {
            Ok(artifact) => Ok(artifact),
            Err(e) => {
                warn!(object = %task.source(), error = %e, category = %e.category(), "Download failed");
                task.conclude_with_error(&e);
                Err(e)
            }
        }
    }

    async fn run(&self, task: &mut TransferTask) -> Result<LocalArtifact> {
        task.check_cancelled()?;
        task.advance(TaskState::Downloading)?;

        let total = task.total_size();
        let tracker = Arc::new(ProgressTracker::new(
            task.source().to_string(),
            &task.metadata().delivery_name(),
            total,
            self.config.progress_interval,
            self.sink.clone(),
        ));

        info!(
            object = %task.source(),
            total_size = total,
            chunks = task.plan().len(),
            ranged = task.metadata().ranged,
            "Starting download"
        );

        let downloaded = match self.download(task, &tracker).await {
            Ok(artifact) => {
                task.advance(TaskState::Assembling)?;
                artifact.verify_size().await.map(|_| artifact)
            }
            Err(e) => Err(e),
        };

        let snapshot = tracker.finish(downloaded.is_ok());
        if downloaded.is_ok() {
            info!(
                object = %task.source(),
                bytes = snapshot.bytes_done,
                elapsed_ms = snapshot.elapsed.as_millis() as u64,
                speed_bps = snapshot.speed() as u64,
                "Download complete"
            );
        }
        downloaded
    }

    async fn download(
        &self,
        task: &TransferTask,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<LocalArtifact> {
        let artifact = LocalArtifact::allocate(&self.config.download_dir, task.total_size()).await?;

        if task.total_size() == 0 {
            return Ok(artifact);
        }

        if task.metadata().ranged {
            self.download_ranges(task, artifact, tracker).await
        } else {
            self.download_whole(task, artifact, tracker).await
        }
    }

    async fn download_whole(
        &self,
        task: &TransferTask,
        artifact: LocalArtifact,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<LocalArtifact> {
        debug!(object = %task.source(), "Source has no ranged access, fetching whole object");

        let remote = &self.remote;
        let locator = task.source();
        let bytes = self
            .guard
            .run(
                task.handle(),
                RetryBudget::escalating(self.config.unit_retries),
                || remote.fetch_whole(locator),
            )
            .await?;

        task.check_cancelled()?;
        if bytes.len() as u64 != task.total_size() {
            return Err(TransferError::SizeMismatch {
                expected: task.total_size(),
                actual: bytes.len() as u64,
            });
        }

        artifact.write_at(0, &bytes).await?;
        tracker.record(bytes.len() as u64);
        Ok(artifact)
    }

    async fn download_ranges(
        &self,
        task: &TransferTask,
        artifact: LocalArtifact,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<LocalArtifact> {
        let artifact = Arc::new(artifact);
        let slots = Arc::new(Semaphore::new(self.config.max_concurrent_chunks));
        let abort = Arc::new(AtomicBool::new(false));
        let budget = RetryBudget::escalating(self.config.unit_retries);
        let mut units = JoinSet::new();

        for range in task.plan().ranges().iter().copied() {
            let permit = slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| TransferError::Other(format!("chunk slots closed: {}", e)))?;

            if task.handle().is_cancelled() || abort.load(Ordering::Acquire) {
                debug!(object = %task.source(), next_chunk = range.index, "Stopped scheduling chunks");
                break;
            }

            let unit = ChunkUnit {
                remote: self.remote.clone(),
                guard: self.guard,
                budget,
                handle: task.handle().clone(),
                locator: task.source().clone(),
                range,
                artifact: artifact.clone(),
                tracker: tracker.clone(),
                abort: abort.clone(),
            };
            units.spawn(unit.run(permit));
        }

        let mut first_error: Option<TransferError> = None;
        while let Some(joined) = units.join_next().await {
            let outcome = joined.map_err(TransferError::from).and_then(|r| r);
            if let Err(e) = outcome {
                abort.store(true, Ordering::Release);
                // A task-wide stop outranks whatever a sibling reported first
                let replace = match &first_error {
                    None => true,
                    Some(current) => !current.is_fatal() && e.is_fatal(),
                };
                if replace {
                    first_error = Some(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        task.check_cancelled()?;

        Arc::try_unwrap(artifact)
            .map_err(|_| TransferError::Other("artifact still shared after drain".to_string()))
    }
}

/// One chunk fetch, owned by a spawned task
struct ChunkUnit {
    remote: SharedRemote,
    guard: RateLimitGuard,
    budget: RetryBudget,
    handle: TaskHandle,
    locator: ObjectLocator,
    range: ChunkRange,
    artifact: Arc<LocalArtifact>,
    tracker: Arc<ProgressTracker>,
    abort: Arc<AtomicBool>,
}

impl ChunkUnit {
    async fn run(self, _permit: OwnedSemaphorePermit) -> Result<()> {
        if self.abort.load(Ordering::Acquire) {
            return Ok(());
        }

        let result = self.fetch_and_write().await;
        if result.is_err() {
            self.abort.store(true, Ordering::Release);
        }
        result
    }

    async fn fetch_and_write(&self) -> Result<()> {
        let ChunkRange {
            index,
            offset,
            length,
        } = self.range;

        let remote = &self.remote;
        let locator = &self.locator;
        let bytes = self
            .guard
            .run(&self.handle, self.budget, || {
                remote.fetch_range(locator, offset, length)
            })
            .await?;

        // Completed fetches of a cancelled task are discarded
        check_cancelled(&self.handle)?;

        if bytes.len() as u64 != length {
            return Err(RemoteError::Malformed(format!(
                "chunk {} of {}: expected {} bytes, got {}",
                index,
                self.locator,
                length,
                bytes.len()
            ))
            .into());
        }

        self.artifact.write_at(offset, &bytes).await?;
        self.tracker.record(length);
        debug!(object = %self.locator, chunk = index, offset, length, "Chunk written");
        Ok(())
    }
}
