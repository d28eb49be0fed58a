/*!
 * Core transfer operations
 *
 * - [`engine`]: parallel ranged download of one object
 * - [`batch`]: two-phase delivery of a batch
 * - [`object`] and [`range`]: single-object and sequential relays built on both
 */

pub mod artifact;
pub mod batch;
pub mod chunk;
pub mod dedup;
pub mod engine;
pub mod object;
pub mod progress;
pub mod range;
pub mod task;

pub use artifact::LocalArtifact;
pub use batch::{
    BatchSettings, BatchSummary, CollectionTransferOrchestrator, DeliveryPath, ItemOutcome,
    ItemStatus,
};
pub use chunk::{ChunkPlan, ChunkRange, MAX_CHUNKS};
pub use dedup::DedupSet;
pub use engine::{ChunkedTransferEngine, EngineConfig};
pub use object::{ObjectDelivery, ObjectOutcome, ObjectSummary};
pub use progress::{
    ProgressEvent, ProgressPublisher, ProgressSink, ProgressSnapshot, ProgressSubscriber,
    ProgressTracker, SharedSink,
};
pub use range::{RangeItem, RangeItemStatus, RangeRelay, RangeSummary, StopReason};
pub use task::{StatusPublisher, TransferTask};
