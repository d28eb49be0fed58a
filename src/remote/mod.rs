//! Remote source abstraction
//!
//! The relay never talks to a vendor API directly. Everything it needs from the
//! remote messaging service goes through [`RemoteSource`]: metadata lookups, ranged
//! and whole-object fetches, server-side batch copies, batch listing and uploads.
//! Any call may fail with [`RemoteError::RateLimited`], which the rate-limit guard
//! recognises through [`ferry_core_resilience::RateLimitSignal`].
//!
//! # Example
//!
//! ```no_run
//! use ferry::remote::{LocalStore, ObjectLocator, RemoteSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = LocalStore::new("/srv/source", "/srv/outbox");
//!     let meta = store.get_metadata(&ObjectLocator::from("album/01.jpg")).await?;
//!     println!("{} is {} bytes", meta.locator, meta.total_size);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod local;
pub mod types;

pub use error::{RemoteError, RemoteResult};
pub use local::LocalStore;
pub use types::{
    BatchLocator, ContentIdentity, Destination, MediaKind, ObjectLocator, PreparedMedia,
    RemoteMetadata,
};

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Shared handle to a remote source
pub type SharedRemote = Arc<dyn RemoteSource>;

/// Contract the transfer core relies on
///
/// Implementations must tolerate concurrent calls from many units of work.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Size, identity and kind of an object
    async fn get_metadata(&self, locator: &ObjectLocator) -> RemoteResult<RemoteMetadata>;

    /// Fetch `length` bytes starting at `offset`
    async fn fetch_range(
        &self,
        locator: &ObjectLocator,
        offset: u64,
        length: u64,
    ) -> RemoteResult<Bytes>;

    /// Fetch the whole object sequentially (sources without ranged access)
    async fn fetch_whole(&self, locator: &ObjectLocator) -> RemoteResult<Bytes>;

    /// Server-side copy of every batch member, no local materialisation
    async fn copy_batch(&self, batch: &BatchLocator, destination: &Destination)
        -> RemoteResult<()>;

    /// Members of a batch in display order
    async fn list_batch_members(&self, batch: &BatchLocator) -> RemoteResult<Vec<ObjectLocator>>;

    /// Deliver all items as one group, in the given order
    async fn bulk_upload(&self, destination: &Destination, items: &[PreparedMedia])
        -> RemoteResult<()>;

    /// Deliver one item
    async fn upload_single(&self, destination: &Destination, item: &PreparedMedia)
        -> RemoteResult<()>;

    /// Forward a text-only object
    async fn send_text(&self, destination: &Destination, text: &str) -> RemoteResult<()>;
}
