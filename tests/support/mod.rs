//! Scripted in-memory remote for integration tests
//!
//! Serves objects and batches from memory, injects rate-limit signals, failures
//! and delays per operation, and records every call and upload for assertions.
//! Calls in flight are gauged per operation so tests can check concurrency ceilings.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use ferry::config::TransferConfig;
use ferry::remote::{
    BatchLocator, Destination, MediaKind, ObjectLocator, PreparedMedia, RemoteError,
    RemoteMetadata, RemoteResult, RemoteSource,
};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Metadata,
    FetchRange,
    FetchWhole,
    CopyBatch,
    ListMembers,
    BulkUpload,
    UploadSingle,
    SendText,
}

/// One recorded remote call
#[derive(Debug, Clone)]
pub struct Call {
    pub op: Op,
    /// Locator, batch or destination; `locator@offset` for range fetches
    pub key: String,
    pub length: u64,
    pub at: Instant,
}

/// What an upload call saw, read from disk while the call ran
#[derive(Debug, Clone)]
pub struct Upload {
    pub source: ObjectLocator,
    pub caption: Option<String>,
    pub content: Vec<u8>,
    pub path: std::path::PathBuf,
}

type Hook = Box<dyn Fn(&Call) + Send + Sync>;

#[derive(Default)]
struct Script {
    objects: HashMap<ObjectLocator, (RemoteMetadata, Bytes)>,
    batches: HashMap<BatchLocator, Vec<ObjectLocator>>,
    rate_limits: HashMap<(Op, Option<String>), VecDeque<u64>>,
    failures: HashMap<(Op, Option<String>), RemoteError>,
    delays: HashMap<(Op, Option<String>), Duration>,
    calls: Vec<Call>,
    bulk_uploads: Vec<Vec<Upload>>,
    single_uploads: Vec<Upload>,
    texts: Vec<String>,
}

/// Calls of one operation currently inside the remote, and the most seen at once
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

/// Leaves the gauge when the call returns or its future is dropped
struct InFlight(Arc<Gauge>);

impl Gauge {
    fn enter(self: Arc<Self>) -> InFlight {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct ScriptedRemote {
    script: Mutex<Script>,
    hook: Mutex<Option<Hook>>,
    gauges: Mutex<HashMap<Op, Arc<Gauge>>>,
}

/// Deterministic payload of `size` bytes, distinct per `seed`
pub fn payload(size: usize, seed: u8) -> Vec<u8> {
    (0..size)
        .map(|i| ((i % 251) as u8).wrapping_add(seed))
        .collect()
}

/// Test configuration writing temporary files under `dir`
pub fn config_in(dir: &Path) -> TransferConfig {
    TransferConfig {
        download_dir: dir.to_path_buf(),
        item_delay_ms: 0,
        upload_delay_ms: 0,
        progress_interval_ms: 0,
        ..Default::default()
    }
}

/// Files left in a download directory
pub fn leftovers(dir: &Path) -> Vec<std::path::PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Add a media object with the given content and identity
    pub fn with_object(self, locator: &str, data: Vec<u8>, identity: &str) -> Self {
        let meta = RemoteMetadata::media(locator, MediaKind::Video, data.len() as u64, identity)
            .with_caption(format!("caption of {}", locator));
        self.with_metadata(meta, data)
    }

    pub fn with_metadata(self, meta: RemoteMetadata, data: Vec<u8>) -> Self {
        self.script
            .lock()
            .unwrap()
            .objects
            .insert(meta.locator.clone(), (meta, Bytes::from(data)));
        self
    }

    pub fn with_text(self, locator: &str, body: &str) -> Self {
        self.with_metadata(RemoteMetadata::text(locator, body), Vec::new())
    }

    /// Add a batch; members are tagged with the batch
    pub fn with_batch(self, batch: &str, members: &[&str]) -> Self {
        {
            let mut script = self.script.lock().unwrap();
            for member in members {
                if let Some((meta, _)) = script.objects.get_mut(&ObjectLocator::from(*member)) {
                    meta.batch = Some(BatchLocator::from(batch));
                }
            }
            script.batches.insert(
                BatchLocator::from(batch),
                members.iter().map(|m| ObjectLocator::from(*m)).collect(),
            );
        }
        self
    }

    /// Answer the next call matching `op` (and `key`, if given) with a rate-limit signal
    pub fn rate_limit(self, op: Op, key: Option<&str>, wait_secs: u64) -> Self {
        self.script
            .lock()
            .unwrap()
            .rate_limits
            .entry((op, key.map(str::to_string)))
            .or_default()
            .push_back(wait_secs);
        self
    }

    /// Fail every call matching `op` (and `key`, if given)
    pub fn fail(self, op: Op, key: Option<&str>, error: RemoteError) -> Self {
        self.script
            .lock()
            .unwrap()
            .failures
            .insert((op, key.map(str::to_string)), error);
        self
    }

    /// Delay every call matching `op` (and `key`, if given) before answering
    pub fn delay(self, op: Op, key: Option<&str>, delay: Duration) -> Self {
        self.script
            .lock()
            .unwrap()
            .delays
            .insert((op, key.map(str::to_string)), delay);
        self
    }

    /// Run `hook` on every call, after it is recorded
    pub fn on_call(&self, hook: impl Fn(&Call) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Metadata as the remote would report it, without recording a call
    pub fn metadata_of(&self, locator: &str) -> RemoteMetadata {
        self.object(&ObjectLocator::from(locator)).unwrap().0
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, op: Op) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    pub fn count(&self, op: Op, key: &str) -> usize {
        self.calls_to(op).iter().filter(|c| c.key == key).count()
    }

    /// Distinct objects whose bytes were fetched
    pub fn downloaded(&self) -> Vec<String> {
        let mut objects: Vec<String> = self
            .calls()
            .into_iter()
            .filter(|c| matches!(c.op, Op::FetchRange | Op::FetchWhole))
            .map(|c| c.key.split('@').next().unwrap_or_default().to_string())
            .collect();
        objects.sort();
        objects.dedup();
        objects
    }

    pub fn bulk_uploads(&self) -> Vec<Vec<Upload>> {
        self.script.lock().unwrap().bulk_uploads.clone()
    }

    pub fn single_uploads(&self) -> Vec<Upload> {
        self.script.lock().unwrap().single_uploads.clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.script.lock().unwrap().texts.clone()
    }

    /// Most calls of `op` that were ever in flight together
    pub fn peak_in_flight(&self, op: Op) -> usize {
        self.gauge(op).peak.load(Ordering::SeqCst)
    }

    fn gauge(&self, op: Op) -> Arc<Gauge> {
        self.gauges.lock().unwrap().entry(op).or_default().clone()
    }

    fn lookup<T: Clone>(map: &HashMap<(Op, Option<String>), T>, op: Op, key: &str) -> Option<T> {
        map.get(&(op, Some(key.to_string())))
            .or_else(|| map.get(&(op, None)))
            .cloned()
    }

    /// Record the call, then apply delay, rate limit and failure scripting
    async fn enter(&self, op: Op, key: String, length: u64) -> RemoteResult<()> {
        let call = Call {
            op,
            key: key.clone(),
            length,
            at: Instant::now(),
        };
        let _in_flight = self.gauge(op).enter();
        let delay = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(call.clone());
            Self::lookup(&script.delays, op, &key)
        };

        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(&call);
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script.lock().unwrap();
        for slot in [Some(key.clone()), None] {
            if let Some(queue) = script.rate_limits.get_mut(&(op, slot)) {
                if let Some(wait_secs) = queue.pop_front() {
                    return Err(RemoteError::rate_limited(wait_secs));
                }
            }
        }
        match Self::lookup(&script.failures, op, &key) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn object(&self, locator: &ObjectLocator) -> RemoteResult<(RemoteMetadata, Bytes)> {
        self.script
            .lock()
            .unwrap()
            .objects
            .get(locator)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(locator.to_string()))
    }

    fn capture(item: &PreparedMedia) -> Upload {
        Upload {
            source: item.source.clone(),
            caption: item.caption.clone(),
            content: std::fs::read(&item.path).unwrap_or_default(),
            path: item.path.clone(),
        }
    }
}

#[async_trait]
impl RemoteSource for ScriptedRemote {
    async fn get_metadata(&self, locator: &ObjectLocator) -> RemoteResult<RemoteMetadata> {
        self.enter(Op::Metadata, locator.to_string(), 0).await?;
        Ok(self.object(locator)?.0)
    }

    async fn fetch_range(
        &self,
        locator: &ObjectLocator,
        offset: u64,
        length: u64,
    ) -> RemoteResult<Bytes> {
        self.enter(Op::FetchRange, format!("{}@{}", locator, offset), length)
            .await?;
        let (_, data) = self.object(locator)?;
        let end = (offset + length).min(data.len() as u64);
        Ok(data.slice(offset as usize..end as usize))
    }

    async fn fetch_whole(&self, locator: &ObjectLocator) -> RemoteResult<Bytes> {
        self.enter(Op::FetchWhole, locator.to_string(), 0).await?;
        Ok(self.object(locator)?.1)
    }

    async fn copy_batch(&self, batch: &BatchLocator, _destination: &Destination) -> RemoteResult<()> {
        self.enter(Op::CopyBatch, batch.to_string(), 0).await
    }

    async fn list_batch_members(&self, batch: &BatchLocator) -> RemoteResult<Vec<ObjectLocator>> {
        self.enter(Op::ListMembers, batch.to_string(), 0).await?;
        self.script
            .lock()
            .unwrap()
            .batches
            .get(batch)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(batch.to_string()))
    }

    async fn bulk_upload(&self, destination: &Destination, items: &[PreparedMedia]) -> RemoteResult<()> {
        self.enter(Op::BulkUpload, destination.to_string(), items.len() as u64)
            .await?;
        let uploads = items.iter().map(Self::capture).collect();
        self.script.lock().unwrap().bulk_uploads.push(uploads);
        Ok(())
    }

    async fn upload_single(&self, _destination: &Destination, item: &PreparedMedia) -> RemoteResult<()> {
        self.enter(Op::UploadSingle, item.source.to_string(), item.size)
            .await?;
        let upload = Self::capture(item);
        self.script.lock().unwrap().single_uploads.push(upload);
        Ok(())
    }

    async fn send_text(&self, destination: &Destination, text: &str) -> RemoteResult<()> {
        self.enter(Op::SendText, destination.to_string(), text.len() as u64)
            .await?;
        self.script.lock().unwrap().texts.push(text.to_string());
        Ok(())
    }
}
