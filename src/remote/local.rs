//! Directory-backed remote source
//!
//! Maps the remote model onto two local directories:
//!
//! - objects are files under the source root, addressed by their `/`-separated
//!   relative path (`album/01.jpg`)
//! - a batch is a subdirectory; its members are the files inside it, in name order
//! - content identity is the BLAKE3 digest of the file
//! - `<file>.caption` sidecars hold captions, `.txt` files are text-only objects
//! - deliveries land under `<destination root>/<destination>/`
//!
//! Server-side copy can be switched off to force the download/reassemble/upload path.

use super::error::{RemoteError, RemoteResult};
use super::types::{
    BatchLocator, ContentIdentity, Destination, MediaKind, ObjectLocator, PreparedMedia,
    RemoteMetadata,
};
use super::RemoteSource;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

const CAPTION_SUFFIX: &str = ".caption";

/// Remote source over a local directory tree
#[derive(Debug, Clone)]
pub struct LocalStore {
    source_root: PathBuf,
    dest_root: PathBuf,
    direct_copy: bool,
    ranged: bool,
}

impl LocalStore {
    /// Create a store reading from `source_root` and delivering into `dest_root`
    pub fn new<S: Into<PathBuf>, D: Into<PathBuf>>(source_root: S, dest_root: D) -> Self {
        Self {
            source_root: source_root.into(),
            dest_root: dest_root.into(),
            direct_copy: true,
            ranged: true,
        }
    }

    /// Enable or disable server-side batch copy
    pub fn with_direct_copy(mut self, enabled: bool) -> Self {
        self.direct_copy = enabled;
        self
    }

    /// Advertise ranged access (disable to exercise whole-object fetches)
    pub fn with_ranged(mut self, ranged: bool) -> Self {
        self.ranged = ranged;
        self
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn dest_root(&self) -> &Path {
        &self.dest_root
    }

    /// Every object under `prefix` (or the whole source root), in path order
    pub async fn list_objects(&self, prefix: Option<&str>) -> RemoteResult<Vec<ObjectLocator>> {
        let start = match prefix {
            Some(p) => self.resolve(&self.source_root, p)?,
            None => self.source_root.clone(),
        };

        let mut found = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if !is_sidecar(&path) {
                    found.push(self.locator_for(&path)?);
                }
            }
        }

        found.sort();
        Ok(found)
    }

    fn resolve(&self, root: &Path, relative: &str) -> RemoteResult<PathBuf> {
        let mut path = root.to_path_buf();
        for part in relative.split('/').filter(|p| !p.is_empty()) {
            match Path::new(part).components().next() {
                Some(Component::Normal(_)) => path.push(part),
                _ => {
                    return Err(RemoteError::Malformed(format!(
                        "locator escapes its root: {}",
                        relative
                    )))
                }
            }
        }
        Ok(path)
    }

    fn locator_for(&self, path: &Path) -> RemoteResult<ObjectLocator> {
        let relative = path.strip_prefix(&self.source_root).map_err(|_| {
            RemoteError::Malformed(format!("{} is outside the source root", path.display()))
        })?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(ObjectLocator::new(parts.join("/")))
    }

    async fn destination_dir(&self, destination: &Destination) -> RemoteResult<PathBuf> {
        let dir = self.resolve(&self.dest_root, destination.as_str())?;
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn deliver(&self, dir: &Path, item: &PreparedMedia) -> RemoteResult<()> {
        let target = dir.join(&item.file_name);
        fs::copy(&item.path, &target).await?;
        if let Some(caption) = &item.caption {
            fs::write(sidecar_path(&target), caption).await?;
        }
        debug!(file = %target.display(), kind = %item.kind, "Delivered item");
        Ok(())
    }
}

fn is_sidecar(path: &Path) -> bool {
    path.to_string_lossy().ends_with(CAPTION_SUFFIX)
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(CAPTION_SUFFIX);
    PathBuf::from(name)
}

fn kind_for(path: &Path) -> MediaKind {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "webp" | "gif" | "heic" => MediaKind::Photo,
        "mp4" | "mkv" | "mov" | "webm" | "avi" => MediaKind::Video,
        "mp3" | "ogg" | "oga" | "flac" | "m4a" | "wav" | "opus" => MediaKind::Audio,
        "txt" => MediaKind::Text,
        _ => MediaKind::Document,
    }
}

async fn digest(path: &Path) -> RemoteResult<ContentIdentity> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(ContentIdentity::new(hasher.finalize().to_hex().to_string()))
}

async fn read_caption(path: &Path) -> Option<String> {
    match fs::read_to_string(sidecar_path(path)).await {
        Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

#[async_trait]
impl RemoteSource for LocalStore {
    async fn get_metadata(&self, locator: &ObjectLocator) -> RemoteResult<RemoteMetadata> {
        let path = self.resolve(&self.source_root, locator.as_str())?;
        let meta = fs::metadata(&path).await?;
        if meta.is_dir() {
            return Err(RemoteError::Malformed(format!(
                "{} is a batch, not an object",
                locator
            )));
        }

        let batch = locator
            .as_str()
            .rsplit_once('/')
            .map(|(parent, _)| BatchLocator::new(parent));
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());

        let kind = kind_for(&path);
        let mut metadata = if kind == MediaKind::Text {
            let body = fs::read_to_string(&path).await?;
            if body.trim().is_empty() {
                let mut empty = RemoteMetadata::text(locator.clone(), "");
                empty.kind = MediaKind::None;
                empty.text = None;
                empty
            } else {
                RemoteMetadata::text(locator.clone(), body)
            }
        } else {
            RemoteMetadata::media(locator.clone(), kind, meta.len(), digest(&path).await?)
                .with_ranged(self.ranged)
        };

        metadata.caption = read_caption(&path).await;
        metadata.file_name = file_name;
        metadata.batch = batch;
        Ok(metadata)
    }

    async fn fetch_range(
        &self,
        locator: &ObjectLocator,
        offset: u64,
        length: u64,
    ) -> RemoteResult<Bytes> {
        if !self.ranged {
            return Err(RemoteError::Unsupported("ranged fetch".to_string()));
        }

        let path = self.resolve(&self.source_root, locator.as_str())?;
        let mut file = fs::File::open(&path).await?;
        let size = file.metadata().await?.len();
        if offset.saturating_add(length) > size {
            return Err(RemoteError::Malformed(format!(
                "range {}+{} beyond {} bytes of {}",
                offset, length, size, locator
            )));
        }

        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn fetch_whole(&self, locator: &ObjectLocator) -> RemoteResult<Bytes> {
        let path = self.resolve(&self.source_root, locator.as_str())?;
        Ok(Bytes::from(fs::read(&path).await?))
    }

    async fn copy_batch(
        &self,
        batch: &BatchLocator,
        destination: &Destination,
    ) -> RemoteResult<()> {
        if !self.direct_copy {
            return Err(RemoteError::Unsupported(
                "direct copy disabled for this store".to_string(),
            ));
        }

        let members = self.list_batch_members(batch).await?;
        let dir = self.destination_dir(destination).await?;
        for member in &members {
            let path = self.resolve(&self.source_root, member.as_str())?;
            let Some(name) = path.file_name() else {
                continue;
            };
            let target = dir.join(name);
            fs::copy(&path, &target).await?;
            if let Some(caption) = read_caption(&path).await {
                fs::write(sidecar_path(&target), caption).await?;
            }
        }

        debug!(batch = %batch, members = members.len(), "Copied batch server-side");
        Ok(())
    }

    async fn list_batch_members(&self, batch: &BatchLocator) -> RemoteResult<Vec<ObjectLocator>> {
        let dir = self.resolve(&self.source_root, batch.as_str())?;
        if !fs::metadata(&dir).await?.is_dir() {
            return Err(RemoteError::NotFound(format!("batch {}", batch)));
        }

        let mut members = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && !is_sidecar(&path) {
                members.push(self.locator_for(&path)?);
            }
        }

        members.sort();
        Ok(members)
    }

    async fn bulk_upload(
        &self,
        destination: &Destination,
        items: &[PreparedMedia],
    ) -> RemoteResult<()> {
        let dir = self.destination_dir(destination).await?;
        for item in items {
            self.deliver(&dir, item).await?;
        }
        Ok(())
    }

    async fn upload_single(
        &self,
        destination: &Destination,
        item: &PreparedMedia,
    ) -> RemoteResult<()> {
        let dir = self.destination_dir(destination).await?;
        self.deliver(&dir, item).await
    }

    async fn send_text(&self, destination: &Destination, text: &str) -> RemoteResult<()> {
        let dir = self.destination_dir(destination).await?;
        let hash = blake3::hash(text.as_bytes()).to_hex();
        let target = dir.join(format!("text-{}.txt", &hash.as_str()[..12]));
        fs::write(&target, text).await?;
        Ok(())
    }
}
