/*!
 * Temporary local artifacts
 *
 * Every file a task downloads lives in a [`LocalArtifact`]. The artifact owns a
 * `tempfile::TempPath`, so the file is removed when the artifact is dropped: on
 * success after upload, on failure, on cancellation and on panic unwinding alike.
 */

use crate::error::{Result, TransferError};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

/// A pre-sized temporary file that deletes itself on drop
#[derive(Debug)]
pub struct LocalArtifact {
    path: TempPath,
    size: u64,
}

impl LocalArtifact {
    /// Create a file of exactly `size` bytes under `dir`.
    ///
    /// The file is extended with `set_len`, leaving it sparse where the filesystem
    /// allows, so concurrent writers can seek anywhere without truncation races.
    pub async fn allocate(dir: &Path, size: u64) -> Result<Self> {
        let dir = dir.to_path_buf();
        let path = tokio::task::spawn_blocking(move || -> std::io::Result<TempPath> {
            std::fs::create_dir_all(&dir)?;
            let file = tempfile::Builder::new()
                .prefix("ferry-")
                .suffix(".part")
                .tempfile_in(&dir)?;
            file.as_file().set_len(size)?;
            Ok(file.into_temp_path())
        })
        .await??;

        debug!(path = %path.display(), size, "Allocated artifact");
        Ok(Self { path, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Write one range: open, seek, write, flush, close.
    ///
    /// Ranges written by different units must be disjoint.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.size {
            return Err(TransferError::SizeMismatch {
                expected: self.size,
                actual: offset + data.len() as u64,
            });
        }

        let mut file = OpenOptions::new().write(true).open(&*self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    /// Check the file on disk still has exactly the allocated size
    pub async fn verify_size(&self) -> Result<()> {
        let actual = tokio::fs::metadata(&*self.path).await?.len();
        if actual != self.size {
            return Err(TransferError::SizeMismatch {
                expected: self.size,
                actual,
            });
        }
        Ok(())
    }

    /// Owned copy of the path, for records that outlive a borrow
    pub fn path_buf(&self) -> PathBuf {
        self.path.to_path_buf()
    }

    /// Remove the file now, reporting failures instead of ignoring them
    pub fn remove(self) -> Result<()> {
        self.path.close()?;
        Ok(())
    }
}
