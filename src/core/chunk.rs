/*!
 * Chunk planning for ranged downloads
 *
 * An object of `total_size` bytes is split into `ceil(total_size / chunk_size)`
 * disjoint, contiguous ranges. Every range but the last is exactly `chunk_size`
 * long; the last one holds the remainder (or a full chunk when the size divides
 * evenly). No range ever starts at or past `total_size`. A plan holds at most
 * [`MAX_CHUNKS`] ranges.
 */

use crate::error::{Result, TransferError};

/// Upper bound on ranges per object (4 TiB at the default 4 MiB chunk size)
pub const MAX_CHUNKS: u64 = 1 << 20;

/// One byte range of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
}

impl ChunkRange {
    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Ordered ranges covering `[0, total_size)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    total_size: u64,
    chunk_size: u64,
    ranges: Vec<ChunkRange>,
}

impl ChunkPlan {
    pub fn new(total_size: u64, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(TransferError::Config(
                "chunk size must be at least 1 byte".to_string(),
            ));
        }

        let count = Self::count_for(total_size, chunk_size);
        if count > MAX_CHUNKS {
            return Err(TransferError::TooManyChunks {
                chunks: count,
                limit: MAX_CHUNKS,
            });
        }
        let mut ranges = Vec::with_capacity(count as usize);
        let mut offset = 0u64;
        let mut index = 0usize;

        while offset < total_size {
            let length = chunk_size.min(total_size - offset);
            ranges.push(ChunkRange {
                index,
                offset,
                length,
            });
            offset += length;
            index += 1;
        }

        debug_assert_eq!(ranges.len() as u64, count);
        Ok(Self {
            total_size,
            chunk_size,
            ranges,
        })
    }

    /// Number of chunks for an object: `ceil(total_size / chunk_size)`
    pub fn count_for(total_size: u64, chunk_size: u64) -> u64 {
        total_size.div_ceil(chunk_size)
    }

    pub fn ranges(&self) -> &[ChunkRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}
