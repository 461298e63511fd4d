//! Chunk splitting, reading and checksums.
//!
//! A [`ChunkPlan`] partitions a file of a known size into ordered,
//! non-overlapping byte ranges of a fixed size. The plan holds no state
//! beyond the two sizes, so any chunk can be regenerated from its index,
//! which is what lets a paused upload pick up where it stopped.

use std::ops::Range;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{Error, Result};

/// Partition of a file into fixed-size chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    /// Create a plan for a file of `file_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `chunk_size` is zero.
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfig {
                key: "chunk_size".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(Self {
            file_size,
            chunk_size,
        })
    }

    /// Total file size in bytes.
    #[must_use]
    pub const fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Chunk size in bytes.
    #[must_use]
    pub const fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Number of chunks, `ceil(file_size / chunk_size)`.
    #[must_use]
    pub const fn total_chunks(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size)
    }

    /// Byte range of the chunk at `index`, or `None` past the end.
    #[must_use]
    pub fn range(&self, index: u64) -> Option<Range<u64>> {
        if index >= self.total_chunks() {
            return None;
        }
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.file_size);
        Some(start..end)
    }

    /// Length of the chunk at `index`, zero past the end.
    #[must_use]
    pub fn chunk_len(&self, index: u64) -> u64 {
        self.range(index).map_or(0, |r| r.end - r.start)
    }

    /// Iterate over every chunk range in order.
    pub fn ranges(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        (0..self.total_chunks()).filter_map(move |i| self.range(i))
    }
}

/// Read the bytes of chunk `index` from the file at `path`.
///
/// # Errors
///
/// Returns an error if the index is outside the plan or the file cannot be
/// read to the end of the range.
pub async fn read_chunk(path: &Path, plan: &ChunkPlan, index: u64) -> Result<Vec<u8>> {
    let range = plan.range(index).ok_or_else(|| {
        Error::InvalidChunk(format!(
            "chunk index {index} out of range for {} chunks",
            plan.total_chunks()
        ))
    })?;

    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(range.start)).await?;

    let mut buffer = vec![0u8; (range.end - range.start) as usize];
    file.read_exact(&mut buffer).await?;

    Ok(buffer)
}

/// Compute the checksum sent alongside a chunk: lowercase hex SHA-256.
#[must_use]
pub fn chunk_checksum(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Check `data` against a checksum supplied by the client.
///
/// Comparison ignores ASCII case and surrounding whitespace.
#[must_use]
pub fn verify_checksum(data: &[u8], expected: &str) -> bool {
    chunk_checksum(data).eq_ignore_ascii_case(expected.trim())
}
