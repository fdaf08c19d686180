use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// 默认分片大小 4 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Immutable finite byte sequence that can be read by range.
#[async_trait]
pub trait ByteSource: Send + Sync {
    fn total_len(&self) -> u64;

    /// Read the half-open range `[start, end)`
    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes>;
}

fn check_range(start: u64, end: u64, len: u64) -> io::Result<()> {
    if start > end || end > len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("range {}..{} out of bounds for length {}", start, end, len),
        ));
    }
    Ok(())
}

#[async_trait]
impl ByteSource for Bytes {
    fn total_len(&self) -> u64 {
        self.len() as u64
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes> {
        check_range(start, end, self.total_len())?;
        Ok(self.slice(start as usize..end as usize))
    }
}

#[async_trait]
impl ByteSource for Vec<u8> {
    fn total_len(&self) -> u64 {
        self.len() as u64
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes> {
        check_range(start, end, self.total_len())?;
        Ok(Bytes::copy_from_slice(&self[start as usize..end as usize]))
    }
}

/// File on disk, read one range at a time.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        Ok(Self {
            path,
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string())
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn total_len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes> {
        check_range(start, end, self.len)?;

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut buffer = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }
}

/// Half-open byte range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// 分片迭代器
///
/// Walks a source of known length in fixed-size sequential ranges. The
/// cursor never moves backwards except through [`ChunkIterator::reset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkIterator {
    len: u64,
    chunk_size: u64,
    offset: u64,
}

impl ChunkIterator {
    /// Returns `None` for a zero chunk size.
    pub fn new(len: u64, chunk_size: u64) -> Option<Self> {
        if chunk_size == 0 {
            return None;
        }
        Some(Self {
            len,
            chunk_size,
            offset: 0,
        })
    }

    pub fn with_default_size(len: u64) -> Self {
        Self {
            len,
            chunk_size: DEFAULT_CHUNK_SIZE,
            offset: 0,
        }
    }

    pub fn for_source<S: ByteSource + ?Sized>(source: &S, chunk_size: u64) -> Option<Self> {
        Self::new(source.total_len(), chunk_size)
    }

    pub fn next_chunk(&mut self) -> Option<ChunkRange> {
        if !self.has_more() {
            return None;
        }

        let start = self.offset;
        let end = start.saturating_add(self.chunk_size).min(self.len);
        self.offset = end;
        Some(ChunkRange { start, end })
    }

    pub fn has_more(&self) -> bool {
        self.offset < self.len
    }

    /// Fraction of the source already consumed, in `[0, 1]`
    pub fn progress(&self) -> f64 {
        if self.len == 0 {
            return 1.0;
        }
        (self.offset as f64 / self.len as f64).min(1.0)
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Move the cursor to an offset reported by the server, clamped to the length
    pub fn resume_from(&mut self, offset: u64) {
        self.offset = offset.min(self.len);
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Number of chunks still to be produced
    pub fn remaining_chunks(&self) -> u64 {
        let remaining = self.len - self.offset;
        remaining.div_ceil(self.chunk_size)
    }
}

impl Iterator for ChunkIterator {
    type Item = ChunkRange;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining_chunks() as usize;
        (remaining, Some(remaining))
    }
}
