use super::ByteSource;
use crate::errors::{MediaError, MediaResult, StreamError};
use log::info;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// Default read-ahead window for small reads.
pub const DEFAULT_READ_AHEAD: usize = 4096;

struct ReadCache {
    position: u64,
    data: Vec<u8>,
}

/// Shared reader over a [`ByteSource`] used by all demuxers of one input.
///
/// Small reads are served from a read-ahead window. Every byte fetched from
/// the source is accounted, which is how metadata-only access is verified.
pub struct SourceReader {
    source: Arc<dyn ByteSource>,
    size: OnceCell<Option<u64>>,
    cache: Mutex<ReadCache>,
    read_ahead: usize,
    closed: AtomicBool,
    bytes_read: AtomicU64,
    read_count: AtomicU64,
}

impl SourceReader {
    pub fn new(source: Arc<dyn ByteSource>) -> Self {
        Self::with_read_ahead(source, DEFAULT_READ_AHEAD)
    }

    pub fn with_read_ahead(source: Arc<dyn ByteSource>, read_ahead: usize) -> Self {
        Self {
            source,
            size: OnceCell::new(),
            cache: Mutex::new(ReadCache {
                position: 0,
                data: Vec::new(),
            }),
            read_ahead,
            closed: AtomicBool::new(false),
            bytes_read: AtomicU64::new(0),
            read_count: AtomicU64::new(0),
        }
    }

    /// Total size of the source, if known. Probed once.
    pub async fn size(&self) -> MediaResult<Option<u64>> {
        self.ensure_open()?;
        let size = self
            .size
            .get_or_try_init(|| async { self.source.size().await })
            .await?;
        Ok(*size)
    }

    /// Read `[start, end)`. Shorter only at end of stream.
    pub async fn read(&self, start: u64, end: u64) -> MediaResult<Vec<u8>> {
        self.ensure_open()?;
        if end <= start {
            return Ok(Vec::new());
        }
        let count = (end - start) as usize;

        {
            let cache = self.cache.lock().await;
            let cache_end = cache.position + cache.data.len() as u64;
            if start >= cache.position && end <= cache_end {
                let offset = (start - cache.position) as usize;
                return Ok(cache.data[offset..offset + count].to_vec());
            }
        }

        if count > self.read_ahead {
            return self.fetch(start, end).await;
        }

        let mut fetch_end = start + self.read_ahead as u64;
        if let Some(size) = self.size().await? {
            fetch_end = fetch_end.min(size).max(end.min(size));
        }
        let data = self.fetch(start, fetch_end).await?;
        let out = data[..data.len().min(count)].to_vec();
        let mut cache = self.cache.lock().await;
        cache.position = start;
        cache.data = data;
        Ok(out)
    }

    /// Read exactly `len` bytes at `start`, failing on a truncated source.
    pub async fn read_exact(&self, start: u64, len: usize) -> MediaResult<Vec<u8>> {
        let data = self.read(start, start + len as u64).await?;
        if data.len() < len {
            return Err(MediaError::format(format!(
                "unexpected end of data: wanted {} bytes at offset {}, got {}",
                len,
                start,
                data.len()
            )));
        }
        Ok(data)
    }

    async fn fetch(&self, start: u64, end: u64) -> MediaResult<Vec<u8>> {
        let data = self.source.read(start, end).await?;
        self.ensure_open()?;
        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.bytes_read
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(data)
    }

    fn ensure_open(&self) -> MediaResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::new("input has been closed").into());
        }
        Ok(())
    }

    /// Release the source. Pending and later reads fail.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut cache) = self.cache.try_lock() {
            cache.data = Vec::new();
        }
        self.source.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Bytes fetched from the underlying source so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Number of reads issued to the underlying source.
    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    pub fn print_stats(&self) {
        info!("📊 Source Statistics:");
        info!("   🔢 Reads: {}", self.read_count());
        info!("   📥 Total Read: {} bytes", self.bytes_read());
        if let Some(Some(size)) = self.size.get() {
            if *size > 0 {
                let percentage = (self.bytes_read() as f64 / *size as f64) * 100.0;
                info!("   📊 Read: {:.2}% of total source", percentage);
            }
        }
    }
}
