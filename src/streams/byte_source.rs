use async_trait::async_trait;
use std::io;
use std::sync::Arc;

/// Random-access byte provider used by every demuxer.
///
/// `read` is end-exclusive and returns fewer bytes than requested only when the
/// range crosses the end of the stream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Total size in bytes, if the transport knows it.
    async fn size(&self) -> io::Result<Option<u64>>;

    /// Read the bytes in `[start, end)`.
    async fn read(&self, start: u64, end: u64) -> io::Result<Vec<u8>>;

    /// Release transport handles. Reads after close must fail.
    fn close(&self) {}
}

/// In-memory source over a shared buffer
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<Vec<u8>>,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::new(data.into()),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn size(&self) -> io::Result<Option<u64>> {
        Ok(Some(self.data.len() as u64))
    }

    async fn read(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let len = self.data.len() as u64;
        let start = start.min(len) as usize;
        let end = end.min(len) as usize;
        if end <= start {
            return Ok(Vec::new());
        }
        Ok(self.data[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::{ByteSource, MemorySource};

    #[tokio::test]
    async fn test_memory_source_short_read_at_end() {
        let source = MemorySource::new(b"0123456789".to_vec());
        assert_eq!(source.size().await.unwrap(), Some(10));
        assert_eq!(source.read(2, 5).await.unwrap(), b"234");
        assert_eq!(source.read(8, 20).await.unwrap(), b"89");
        assert!(source.read(12, 20).await.unwrap().is_empty());
    }
}
