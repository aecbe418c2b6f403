use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// How a target accepts write positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    /// Any position may be written, including patches behind the end.
    RandomAccess,
    /// Writes must be contiguous and in order.
    Sequential,
}

/// Destination for muxed bytes
#[async_trait]
pub trait Target: Send {
    fn mode(&self) -> TargetMode;

    /// Write `data` at `position`.
    async fn write(&mut self, data: &[u8], position: u64) -> io::Result<()>;

    /// Flush and release the destination.
    async fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Growable in-memory target. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct BufferTarget {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl BufferTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the bytes written so far.
    pub async fn bytes(&self) -> Vec<u8> {
        self.buffer.lock().await.clone()
    }
}

#[async_trait]
impl Target for BufferTarget {
    fn mode(&self) -> TargetMode {
        TargetMode::RandomAccess
    }

    async fn write(&mut self, data: &[u8], position: u64) -> io::Result<()> {
        let mut buffer = self.buffer.lock().await;
        let start = position as usize;
        let end = start + data.len();
        if buffer.len() < end {
            buffer.resize(end, 0);
        }
        buffer[start..end].copy_from_slice(data);
        Ok(())
    }
}

/// Local file target with random access
pub struct FileTarget {
    file: File,
}

impl FileTarget {
    pub async fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self {
            file: File::create(path).await?,
        })
    }
}

#[async_trait]
impl Target for FileTarget {
    fn mode(&self) -> TargetMode {
        TargetMode::RandomAccess
    }

    async fn write(&mut self, data: &[u8], position: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(position)).await?;
        self.file.write_all(data).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

/// Sequential target over any async writer (pipes, sockets, chunked uploads)
pub struct StreamTarget<W> {
    writer: W,
    position: u64,
}

impl<W: AsyncWrite + Unpin + Send> StreamTarget<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            position: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Target for StreamTarget<W> {
    fn mode(&self) -> TargetMode {
        TargetMode::Sequential
    }

    async fn write(&mut self, data: &[u8], position: u64) -> io::Result<()> {
        if position != self.position {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "sequential target expected write at {}, got {}",
                    self.position, position
                ),
            ));
        }
        self.writer.write_all(data).await?;
        self.position += data.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buffer_target_patches_and_extends() {
        let target = BufferTarget::new();
        let mut writer = target.clone();
        writer.write(b"hello", 0).await.unwrap();
        writer.write(b"J", 0).await.unwrap();
        writer.write(b"!", 7).await.unwrap();
        assert_eq!(target.bytes().await, b"Jello\0\0!");
    }

    #[tokio::test]
    async fn test_stream_target_rejects_non_monotonic_positions() {
        let mut target = StreamTarget::new(Vec::new());
        assert_eq!(target.mode(), TargetMode::Sequential);
        target.write(b"abc", 0).await.unwrap();
        target.write(b"def", 3).await.unwrap();
        assert!(target.write(b"x", 1).await.is_err());
        assert!(target.write(b"x", 10).await.is_err());
        assert_eq!(target.into_inner(), b"abcdef");
    }

    #[tokio::test]
    async fn test_file_target_writes_at_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut target = FileTarget::create(&path).await.unwrap();
        target.write(b"world", 6).await.unwrap();
        target.write(b"hello ", 0).await.unwrap();
        target.finish().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }
}
