use super::ByteSource;
use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

/// Local file wrapper
pub struct FileSource {
    file: Mutex<Option<File>>,
    length: u64,
    closed: AtomicBool,
}

impl FileSource {
    pub async fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path).await?;
        let length = file.metadata().await?.len();
        Ok(Self {
            file: Mutex::new(Some(file)),
            length,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ByteSource for FileSource {
    async fn size(&self) -> io::Result<Option<u64>> {
        Ok(Some(self.length))
    }

    async fn read(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "file source closed"));
        }
        let end = end.min(self.length);
        if end <= start {
            return Ok(Vec::new());
        }
        let mut guard = self.file.lock().await;
        let file = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file source closed"))?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; (end - start) as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break; // EOF
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut guard) = self.file.try_lock() {
            guard.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FileSource;
    use crate::streams::ByteSource;
    use std::io::Write;

    #[tokio::test]
    async fn test_file_source_reads_ranges_and_fails_after_close() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abcdefghij").unwrap();
        tmp.flush().unwrap();

        let source = FileSource::open(tmp.path()).await.unwrap();
        assert_eq!(source.size().await.unwrap(), Some(10));
        assert_eq!(source.read(3, 6).await.unwrap(), b"def");
        assert_eq!(source.read(7, 100).await.unwrap(), b"hij");

        source.close();
        assert!(source.read(0, 2).await.is_err());
    }
}
