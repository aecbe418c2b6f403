use super::ByteSource;
use crate::errors::{MediaError, MediaResult, StreamError};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::{
    header::{CONTENT_LENGTH, RANGE},
    Client, StatusCode,
};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::OnceCell;

/// Byte source backed by HTTP range requests
pub struct HttpSource {
    url: String,
    client: Client,
    length: OnceCell<Option<u64>>,
    closed: AtomicBool,
    http_request_count: AtomicU64,
    http_request_bytes_read: AtomicU64,
}

impl HttpSource {
    /// Create a source for `url`. The size is probed lazily with a HEAD request.
    pub fn new(url: impl Into<String>) -> MediaResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| StreamError::new(e.to_string()))?;
        Ok(Self::with_client(url, client))
    }

    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
            length: OnceCell::new(),
            closed: AtomicBool::new(false),
            http_request_count: AtomicU64::new(0),
            http_request_bytes_read: AtomicU64::new(0),
        }
    }

    /// Http request count function.
    pub fn http_request_count(&self) -> u64 {
        self.http_request_count.load(Ordering::Relaxed)
    }

    /// Http request bytes read function.
    pub fn http_request_bytes_read(&self) -> u64 {
        self.http_request_bytes_read.load(Ordering::Relaxed)
    }

    /// Print stats function.
    pub fn print_stats(&self) {
        let bytes = self.http_request_bytes_read();
        info!("📊 Download Statistics:");
        info!("   🔢 HTTP Requests: {}", self.http_request_count());
        info!(
            "   📥 Total Downloaded: {} bytes ({:.2} KB, {:.2} MB)",
            bytes,
            bytes as f64 / 1024.0,
            bytes as f64 / 1024.0 / 1024.0
        );
        if let Some(Some(length)) = self.length.get() {
            let percentage = (bytes as f64 / *length as f64) * 100.0;
            info!("   📊 Downloaded: {:.2}% of total file", percentage);
        }
    }

    async fn content_length(&self) -> MediaResult<Option<u64>> {
        let length = self
            .length
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .head(&self.url)
                    .send()
                    .await
                    .map_err(|e| StreamError::new(e.to_string()))?;

                self.http_request_count.fetch_add(1, Ordering::Relaxed);

                if !response.status().is_success() {
                    return Err(MediaError::Stream(StreamError::new(format!(
                        "HTTP error: {}",
                        response.status()
                    ))));
                }

                let length = response
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());
                if length.is_none() {
                    debug!("{}: Content-Length not available, size unknown", self.url);
                }
                Ok(length)
            })
            .await?;
        Ok(*length)
    }

    async fn get_byte_range(&self, start: u64, end: u64) -> MediaResult<Vec<u8>> {
        let mut end = end;
        if let Some(length) = self.content_length().await? {
            if start >= length {
                return Ok(Vec::new());
            }
            end = end.min(length);
        }
        if end <= start {
            return Ok(Vec::new());
        }

        let range_header = format!("bytes={}-{}", start, end - 1);
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, range_header)
            .send()
            .await
            .map_err(|e| StreamError::new(e.to_string()))?;

        self.http_request_count.fetch_add(1, Ordering::Relaxed);

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(MediaError::Stream(StreamError::new(format!(
                "HTTP error: {}",
                status
            ))));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StreamError::new(e.to_string()))?;

        // A server ignoring the Range header answers 200 with the whole body
        let body = if status == StatusCode::OK && start > 0 {
            bytes.get(start as usize..).unwrap_or_default()
        } else {
            &bytes[..]
        };
        let wanted = (end - start) as usize;
        let out = body[..body.len().min(wanted)].to_vec();
        self.http_request_bytes_read
            .fetch_add(out.len() as u64, Ordering::Relaxed);
        Ok(out)
    }
}

#[async_trait]
impl ByteSource for HttpSource {
    async fn size(&self) -> io::Result<Option<u64>> {
        Ok(self.content_length().await?)
    }

    async fn read(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::new("HTTP source closed").into());
        }
        Ok(self.get_byte_range(start, end).await?)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
