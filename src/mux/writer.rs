use crate::errors::{MediaError, MediaResult};
use crate::streams::{Target, TargetMode};

/// Position-tracking front of a [`Target`]
pub struct Writer {
    target: Box<dyn Target>,
    position: u64,
    written: u64,
}

impl Writer {
    pub fn new(target: Box<dyn Target>) -> Self {
        Self {
            target,
            position: 0,
            written: 0,
        }
    }

    pub fn mode(&self) -> TargetMode {
        self.target.mode()
    }

    /// Offset of the next appended byte.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes handed to the target, patches included.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Append at the current position.
    pub async fn write(&mut self, data: &[u8]) -> MediaResult<()> {
        self.target.write(data, self.position).await?;
        self.position += data.len() as u64;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Overwrite bytes already written. Only random-access targets allow it.
    pub async fn patch(&mut self, data: &[u8], position: u64) -> MediaResult<()> {
        if self.mode() != TargetMode::RandomAccess {
            return Err(MediaError::stream("cannot patch a sequential target"));
        }
        if position + data.len() as u64 > self.position {
            return Err(MediaError::stream(format!(
                "patch at {} extends past the written end {}",
                position, self.position
            )));
        }
        self.target.write(data, position).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    pub async fn finish(&mut self) -> MediaResult<()> {
        self.target.finish().await?;
        Ok(())
    }
}
