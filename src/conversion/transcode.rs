//! Seam to an external decode/encode capability.

use crate::codec::Codec;
use crate::errors::MediaResult;
use crate::packet::EncodedPacket;
use crate::track::DecoderConfig;
use async_trait::async_trait;

/// Encoded output of a transcoder. The config accompanies the first packet
/// a transcoder produces.
pub type TranscodedPacket = (EncodedPacket, Option<DecoderConfig>);

/// Platform codec capability used when a track cannot be carried over by
/// passthrough or bitstream conversion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscodeBackend: Send + Sync {
    /// Whether `from` can be decoded and re-encoded as `to`.
    fn supports(&self, from: &DecoderConfig, to: Codec) -> bool;

    async fn open(&self, source: &DecoderConfig, target: Codec) -> MediaResult<Box<dyn TrackTranscoder>>;
}

/// Decode/encode session for one track.
#[async_trait]
pub trait TrackTranscoder: Send {
    /// Feed one source packet in decode order.
    async fn push(&mut self, packet: EncodedPacket) -> MediaResult<Vec<TranscodedPacket>>;

    /// Drain packets still buffered at the end of the track.
    async fn flush(&mut self) -> MediaResult<Vec<TranscodedPacket>>;
}
