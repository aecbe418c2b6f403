pub mod format;
pub mod output;
pub mod writer;

pub use format::{FastStart, MatroskaOptions, Mp4Options, MpegTsOptions, OutputFormat, TrackLimits};
pub use output::{MimeTypeHandle, Output, TrackOptions};
pub use writer::Writer;

use crate::codec::Codec;
use crate::errors::MediaResult;
use crate::packet::EncodedPacket;
use crate::track::{DecoderConfig, TrackType};
use async_trait::async_trait;

/// A track declared on an output
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTrack {
    /// 1-based, in declaration order.
    pub id: u32,
    pub codec: Codec,
    pub language: String,
    /// Clockwise rotation for video tracks.
    pub rotation: u16,
}

impl OutputTrack {
    pub fn track_type(&self) -> TrackType {
        self.codec.track_type()
    }
}

/// Format specific serializer driven by [`Output`].
///
/// Packets arrive interleaved by timestamp. `config` is the decoder config
/// supplied with the track's first packet, if any.
#[async_trait]
pub trait Muxer: Send {
    /// The composition is locked in; headers may be written.
    async fn start(&mut self, tracks: &[OutputTrack]) -> MediaResult<()>;

    async fn add_packet(
        &mut self,
        track: &OutputTrack,
        packet: &EncodedPacket,
        config: Option<&DecoderConfig>,
    ) -> MediaResult<()>;

    /// Write trailers and patch sizes. Tracks that received no packet must
    /// not appear in the output.
    async fn finalize(&mut self) -> MediaResult<()>;

    /// Stop without trailers, flushing what reached the target.
    async fn abort(&mut self) -> MediaResult<()>;
}
