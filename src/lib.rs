pub mod bits;
pub use bits::{BitReader, BitWriter};

pub mod errors;
pub use errors::{
    ConfigurationError, ConversionError, FormatError, MediaError, MediaResult, StreamError,
    UnsupportedError,
};

pub mod streams;
pub use streams::{
    BufferTarget, ByteSource, FileSource, FileTarget, HttpSource, MemorySource, StreamTarget,
    Target, TargetMode,
};

pub mod codec;
pub use codec::Codec;

pub mod track;
pub use track::{DecoderConfig, Track, TrackType};

pub mod packet;
pub use packet::{EncodedPacket, PacketRetrievalOptions, PacketType};

pub mod aac;
pub mod ac3;
pub mod avc;
pub mod decoder_config;
pub mod hevc;
pub mod mpeg_audio;

pub mod demux;
pub use demux::{ContainerFormat, Input, InputOptions, InputTrack, PacketCursor, PacketSink};

pub mod adts;
pub mod matroska;
pub mod mp4;
pub mod mpegts;

pub mod mux;
pub use mux::{MimeTypeHandle, Output, OutputFormat, TrackOptions};

pub mod conversion;
pub use conversion::{Conversion, ConversionOptions, DiscardedTrack, TranscodeBackend};

/// Convert `source` (a path or an http(s) URL) into `format`, written to
/// `target`. Tracks that cannot be carried without a transcoder are
/// discarded and returned.
pub async fn convert(
    source: &str,
    format: OutputFormat,
    target: Box<dyn Target>,
    options: ConversionOptions,
) -> MediaResult<Vec<DiscardedTrack>> {
    let input = Input::open(source).await?;
    let output = Output::new(format, target)?;
    let mut conversion = Conversion::init(&input, output, options, None).await?;
    conversion.execute().await?;
    input.close();
    Ok(conversion.discarded_tracks().to_vec())
}
