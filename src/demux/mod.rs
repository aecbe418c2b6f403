pub mod index;
pub mod input;
pub mod sink;

pub use index::{ChunkScanner, IndexEntry, PacketIndex, PacketLocation, ScanBatch};
pub use input::{Input, InputOptions, InputTrack, PacketStats};
pub use sink::{PacketCursor, PacketSink};

use crate::errors::{MediaError, MediaResult};
use crate::mpegts::{SYNC_BYTE, TS_PACKET_SIZE};
use crate::packet::{EncodedPacket, PacketRetrievalOptions};
use crate::streams::SourceReader;
use crate::track::{DecoderConfig, Track};
use async_trait::async_trait;
use serde::Serialize;

/// Containers the engine can read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ContainerFormat {
    Mp4,
    Mov,
    ThreeGp,
    Matroska,
    WebM,
    MpegTs,
    Adts,
}

impl ContainerFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "MP4",
            ContainerFormat::Mov => "MOV",
            ContainerFormat::ThreeGp => "3GP",
            ContainerFormat::Matroska => "Matroska",
            ContainerFormat::WebM => "WebM",
            ContainerFormat::MpegTs => "MPEG-TS",
            ContainerFormat::Adts => "ADTS",
        }
    }

    pub fn is_mp4_family(&self) -> bool {
        matches!(
            self,
            ContainerFormat::Mp4 | ContainerFormat::Mov | ContainerFormat::ThreeGp
        )
    }

    /// Mime type without codec parameters.
    pub fn base_mime_type(&self, has_video: bool) -> &'static str {
        match (self, has_video) {
            (ContainerFormat::Mp4, true) => "video/mp4",
            (ContainerFormat::Mp4, false) => "audio/mp4",
            (ContainerFormat::Mov, _) => "video/quicktime",
            (ContainerFormat::ThreeGp, true) => "video/3gpp",
            (ContainerFormat::ThreeGp, false) => "audio/3gpp",
            (ContainerFormat::Matroska, true) => "video/x-matroska",
            (ContainerFormat::Matroska, false) => "audio/x-matroska",
            (ContainerFormat::WebM, true) => "video/webm",
            (ContainerFormat::WebM, false) => "audio/webm",
            (ContainerFormat::MpegTs, _) => "video/MP2T",
            (ContainerFormat::Adts, _) => "audio/aac",
        }
    }
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Timestamp-addressed packet queries of one demuxer.
///
/// Queries outside the data return `Ok(None)`. Sequence numbers are those of
/// packets previously returned for the same track.
#[async_trait]
pub trait PacketLookup: Send + Sync {
    async fn first_packet(
        &self,
        track_id: u32,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>>;

    /// The packet whose validity interval contains `timestamp`.
    async fn packet_at(
        &self,
        track_id: u32,
        timestamp: f64,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>>;

    async fn next_packet(
        &self,
        track_id: u32,
        sequence_number: i64,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>>;

    /// The last key packet at or before `timestamp`.
    async fn key_packet_at(
        &self,
        track_id: u32,
        timestamp: f64,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>>;

    async fn next_key_packet(
        &self,
        track_id: u32,
        sequence_number: i64,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>>;
}

/// A container parser opened over a [`SourceReader`]
#[async_trait]
pub trait Demuxer: Send + Sync {
    fn format(&self) -> ContainerFormat;

    /// Tracks discovered at open, in container order.
    fn tracks(&self) -> &[Track];

    async fn decoder_config(&self, track_id: u32) -> MediaResult<Option<DecoderConfig>>;

    fn packets(&self) -> &dyn PacketLookup;
}

const SNIFF_SIZE: u64 = 4096;
const M2TS_PACKET_SIZE: usize = 192;

/// Identify the container from its leading bytes.
pub async fn sniff_format(reader: &SourceReader) -> MediaResult<ContainerFormat> {
    let head = reader.read(0, SNIFF_SIZE).await?;
    if head.len() < 4 {
        return Err(MediaError::format("input too short to identify"));
    }

    if head[..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        return match crate::matroska::ebml::read_doc_type(&head).as_deref() {
            Some("webm") => Ok(ContainerFormat::WebM),
            Some("matroska") | None => Ok(ContainerFormat::Matroska),
            Some(other) => Err(MediaError::format(format!(
                "unknown EBML document type: {}",
                other
            ))),
        };
    }

    if head.len() >= 12 {
        let box_type = &head[4..8];
        if box_type == b"ftyp" {
            return Ok(match &head[8..12] {
                b"qt  " => ContainerFormat::Mov,
                brand if brand.starts_with(b"3g") => ContainerFormat::ThreeGp,
                _ => ContainerFormat::Mp4,
            });
        }
        if [b"moov", b"mdat", b"free", b"skip", b"wide", b"pnot"]
            .iter()
            .any(|name| box_type == *name)
        {
            return Ok(ContainerFormat::Mp4);
        }
    }

    if is_transport_stream(&head, TS_PACKET_SIZE, 0) || is_transport_stream(&head, M2TS_PACKET_SIZE, 4) {
        return Ok(ContainerFormat::MpegTs);
    }

    let audio_start = id3v2_tag_size(&head).unwrap_or(0);
    let sync = reader.read(audio_start, audio_start + 2).await?;
    if sync.len() == 2 && sync[0] == 0xFF && sync[1] & 0xF6 == 0xF0 {
        return Ok(ContainerFormat::Adts);
    }

    Err(MediaError::format("unrecognized container signature"))
}

/// At least one whole packet, and a sync byte at every packet start seen.
fn is_transport_stream(head: &[u8], packet_size: usize, sync_offset: usize) -> bool {
    if head.len() < packet_size {
        return false;
    }
    (0..3)
        .map(|i| sync_offset + i * packet_size)
        .take_while(|p| *p < head.len())
        .all(|p| head[p] == SYNC_BYTE)
}

/// Size of a leading ID3v2 tag including header and optional footer.
pub fn id3v2_tag_size(data: &[u8]) -> Option<u64> {
    if data.len() < 10 || &data[..3] != b"ID3" {
        return None;
    }
    let size = data[6..10]
        .iter()
        .fold(0u64, |acc, b| (acc << 7) | (*b & 0x7F) as u64);
    let footer = if data[5] & 0x10 != 0 { 10 } else { 0 };
    Some(10 + size + footer)
}

/// Open the demuxer for a sniffed format.
pub async fn open_demuxer(
    reader: std::sync::Arc<SourceReader>,
    format: ContainerFormat,
    options: &InputOptions,
) -> MediaResult<Box<dyn Demuxer>> {
    let demuxer: Box<dyn Demuxer> = match format {
        ContainerFormat::Mp4 | ContainerFormat::Mov | ContainerFormat::ThreeGp => {
            Box::new(crate::mp4::Mp4Demuxer::open(reader, format).await?)
        }
        ContainerFormat::Matroska | ContainerFormat::WebM => {
            Box::new(crate::matroska::MatroskaDemuxer::open(reader, format).await?)
        }
        ContainerFormat::MpegTs => {
            Box::new(crate::mpegts::TsDemuxer::open(reader, options.seek_chunk_size).await?)
        }
        ContainerFormat::Adts => {
            Box::new(crate::adts::AdtsDemuxer::open(reader, options.seek_chunk_size).await?)
        }
    };
    Ok(demuxer)
}
