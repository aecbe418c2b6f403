use super::sink::PacketSink;
use super::{open_demuxer, sniff_format, ContainerFormat, Demuxer};
use crate::codec::{compose_mime_type, Codec};
use crate::errors::{MediaError, MediaResult};
use crate::packet::PacketRetrievalOptions;
use crate::streams::source_reader::DEFAULT_READ_AHEAD;
use crate::streams::{ByteSource, FileSource, HttpSource, MemorySource, SourceReader};
use crate::track::{DecoderConfig, Track, TrackType};
use log::debug;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Options for opening an input
#[derive(Debug, Clone)]
pub struct InputOptions {
    /// Bytes parsed per step when extending the index of formats without one.
    pub seek_chunk_size: u64,
    pub read_ahead: usize,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            seek_chunk_size: 1 << 20,
            read_ahead: DEFAULT_READ_AHEAD,
        }
    }
}

/// A media file opened for reading. The container is identified on first use.
pub struct Input {
    reader: Arc<SourceReader>,
    options: InputOptions,
    demuxer: OnceCell<Arc<dyn Demuxer>>,
}

impl Input {
    pub fn new(source: Arc<dyn ByteSource>, options: InputOptions) -> Self {
        Self {
            reader: Arc::new(SourceReader::with_read_ahead(source, options.read_ahead)),
            options,
            demuxer: OnceCell::new(),
        }
    }

    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::new(Arc::new(MemorySource::new(data)), InputOptions::default())
    }

    pub async fn open_file<P: AsRef<Path>>(path: P) -> MediaResult<Self> {
        let source = FileSource::open(path).await?;
        Ok(Self::new(Arc::new(source), InputOptions::default()))
    }

    pub fn open_url(url: impl Into<String>) -> MediaResult<Self> {
        let source = HttpSource::new(url)?;
        Ok(Self::new(Arc::new(source), InputOptions::default()))
    }

    /// Open a local path or an `http(s)://` URL.
    pub async fn open(source: &str) -> MediaResult<Self> {
        if source.starts_with("http://") || source.starts_with("https://") {
            Self::open_url(source)
        } else {
            Self::open_file(source).await
        }
    }

    async fn demuxer(&self) -> MediaResult<Arc<dyn Demuxer>> {
        let demuxer = self
            .demuxer
            .get_or_try_init(|| async {
                let format = sniff_format(&self.reader).await?;
                debug!("detected {} input", format.name());
                let demuxer = open_demuxer(self.reader.clone(), format, &self.options).await?;
                Ok::<_, MediaError>(Arc::from(demuxer))
            })
            .await?;
        Ok(demuxer.clone())
    }

    pub async fn format(&self) -> MediaResult<ContainerFormat> {
        Ok(self.demuxer().await?.format())
    }

    pub async fn tracks(&self) -> MediaResult<Vec<InputTrack>> {
        let demuxer = self.demuxer().await?;
        Ok(demuxer
            .tracks()
            .iter()
            .map(|track| InputTrack {
                track: track.clone(),
                demuxer: demuxer.clone(),
            })
            .collect())
    }

    pub async fn video_tracks(&self) -> MediaResult<Vec<InputTrack>> {
        self.tracks_of(TrackType::Video).await
    }

    pub async fn audio_tracks(&self) -> MediaResult<Vec<InputTrack>> {
        self.tracks_of(TrackType::Audio).await
    }

    async fn tracks_of(&self, track_type: TrackType) -> MediaResult<Vec<InputTrack>> {
        Ok(self
            .tracks()
            .await?
            .into_iter()
            .filter(|t| t.track_type() == track_type)
            .collect())
    }

    pub async fn primary_video_track(&self) -> MediaResult<Option<InputTrack>> {
        Ok(self.video_tracks().await?.into_iter().next())
    }

    pub async fn primary_audio_track(&self) -> MediaResult<Option<InputTrack>> {
        Ok(self.audio_tracks().await?.into_iter().next())
    }

    /// End of the longest track in seconds.
    pub async fn compute_duration(&self) -> MediaResult<f64> {
        let mut duration: f64 = 0.0;
        for track in self.tracks().await? {
            duration = duration.max(track.compute_duration().await?);
        }
        Ok(duration)
    }

    /// Mime type with the codec strings of every track whose codec is known.
    pub async fn mime_type(&self) -> MediaResult<String> {
        let format = self.format().await?;
        let tracks = self.tracks().await?;
        let has_video = tracks.iter().any(|t| t.track_type() == TrackType::Video);
        let mut codecs = Vec::new();
        for track in &tracks {
            if let Some(config) = track.decoder_config().await? {
                codecs.push(config.codec().to_string());
            }
        }
        Ok(compose_mime_type(format.base_mime_type(has_video), &codecs))
    }

    pub fn bytes_read(&self) -> u64 {
        self.reader.bytes_read()
    }

    pub fn print_stats(&self) {
        self.reader.print_stats();
    }

    /// Release the source. Queries on this input or its tracks fail afterwards.
    pub fn close(&self) {
        self.reader.close();
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_closed()
    }
}

impl Drop for Input {
    fn drop(&mut self) {
        self.reader.close();
    }
}

/// Packet statistics of a track
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PacketStats {
    pub packet_count: usize,
    /// Packets per second.
    pub average_packet_rate: f64,
    /// Bits per second.
    pub average_bitrate: f64,
}

/// One track of an [`Input`]
#[derive(Clone)]
pub struct InputTrack {
    track: Track,
    demuxer: Arc<dyn Demuxer>,
}

impl InputTrack {
    pub fn id(&self) -> u32 {
        self.track.id
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn track_type(&self) -> TrackType {
        self.track.track_type
    }

    pub fn codec(&self) -> Option<Codec> {
        self.track.codec
    }

    pub fn language(&self) -> &str {
        &self.track.language
    }

    pub fn container_format(&self) -> ContainerFormat {
        self.demuxer.format()
    }

    pub async fn decoder_config(&self) -> MediaResult<Option<DecoderConfig>> {
        self.demuxer.decoder_config(self.track.id).await
    }

    pub async fn codec_string(&self) -> MediaResult<Option<String>> {
        Ok(self
            .decoder_config()
            .await?
            .map(|config| config.codec().to_string()))
    }

    pub fn packet_sink(&self) -> PacketSink {
        PacketSink::new(self.demuxer.clone(), self.track.id)
    }

    /// Timestamp of the first packet, 0 for an empty track.
    pub async fn first_timestamp(&self) -> MediaResult<f64> {
        Ok(self
            .packet_sink()
            .get_first_packet(PacketRetrievalOptions::metadata_only())
            .await?
            .map_or(0.0, |p| p.timestamp))
    }

    /// End of the last packet in seconds.
    pub async fn compute_duration(&self) -> MediaResult<f64> {
        Ok(self
            .packet_sink()
            .get_packet(f64::INFINITY, PacketRetrievalOptions::metadata_only())
            .await?
            .map_or(0.0, |p| p.end_timestamp()))
    }

    /// Walk up to `limit` packets (all when `None`) without reading payloads.
    pub async fn compute_packet_stats(&self, limit: Option<usize>) -> MediaResult<PacketStats> {
        let mut cursor = self
            .packet_sink()
            .packets(PacketRetrievalOptions::metadata_only());
        let mut count = 0usize;
        let mut bytes = 0u64;
        let mut start = f64::INFINITY;
        let mut end = f64::NEG_INFINITY;
        while limit.map_or(true, |limit| count < limit) {
            let Some(packet) = cursor.next().await? else {
                break;
            };
            count += 1;
            bytes += packet.byte_length as u64;
            start = start.min(packet.timestamp);
            end = end.max(packet.end_timestamp());
        }
        let span = end - start;
        if count == 0 || span <= 0.0 {
            return Ok(PacketStats {
                packet_count: count,
                average_packet_rate: 0.0,
                average_bitrate: 0.0,
            });
        }
        Ok(PacketStats {
            packet_count: count,
            average_packet_rate: count as f64 / span,
            average_bitrate: bytes as f64 * 8.0 / span,
        })
    }
}
