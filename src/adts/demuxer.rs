use crate::aac::adts::ADTS_HEADER_SIZE_WITH_CRC;
use crate::aac::AdtsHeader;
use crate::codec::Codec;
use crate::decoder_config::aac_from_adts;
use crate::demux::{
    id3v2_tag_size, ChunkScanner, ContainerFormat, Demuxer, IndexEntry, PacketIndex, PacketLocation,
    PacketLookup, ScanBatch,
};
use crate::errors::{MediaError, MediaResult};
use crate::streams::SourceReader;
use crate::track::{AudioTrackInfo, DecoderConfig, Track, TrackType};
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;

const TRACK_ID: u32 = 1;
/// Larger than the biggest ADTS frame, so every chunk holds a whole frame.
const MIN_CHUNK_SIZE: u64 = 1 << 13;

/// Walks frame headers chunk by chunk
struct AdtsScanner {
    position: u64,
    chunk_size: u64,
    next_pts: f64,
}

#[async_trait]
impl ChunkScanner for AdtsScanner {
    async fn scan_next(&mut self, reader: &SourceReader) -> MediaResult<ScanBatch> {
        let data = reader.read(self.position, self.position + self.chunk_size).await?;
        let at_end = (data.len() as u64) < self.chunk_size;

        let mut entries = Vec::new();
        let mut pos = 0;
        let mut skipped = 0;
        while pos + ADTS_HEADER_SIZE_WITH_CRC <= data.len() || (at_end && pos < data.len()) {
            match AdtsHeader::parse(&data[pos..]) {
                Ok(header) if pos + header.frame_length <= data.len() => {
                    let duration = header.duration();
                    entries.push((
                        TRACK_ID,
                        IndexEntry {
                            pts: self.next_pts,
                            dts: self.next_pts,
                            duration: Some(duration),
                            is_key: true,
                            location: PacketLocation::Contiguous {
                                offset: self.position + pos as u64,
                                size: header.frame_length as u32,
                            },
                        },
                    ));
                    self.next_pts += duration;
                    pos += header.frame_length;
                }
                // truncated frame: retried with the next chunk, dropped at the end
                Ok(_) => break,
                Err(_) => {
                    pos += 1;
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            debug!("adts: skipped {} bytes without frame sync", skipped);
        }
        self.position += if at_end { data.len() } else { pos } as u64;
        Ok(ScanBatch {
            entries,
            done: at_end,
        })
    }
}

/// Raw AAC in ADTS framing. Packets are whole ADTS frames and the decoder
/// config carries no description.
pub struct AdtsDemuxer {
    tracks: Vec<Track>,
    config: DecoderConfig,
    index: PacketIndex,
}

impl AdtsDemuxer {
    pub async fn open(reader: Arc<SourceReader>, seek_chunk_size: u64) -> MediaResult<Self> {
        let head = reader.read(0, 10).await?;
        let start = id3v2_tag_size(&head).unwrap_or(0);
        if start > 0 {
            debug!("adts: skipping {} byte ID3v2 tag", start);
        }
        let first = reader
            .read(start, start + ADTS_HEADER_SIZE_WITH_CRC as u64)
            .await?;
        let header = AdtsHeader::parse(&first)
            .map_err(|_| MediaError::format("no ADTS frame at the start of the stream"))?;
        let config = aac_from_adts(&first)?;
        info!(
            "opened ADTS stream, {} Hz, {} channels",
            header.sample_rate(),
            header.audio_specific_config().channels()
        );

        let track = Track {
            id: TRACK_ID,
            track_type: TrackType::Audio,
            codec: Some(Codec::Aac),
            internal_codec_id: config.codec().to_string(),
            time_resolution: header.sample_rate(),
            language: "und".to_string(),
            video: None,
            audio: Some(AudioTrackInfo {
                sample_rate: header.sample_rate(),
                channels: header.audio_specific_config().channels(),
            }),
        };
        let scanner = AdtsScanner {
            position: start,
            chunk_size: seek_chunk_size.max(MIN_CHUNK_SIZE),
            next_pts: 0.0,
        };
        Ok(Self {
            tracks: vec![track],
            config,
            index: PacketIndex::new(reader, Some(Box::new(scanner))).with_track(TRACK_ID, 0.0),
        })
    }
}

#[async_trait]
impl Demuxer for AdtsDemuxer {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Adts
    }

    fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    async fn decoder_config(&self, track_id: u32) -> MediaResult<Option<DecoderConfig>> {
        Ok((track_id == TRACK_ID).then(|| self.config.clone()))
    }

    fn packets(&self) -> &dyn PacketLookup {
        &self.index
    }
}
