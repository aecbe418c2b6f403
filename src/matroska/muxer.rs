use super::block::{block_body, build_simple_block};
use super::ebml::{
    make_element, make_float, make_master, make_string, make_uint, write_id, write_size,
    write_size_with_width, UNKNOWN_SIZE_VINT,
};
use super::elements::*;
use super::tracks::build_track_entry;
use crate::errors::MediaResult;
use crate::mux::{MatroskaOptions, Muxer, OutputTrack, Writer};
use crate::packet::EncodedPacket;
use crate::streams::TargetMode;
use crate::track::{DecoderConfig, TrackType};
use async_trait::async_trait;
use log::{debug, info};
use std::collections::HashMap;

/// Nanoseconds per tick, so timestamps are in milliseconds.
const NANOS_PER_TICK: u64 = 1_000_000;
const APP_NAME: &str = "mediamux";

/// Offsets of the header fields patched at finalize
struct HeaderLayout {
    segment_size_at: u64,
    segment_data_start: u64,
    /// Payload of the Info Duration float.
    duration_at: Option<u64>,
    /// Payload of the Cues SeekPosition.
    cues_position_at: Option<u64>,
}

struct ClusterBuffer {
    timestamp: i64,
    body: Vec<u8>,
}

struct CuePoint {
    time: u64,
    track: u32,
    cluster_position: u64,
}

/// Matroska and WebM writer.
///
/// Packets are held back until every declared track has delivered its first
/// packet, so the Tracks element lists only tracks with data. Clusters are
/// assembled in memory and written with exact sizes. On random-access
/// targets the Segment size, Duration and Cues position are patched at
/// finalize; sequential targets get an unknown-size Segment.
pub struct MatroskaMuxer {
    writer: Writer,
    options: MatroskaOptions,
    is_webm: bool,
    declared: Vec<OutputTrack>,
    configs: HashMap<u32, Option<DecoderConfig>>,
    pending: Vec<(OutputTrack, EncodedPacket)>,
    header: Option<HeaderLayout>,
    has_video: bool,
    cluster: Option<ClusterBuffer>,
    cues: Vec<CuePoint>,
    end_time: f64,
    block_count: usize,
}

impl MatroskaMuxer {
    pub fn new(writer: Writer, options: MatroskaOptions, is_webm: bool) -> Self {
        Self {
            writer,
            options,
            is_webm,
            declared: Vec::new(),
            configs: HashMap::new(),
            pending: Vec::new(),
            header: None,
            has_video: false,
            cluster: None,
            cues: Vec::new(),
            end_time: 0.0,
            block_count: 0,
        }
    }

    fn ebml_header(&self) -> Vec<u8> {
        make_master(
            EBML_HEADER,
            &[
                make_uint(EBML_VERSION, 1),
                make_uint(EBML_READ_VERSION, 1),
                make_uint(EBML_MAX_ID_LENGTH, 4),
                make_uint(EBML_MAX_SIZE_LENGTH, 8),
                make_string(DOC_TYPE, if self.is_webm { "webm" } else { "matroska" }),
                make_uint(DOC_TYPE_VERSION, 4),
                make_uint(DOC_TYPE_READ_VERSION, 2),
            ],
        )
    }

    /// Seek entry with a fixed eight byte position so it can be patched.
    fn seek_entry(id: u32, position: u64) -> Vec<u8> {
        let mut encoded_id = Vec::with_capacity(4);
        write_id(&mut encoded_id, id);
        make_master(
            SEEK,
            &[
                make_element(SEEK_ID, &encoded_id),
                make_element(SEEK_POSITION, &position.to_be_bytes()),
            ],
        )
    }

    async fn write_header(&mut self) -> MediaResult<()> {
        let random_access = self.writer.mode() == TargetMode::RandomAccess;
        let tracks: Vec<&OutputTrack> = self
            .declared
            .iter()
            .filter(|t| self.configs.contains_key(&t.id))
            .collect();
        self.has_video = tracks.iter().any(|t| t.track_type() == TrackType::Video);
        let mut entries = Vec::with_capacity(tracks.len());
        for track in &tracks {
            let config = self.configs.get(&track.id).and_then(Option::as_ref);
            entries.push(build_track_entry(track, config)?);
        }
        let tracks_element = make_master(TRACKS, &entries);

        let mut info_fields = vec![
            make_uint(TIMESTAMP_SCALE, NANOS_PER_TICK),
            make_string(MUXING_APP, APP_NAME),
            make_string(WRITING_APP, APP_NAME),
        ];
        if random_access {
            info_fields.push(make_float(DURATION, 0.0));
        }
        let info = make_master(INFO, &info_fields);

        let seek_head_len = |with_cues: bool| {
            let mut seeks = vec![Self::seek_entry(INFO, 0), Self::seek_entry(TRACKS, 0)];
            if with_cues {
                seeks.push(Self::seek_entry(CUES, 0));
            }
            make_master(SEEK_HEAD, &seeks).len() as u64
        };
        let head_len = seek_head_len(random_access);
        let mut seeks = vec![
            Self::seek_entry(INFO, head_len),
            Self::seek_entry(TRACKS, head_len + info.len() as u64),
        ];
        if random_access {
            seeks.push(Self::seek_entry(CUES, 0));
        }
        let seek_head = make_master(SEEK_HEAD, &seeks);

        self.writer.write(&self.ebml_header()).await?;
        let segment_size_at = self.writer.position();
        let mut segment = Vec::with_capacity(12);
        write_id(&mut segment, SEGMENT);
        let segment_size_at = segment_size_at + segment.len() as u64;
        segment.extend_from_slice(&UNKNOWN_SIZE_VINT);
        self.writer.write(&segment).await?;
        let segment_data_start = self.writer.position();

        // both patched fields are the last 8 bytes of their element
        self.writer.write(&seek_head).await?;
        let cues_position_at = random_access.then(|| self.writer.position() - 8);
        self.writer.write(&info).await?;
        let duration_at = random_access.then(|| self.writer.position() - 8);
        self.writer.write(&tracks_element).await?;

        debug!(
            "matroska: header written with {} of {} tracks",
            tracks.len(),
            self.declared.len()
        );
        self.header = Some(HeaderLayout {
            segment_size_at,
            segment_data_start,
            duration_at,
            cues_position_at,
        });
        Ok(())
    }

    fn starts_cluster(&self, track: &OutputTrack, packet: &EncodedPacket, ticks: i64) -> bool {
        let Some(cluster) = &self.cluster else {
            return true;
        };
        let relative = ticks - cluster.timestamp;
        if relative < i16::MIN as i64 || relative > i16::MAX as i64 {
            return true;
        }
        let anchors = !self.has_video || track.track_type() == TrackType::Video;
        let elapsed = relative as f64 * NANOS_PER_TICK as f64 / 1e9;
        packet.is_key() && anchors && elapsed >= self.options.min_cluster_duration
    }

    async fn flush_cluster(&mut self) -> MediaResult<()> {
        let Some(cluster) = self.cluster.take() else {
            return Ok(());
        };
        let mut payload = make_uint(TIMESTAMP, cluster.timestamp.max(0) as u64);
        payload.extend_from_slice(&cluster.body);
        let mut element = Vec::with_capacity(payload.len() + 12);
        write_id(&mut element, CLUSTER);
        write_size(&mut element, payload.len() as u64);
        element.extend_from_slice(&payload);
        self.writer.write(&element).await
    }

    async fn write_block(&mut self, track: &OutputTrack, packet: &EncodedPacket) -> MediaResult<()> {
        let ticks = (packet.timestamp * 1e9 / NANOS_PER_TICK as f64).round() as i64;
        if self.starts_cluster(track, packet, ticks) {
            self.flush_cluster().await?;
            let timestamp = ticks.max(0);
            let segment_data_start = self.header.as_ref().map_or(0, |h| h.segment_data_start);
            self.cues.push(CuePoint {
                time: timestamp as u64,
                track: track.id,
                cluster_position: self.writer.position() - segment_data_start,
            });
            self.cluster = Some(ClusterBuffer {
                timestamp,
                body: Vec::new(),
            });
        }
        let Some(cluster) = self.cluster.as_mut() else {
            return Ok(());
        };
        let relative = (ticks - cluster.timestamp) as i16;
        if track.track_type() == TrackType::Subtitle {
            let duration = (packet.duration * 1e9 / NANOS_PER_TICK as f64).round().max(0.0) as u64;
            cluster.body.extend(make_master(
                BLOCK_GROUP,
                &[
                    make_element(BLOCK, &block_body(track.id as u64, relative, 0, &packet.data)),
                    make_uint(BLOCK_DURATION, duration),
                ],
            ));
        } else {
            cluster.body.extend(build_simple_block(
                track.id as u64,
                relative,
                packet.is_key(),
                &packet.data,
            ));
        }
        self.end_time = self.end_time.max(packet.end_timestamp());
        self.block_count += 1;
        Ok(())
    }

    async fn release_pending(&mut self) -> MediaResult<()> {
        if self.header.is_none() {
            self.write_header().await?;
        }
        for (track, packet) in std::mem::take(&mut self.pending) {
            self.write_block(&track, &packet).await?;
        }
        Ok(())
    }

    fn cues_element(&self) -> Vec<u8> {
        let points: Vec<Vec<u8>> = self
            .cues
            .iter()
            .map(|cue| {
                make_master(
                    CUE_POINT,
                    &[
                        make_uint(CUE_TIME, cue.time),
                        make_master(
                            CUE_TRACK_POSITIONS,
                            &[
                                make_uint(CUE_TRACK, cue.track as u64),
                                make_uint(CUE_CLUSTER_POSITION, cue.cluster_position),
                            ],
                        ),
                    ],
                )
            })
            .collect();
        make_master(CUES, &points)
    }
}

#[async_trait]
impl Muxer for MatroskaMuxer {
    async fn start(&mut self, tracks: &[OutputTrack]) -> MediaResult<()> {
        self.declared = tracks.to_vec();
        Ok(())
    }

    async fn add_packet(
        &mut self,
        track: &OutputTrack,
        packet: &EncodedPacket,
        config: Option<&DecoderConfig>,
    ) -> MediaResult<()> {
        if !self.configs.contains_key(&track.id) {
            // validate the CodecPrivate requirements before anything is written
            build_track_entry(track, config)?;
            self.configs.insert(track.id, config.cloned());
        }
        if self.header.is_some() {
            return self.write_block(track, packet).await;
        }
        self.pending.push((track.clone(), packet.clone()));
        if self.declared.iter().all(|t| self.configs.contains_key(&t.id)) {
            self.release_pending().await?;
        }
        Ok(())
    }

    async fn abort(&mut self) -> MediaResult<()> {
        self.writer.finish().await
    }

    async fn finalize(&mut self) -> MediaResult<()> {
        self.release_pending().await?;
        self.flush_cluster().await?;

        let Some(layout) = self.header.take() else {
            return self.writer.finish().await;
        };
        let cues_position = self.writer.position() - layout.segment_data_start;
        if layout.cues_position_at.is_some() || !self.cues.is_empty() {
            let cues = self.cues_element();
            self.writer.write(&cues).await?;
        }

        if self.writer.mode() == TargetMode::RandomAccess {
            let mut size = Vec::with_capacity(8);
            write_size_with_width(&mut size, self.writer.position() - layout.segment_data_start, 8);
            self.writer.patch(&size, layout.segment_size_at).await?;
            if let Some(at) = layout.duration_at {
                let ticks = self.end_time * 1e9 / NANOS_PER_TICK as f64;
                self.writer.patch(&ticks.to_be_bytes(), at).await?;
            }
            if let Some(at) = layout.cues_position_at {
                self.writer.patch(&cues_position.to_be_bytes(), at).await?;
            }
        }
        self.writer.finish().await?;
        info!(
            "{}: wrote {} blocks in {} clusters, {} bytes",
            if self.is_webm { "webm" } else { "matroska" },
            self.block_count,
            self.cues.len(),
            self.writer.position()
        );
        Ok(())
    }
}
