use super::elst::EditListEntry;
use super::ftyp::build_ftyp;
use super::moov::build_moov;
use super::stsd::build_stsd;
use super::tkhd::TrackHeader;
use super::trak::{build_trak, SampleTables, TrakLayout};
use crate::errors::{MediaError, MediaResult};
use crate::mux::{FastStart, Mp4Options, Muxer, OutputTrack, Writer};
use crate::packet::EncodedPacket;
use crate::track::{DecoderConfig, TrackType};
use async_trait::async_trait;
use log::{debug, info};

const MOVIE_TIMESCALE: u32 = 1000;
const VIDEO_TIMESCALE: u32 = 90_000;
const LARGE_MDAT_HEADER: u64 = 16;

#[derive(Debug, Clone)]
struct Sample {
    size: u32,
    /// Presentation time in media timescale units.
    pts: i64,
    duration: i64,
    is_key: bool,
    /// Offset of the payload from the start of the mdat payload.
    mdat_offset: u64,
}

struct TrackWriter {
    track: OutputTrack,
    timescale: u32,
    stsd: Vec<u8>,
    width: u32,
    height: u32,
    samples: Vec<Sample>,
}

/// Decode-order plan of one track's samples
struct TimingPlan {
    deltas: Vec<u32>,
    composition_offsets: Option<Vec<i32>>,
    /// First decode timestamp before re-basing to zero.
    origin: i64,
    media_duration: u64,
}

impl TrackWriter {
    fn new(track: OutputTrack, config: &DecoderConfig) -> MediaResult<Self> {
        let stsd = build_stsd(track.codec, config)?;
        let (timescale, width, height) = match config {
            DecoderConfig::Video(video) => (VIDEO_TIMESCALE, video.coded_width, video.coded_height),
            DecoderConfig::Audio(audio) => (audio.sample_rate.max(1), 0, 0),
        };
        Ok(Self {
            track,
            timescale,
            stsd,
            width,
            height,
            samples: Vec::new(),
        })
    }

    fn ticks(&self, seconds: f64) -> i64 {
        (seconds * self.timescale as f64).round() as i64
    }

    /// Decode timestamps are the sorted presentation timestamps, so the
    /// composition offset of every sample is `pts - dts`.
    fn plan(&self) -> TimingPlan {
        let mut dts: Vec<i64> = self.samples.iter().map(|s| s.pts).collect();
        dts.sort_unstable();
        let origin = dts.first().copied().unwrap_or(0);

        let mut deltas: Vec<u32> = dts
            .windows(2)
            .map(|w| (w[1] - w[0]).clamp(0, u32::MAX as i64) as u32)
            .collect();
        let last_duration = self
            .samples
            .last()
            .map(|s| s.duration)
            .filter(|d| *d > 0)
            .or_else(|| deltas.last().map(|d| *d as i64))
            .unwrap_or(0);
        if !self.samples.is_empty() {
            deltas.push(last_duration.clamp(0, u32::MAX as i64) as u32);
        }

        let offsets: Vec<i32> = self
            .samples
            .iter()
            .zip(&dts)
            .map(|(s, d)| (s.pts - d) as i32)
            .collect();
        let composition_offsets = offsets.iter().any(|o| *o != 0).then_some(offsets);

        TimingPlan {
            media_duration: deltas.iter().map(|d| *d as u64).sum(),
            deltas,
            composition_offsets,
            origin,
        }
    }

    fn to_movie_time(&self, ticks: i64) -> u64 {
        (ticks.max(0) as u128 * MOVIE_TIMESCALE as u128 / self.timescale as u128) as u64
    }

    fn edits(&self, plan: &TimingPlan) -> Vec<EditListEntry> {
        let media_movie_duration = self.to_movie_time(plan.media_duration as i64);
        match plan.origin {
            0 => Vec::new(),
            origin if origin > 0 => vec![
                EditListEntry {
                    segment_duration: self.to_movie_time(origin),
                    media_time: -1,
                },
                EditListEntry {
                    segment_duration: media_movie_duration,
                    media_time: 0,
                },
            ],
            origin => vec![EditListEntry {
                segment_duration: media_movie_duration.saturating_sub(self.to_movie_time(-origin)),
                media_time: -origin,
            }],
        }
    }

    fn build(&self, chunks: &[(u64, u32)], mdat_base: u64) -> (Vec<u8>, u64) {
        let plan = self.plan();
        let edits = self.edits(&plan);
        let delay = edits
            .first()
            .filter(|e| e.media_time == -1)
            .map_or(0, |e| e.segment_duration);
        let movie_duration = delay
            + edits
                .last()
                .map_or(self.to_movie_time(plan.media_duration as i64), |e| e.segment_duration);

        let sync_samples = if self.samples.iter().all(|s| s.is_key) {
            None
        } else {
            Some(
                self.samples
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.is_key)
                    .map(|(i, _)| i as u32 + 1)
                    .collect(),
            )
        };
        let tables = SampleTables {
            sizes: self.samples.iter().map(|s| s.size).collect(),
            deltas: plan.deltas.clone(),
            composition_offsets: plan.composition_offsets.clone(),
            sync_samples,
            chunk_offsets: chunks.iter().map(|(offset, _)| mdat_base + offset).collect(),
            chunk_sample_counts: chunks.iter().map(|(_, count)| *count).collect(),
        };
        let layout = TrakLayout {
            header: TrackHeader {
                track_id: self.track.id,
                enabled: true,
                width: self.width,
                height: self.height,
                rotation: self.track.rotation,
            },
            track_type: self.track.track_type(),
            language: &self.track.language,
            timescale: self.timescale,
            movie_duration,
            media_duration: plan.media_duration,
            edits: &edits,
            stsd: self.stsd.clone(),
        };
        (build_trak(&layout, &tables), movie_duration)
    }
}

/// ISO base media file writer.
///
/// Sample tables are kept in memory until finalize. With fast start the
/// payloads are buffered too and moov is written ahead of mdat.
pub struct Mp4Muxer {
    writer: Writer,
    options: Mp4Options,
    declared: Vec<OutputTrack>,
    tracks: Vec<TrackWriter>,
    /// Track index of every sample in write order.
    order: Vec<usize>,
    buffered: Vec<Vec<u8>>,
    mdat_size: u64,
    /// Absolute position of the mdat header when streaming.
    mdat_start: u64,
}

impl Mp4Muxer {
    pub fn new(writer: Writer, options: Mp4Options) -> Self {
        Self {
            writer,
            options,
            declared: Vec::new(),
            tracks: Vec::new(),
            order: Vec::new(),
            buffered: Vec::new(),
            mdat_size: 0,
            mdat_start: 0,
        }
    }

    fn ftyp() -> Vec<u8> {
        build_ftyp(b"isom", 0x200, &[b"isom", b"iso2", b"iso6", b"mp41"])
    }

    /// Runs of consecutive samples of one track, as (mdat offset, count) per track.
    fn chunks(&self) -> Vec<Vec<(u64, u32)>> {
        let mut chunks: Vec<Vec<(u64, u32)>> = vec![Vec::new(); self.tracks.len()];
        let mut next_sample = vec![0usize; self.tracks.len()];
        let mut previous = None;
        for &track in &self.order {
            let sample = &self.tracks[track].samples[next_sample[track]];
            next_sample[track] += 1;
            match chunks[track].last_mut() {
                Some(chunk) if previous == Some(track) => chunk.1 += 1,
                _ => chunks[track].push((sample.mdat_offset, 1)),
            }
            previous = Some(track);
        }
        chunks
    }

    fn build_moov(&self, mdat_base: u64) -> Vec<u8> {
        let chunks = self.chunks();
        let mut traks = Vec::new();
        let mut duration = 0;
        for (track, chunks) in self.tracks.iter().zip(&chunks) {
            if track.samples.is_empty() {
                continue;
            }
            let (trak, track_duration) = track.build(chunks, mdat_base);
            duration = duration.max(track_duration);
            traks.push(trak);
        }
        let next_track_id = self.declared.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        build_moov(MOVIE_TIMESCALE, duration, next_track_id, &traks)
    }

    fn mdat_header(payload_size: u64) -> Vec<u8> {
        let mut header = Vec::with_capacity(LARGE_MDAT_HEADER as usize);
        if payload_size + 8 > u32::MAX as u64 {
            header.extend_from_slice(&1u32.to_be_bytes());
            header.extend_from_slice(b"mdat");
            header.extend_from_slice(&(payload_size + LARGE_MDAT_HEADER).to_be_bytes());
        } else {
            header.extend_from_slice(&((payload_size + 8) as u32).to_be_bytes());
            header.extend_from_slice(b"mdat");
        }
        header
    }

    async fn finalize_fast_start(&mut self) -> MediaResult<()> {
        let ftyp = Self::ftyp();
        let mdat_header = Self::mdat_header(self.mdat_size);
        let prefix = (ftyp.len() + mdat_header.len()) as u64;

        // chunk offsets depend on the moov size, which depends on whether
        // the offsets still fit stco
        let mut moov = self.build_moov(prefix);
        loop {
            let rebuilt = self.build_moov(prefix + moov.len() as u64);
            if rebuilt.len() == moov.len() {
                moov = rebuilt;
                break;
            }
            moov = rebuilt;
        }

        self.writer.write(&ftyp).await?;
        self.writer.write(&moov).await?;
        self.writer.write(&mdat_header).await?;
        for data in std::mem::take(&mut self.buffered) {
            self.writer.write(&data).await?;
        }
        Ok(())
    }

    async fn finalize_streamed(&mut self) -> MediaResult<()> {
        let mut size = Vec::with_capacity(8);
        size.extend_from_slice(&(self.mdat_size + LARGE_MDAT_HEADER).to_be_bytes());
        self.writer.patch(&size, self.mdat_start + 8).await?;
        let moov = self.build_moov(self.mdat_start + LARGE_MDAT_HEADER);
        self.writer.write(&moov).await
    }
}

#[async_trait]
impl Muxer for Mp4Muxer {
    async fn start(&mut self, tracks: &[OutputTrack]) -> MediaResult<()> {
        self.declared = tracks.to_vec();
        if self.options.fast_start == FastStart::Off {
            self.writer.write(&Self::ftyp()).await?;
            self.mdat_start = self.writer.position();
            let mut header = Vec::with_capacity(LARGE_MDAT_HEADER as usize);
            header.extend_from_slice(&1u32.to_be_bytes());
            header.extend_from_slice(b"mdat");
            header.extend_from_slice(&LARGE_MDAT_HEADER.to_be_bytes());
            self.writer.write(&header).await?;
        }
        Ok(())
    }

    async fn add_packet(
        &mut self,
        track: &OutputTrack,
        packet: &EncodedPacket,
        config: Option<&DecoderConfig>,
    ) -> MediaResult<()> {
        let index = match self.tracks.iter().position(|t| t.track.id == track.id) {
            Some(index) => index,
            None => {
                let config = config.ok_or_else(|| {
                    MediaError::configuration(format!(
                        "track {} needs a decoder config with its first packet",
                        track.id
                    ))
                })?;
                if config.track_type() != track.track_type() || track.track_type() == TrackType::Subtitle {
                    return Err(MediaError::configuration(format!(
                        "decoder config does not match track {}",
                        track.id
                    )));
                }
                debug!("mp4: first packet of track {} ({})", track.id, config.codec());
                self.tracks.push(TrackWriter::new(track.clone(), config)?);
                self.tracks.len() - 1
            }
        };

        let writer = &mut self.tracks[index];
        let sample = Sample {
            size: packet.data.len() as u32,
            pts: writer.ticks(packet.timestamp),
            duration: writer.ticks(packet.duration),
            is_key: packet.is_key(),
            mdat_offset: self.mdat_size,
        };
        writer.samples.push(sample);
        self.order.push(index);
        self.mdat_size += packet.data.len() as u64;

        match self.options.fast_start {
            FastStart::InMemory => self.buffered.push(packet.data.clone()),
            FastStart::Off => self.writer.write(&packet.data).await?,
        }
        Ok(())
    }

    async fn abort(&mut self) -> MediaResult<()> {
        self.writer.finish().await
    }

    async fn finalize(&mut self) -> MediaResult<()> {
        match self.options.fast_start {
            FastStart::InMemory => self.finalize_fast_start().await?,
            FastStart::Off => self.finalize_streamed().await?,
        }
        self.writer.finish().await?;
        info!(
            "mp4: wrote {} samples in {} tracks, {} bytes",
            self.order.len(),
            self.tracks.len(),
            self.writer.position()
        );
        Ok(())
    }
}
