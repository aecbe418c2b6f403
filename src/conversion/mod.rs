//! Converting an [`Input`] into an [`Output`].
//!
//! Each source track is planned once: packets pass through untouched when
//! the destination stores them as-is, get their framing rewritten when only
//! the bitstream convention differs, or go through a [`TranscodeBackend`].

pub mod adapter;
pub mod transcode;

pub use adapter::BitstreamAdapter;
pub use transcode::{TrackTranscoder, TranscodeBackend, TranscodedPacket};

use crate::codec::Codec;
use crate::demux::{Input, InputTrack, PacketCursor};
use crate::errors::{MediaError, MediaResult};
use crate::mux::{Output, OutputFormat, TrackOptions};
use crate::packet::{EncodedPacket, PacketRetrievalOptions};
use crate::track::{DecoderConfig, Track, TrackType};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;

/// Options for a conversion
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOptions {
    /// Source time the output starts at. Output timestamps are shifted back
    /// by this amount; 0 keeps source timestamps unchanged.
    pub start: f64,
    /// Source time the output ends before, `None` for the end of each track.
    pub end: Option<f64>,
    pub discard_video: bool,
    pub discard_audio: bool,
    /// Codec to force for video tracks, transcoding when it differs from the source.
    pub video_codec: Option<Codec>,
    pub audio_codec: Option<Codec>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: None,
            discard_video: false,
            discard_audio: false,
            video_codec: None,
            audio_codec: None,
        }
    }
}

/// How a kept track is carried into the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TrackAction {
    Passthrough,
    ConvertBitstream,
    Transcode { codec: Codec },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    DiscardedByUser,
    UnknownSourceCodec,
    NoEncodableTargetCodec,
    MaxTrackCountReached,
    MaxTrackCountOfTypeReached,
}

/// A source track left out of the output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscardedTrack {
    pub track: Track,
    pub reason: DiscardReason,
}

/// A source track mapped onto an output track
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedTrack {
    pub source_id: u32,
    pub output_id: u32,
    pub codec: Codec,
    pub action: TrackAction,
}

struct TrackJob {
    source: InputTrack,
    plan: PlannedTrack,
    config: Option<DecoderConfig>,
    adapter: BitstreamAdapter,
}

struct RunningTrack {
    output_id: u32,
    cursor: PacketCursor,
    head: Option<EncodedPacket>,
    source_config: Option<DecoderConfig>,
    adapter: BitstreamAdapter,
    transcoder: Option<Box<dyn TrackTranscoder>>,
    sent_first: bool,
    packets: u64,
}

/// A planned conversion. Build it with [`Conversion::init`], inspect the
/// plan, then run it with [`Conversion::execute`].
pub struct Conversion {
    output: Output,
    options: ConversionOptions,
    backend: Option<Arc<dyn TranscodeBackend>>,
    jobs: Vec<TrackJob>,
    discarded: Vec<DiscardedTrack>,
    executed: bool,
}

impl Conversion {
    /// Plan every track of `input` against the format of `output` and
    /// declare the kept tracks on `output`.
    pub async fn init(
        input: &Input,
        mut output: Output,
        options: ConversionOptions,
        backend: Option<Arc<dyn TranscodeBackend>>,
    ) -> MediaResult<Self> {
        if options.start < 0.0 || options.end.map_or(false, |end| end <= options.start) {
            return Err(MediaError::configuration(format!(
                "invalid trim range {}..{:?}",
                options.start, options.end
            )));
        }
        let format = output.format();
        let limits = format.track_limits();
        let mut jobs: Vec<TrackJob> = Vec::new();
        let mut discarded = Vec::new();

        for source in input.tracks().await? {
            let track_type = source.track_type();
            let kept_of_type = jobs
                .iter()
                .filter(|j| j.source.track_type() == track_type)
                .count();
            let reason = if (track_type == TrackType::Video && options.discard_video)
                || (track_type == TrackType::Audio && options.discard_audio)
            {
                Some(DiscardReason::DiscardedByUser)
            } else if kept_of_type >= limits.for_type(track_type).1 {
                Some(DiscardReason::MaxTrackCountOfTypeReached)
            } else if jobs.len() >= limits.total.1 {
                Some(DiscardReason::MaxTrackCountReached)
            } else {
                None
            };
            if let Some(reason) = reason {
                discard(&mut discarded, &source, reason);
                continue;
            }

            let Some(codec) = source.codec() else {
                discard(&mut discarded, &source, DiscardReason::UnknownSourceCodec);
                continue;
            };
            let config = source.decoder_config().await?;
            let requested = match track_type {
                TrackType::Video => options.video_codec,
                TrackType::Audio => options.audio_codec,
                TrackType::Subtitle => None,
            };

            let (target, action, adapter) = if requested.map_or(true, |r| r == codec) && format.supports(codec) {
                let adapter = BitstreamAdapter::plan(codec, config.as_ref(), &format)?;
                let action = if adapter.is_passthrough() {
                    TrackAction::Passthrough
                } else {
                    TrackAction::ConvertBitstream
                };
                (codec, action, adapter)
            } else {
                match Self::transcode_target(backend.as_deref(), config.as_ref(), requested, track_type, &format) {
                    Some(target) => (
                        target,
                        TrackAction::Transcode { codec: target },
                        BitstreamAdapter::Passthrough,
                    ),
                    None => {
                        discard(&mut discarded, &source, DiscardReason::NoEncodableTargetCodec);
                        continue;
                    }
                }
            };

            let rotation = source.track().video.map_or(0, |v| v.rotation);
            let output_id = output.add_track(
                target,
                TrackOptions {
                    language: source.language().to_string(),
                    rotation,
                },
            )?;
            debug!(
                "track {} ({}) -> output track {} as {:?}",
                source.id(),
                codec,
                output_id,
                action
            );
            jobs.push(TrackJob {
                plan: PlannedTrack {
                    source_id: source.id(),
                    output_id,
                    codec: target,
                    action,
                },
                source,
                config,
                adapter,
            });
        }

        if jobs.is_empty() {
            return Err(MediaError::conversion(format!(
                "no track of the input can be written as {}",
                format.container_format()
            )));
        }
        info!(
            "conversion planned: {} tracks kept, {} discarded",
            jobs.len(),
            discarded.len()
        );
        Ok(Self {
            output,
            options,
            backend,
            jobs,
            discarded,
            executed: false,
        })
    }

    /// First codec the backend can produce for this track type that the
    /// format accepts, preferring the requested one.
    fn transcode_target(
        backend: Option<&dyn TranscodeBackend>,
        config: Option<&DecoderConfig>,
        requested: Option<Codec>,
        track_type: TrackType,
        format: &OutputFormat,
    ) -> Option<Codec> {
        let backend = backend?;
        let config = config?;
        let candidates: Vec<Codec> = match requested {
            Some(codec) => vec![codec],
            None => format
                .supported_codecs()
                .iter()
                .copied()
                .filter(|c| c.track_type() == track_type)
                .collect(),
        };
        candidates
            .into_iter()
            .find(|c| format.supports(*c) && backend.supports(config, *c))
    }

    pub fn planned_tracks(&self) -> Vec<PlannedTrack> {
        self.jobs.iter().map(|j| j.plan.clone()).collect()
    }

    pub fn discarded_tracks(&self) -> &[DiscardedTrack] {
        &self.discarded
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn into_output(self) -> Output {
        self.output
    }

    /// Copy packets into the output and finalize it. On failure the output
    /// is canceled.
    pub async fn execute(&mut self) -> MediaResult<()> {
        if self.executed {
            return Err(MediaError::conversion("conversion was already executed"));
        }
        self.executed = true;
        match self.run().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("conversion failed: {}", e);
                if let Err(cancel) = self.output.cancel().await {
                    warn!("releasing the canceled output failed: {}", cancel);
                }
                Err(e)
            }
        }
    }

    async fn run(&mut self) -> MediaResult<()> {
        self.output.start().await?;
        let mut running = Vec::with_capacity(self.jobs.len());
        for index in 0..self.jobs.len() {
            let mut track = self.open_track(index).await?;
            if track.head.is_none() {
                self.finish_track(&mut track).await?;
            }
            running.push(track);
        }

        loop {
            let next = running
                .iter()
                .enumerate()
                .filter_map(|(i, t)| t.head.as_ref().map(|p| (i, p.timestamp)))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            let Some((i, _)) = next else {
                break;
            };
            let track = &mut running[i];
            let Some(packet) = track.head.take() else {
                break;
            };
            let packet = self.rebase(packet);
            self.process(track, packet).await?;
            track.head = track.cursor.next().await?;
            if track.head.is_none() {
                self.finish_track(track).await?;
            }
        }

        self.output.finalize().await?;
        for track in &running {
            debug!("output track {}: {} packets", track.output_id, track.packets);
        }
        Ok(())
    }

    async fn open_track(&self, index: usize) -> MediaResult<RunningTrack> {
        let job = &self.jobs[index];
        let sink = job.source.packet_sink();
        let start = if self.options.start > 0.0 {
            sink.get_key_packet(self.options.start, PacketRetrievalOptions::default())
                .await?
        } else {
            None
        };
        let mut cursor = sink.packets_between(start, self.options.end, PacketRetrievalOptions::default());
        let head = cursor.next().await?;

        let transcoder = match (job.plan.action, &self.backend, &job.config) {
            (TrackAction::Transcode { codec }, Some(backend), Some(config)) => {
                Some(backend.open(config, codec).await?)
            }
            (TrackAction::Transcode { .. }, _, _) => {
                return Err(MediaError::conversion(format!(
                    "track {} has no transcoder",
                    job.plan.source_id
                )))
            }
            _ => None,
        };
        if head.is_none() {
            debug!("track {} has no packets in range", job.plan.source_id);
        }
        Ok(RunningTrack {
            output_id: job.plan.output_id,
            cursor,
            head,
            source_config: job.config.clone(),
            adapter: job.adapter.clone(),
            transcoder,
            sent_first: false,
            packets: 0,
        })
    }

    fn rebase(&self, packet: EncodedPacket) -> EncodedPacket {
        if self.options.start == 0.0 {
            return packet;
        }
        let timestamp = (packet.timestamp - self.options.start).max(0.0);
        packet.with_timing(timestamp, packet.duration)
    }

    async fn process(&mut self, track: &mut RunningTrack, packet: EncodedPacket) -> MediaResult<()> {
        if let Some(transcoder) = track.transcoder.as_mut() {
            let produced = transcoder.push(packet).await?;
            return self.write_transcoded(track, produced).await;
        }
        let config = if track.sent_first {
            None
        } else {
            track.adapter.convert_config(track.source_config.as_ref(), &packet)?
        };
        let packet = track.adapter.convert(&packet)?;
        self.write(track, packet, config).await
    }

    async fn write_transcoded(
        &mut self,
        track: &mut RunningTrack,
        produced: Vec<TranscodedPacket>,
    ) -> MediaResult<()> {
        for (packet, config) in produced {
            self.write(track, packet, config).await?;
        }
        Ok(())
    }

    async fn write(
        &mut self,
        track: &mut RunningTrack,
        packet: EncodedPacket,
        config: Option<DecoderConfig>,
    ) -> MediaResult<()> {
        self.output.add_packet(track.output_id, packet, config).await?;
        track.sent_first = true;
        track.packets += 1;
        Ok(())
    }

    async fn finish_track(&mut self, track: &mut RunningTrack) -> MediaResult<()> {
        if let Some(mut transcoder) = track.transcoder.take() {
            let produced = transcoder.flush().await?;
            self.write_transcoded(track, produced).await?;
        }
        self.output.close_track(track.output_id).await
    }
}

fn discard(discarded: &mut Vec<DiscardedTrack>, source: &InputTrack, reason: DiscardReason) {
    warn!("discarding track {}: {:?}", source.id(), reason);
    discarded.push(DiscardedTrack {
        track: source.track().clone(),
        reason,
    });
}

#[cfg(test)]
mod conversion_test;
