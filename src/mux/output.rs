use super::format::OutputFormat;
use super::{Muxer, OutputTrack};
use crate::codec::{compose_mime_type, Codec};
use crate::errors::{MediaError, MediaResult};
use crate::packet::EncodedPacket;
use crate::streams::Target;
use crate::track::{DecoderConfig, TrackType};
use log::{debug, info};
use std::collections::VecDeque;
use tokio::sync::watch;

/// Per-track options when declaring an output track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackOptions {
    /// ISO 639-2 code.
    pub language: String,
    pub rotation: u16,
}

impl Default for TrackOptions {
    fn default() -> Self {
        Self {
            language: "und".to_string(),
            rotation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputState {
    Pending,
    Started,
    Finalized,
    Canceled,
}

struct TrackState {
    track: OutputTrack,
    config: Option<DecoderConfig>,
    queue: VecDeque<EncodedPacket>,
    packet_count: u64,
    closed: bool,
}

impl TrackState {
    fn codec_string(&self) -> String {
        match &self.config {
            Some(config) => config.codec().to_string(),
            None => self.track.codec.default_codec_string().to_string(),
        }
    }
}

/// Waits for an output's mime type, independently of the output's borrow.
#[derive(Debug, Clone)]
pub struct MimeTypeHandle {
    rx: watch::Receiver<Option<String>>,
}

impl MimeTypeHandle {
    /// Resolves once every track has seen its first packet, or at finalize.
    /// Fails if the output is dropped first.
    pub async fn resolve(mut self) -> MediaResult<String> {
        let mime = self
            .rx
            .wait_for(|mime| mime.is_some())
            .await
            .map_err(|_| MediaError::stream("output dropped before its mime type resolved"))?;
        Ok(mime.clone().unwrap_or_default())
    }

    pub fn get(&self) -> Option<String> {
        self.rx.borrow().clone()
    }
}

/// A media file being written.
///
/// Tracks are declared first, then [`Output::start`] locks the composition.
/// Packets are interleaved by timestamp across tracks before they reach the
/// format muxer. The target is released when the output is finalized or
/// canceled.
pub struct Output {
    format: OutputFormat,
    muxer: Option<Box<dyn Muxer>>,
    state: OutputState,
    tracks: Vec<TrackState>,
    mime_tx: watch::Sender<Option<String>>,
}

impl Output {
    pub fn new(format: OutputFormat, target: Box<dyn Target>) -> MediaResult<Self> {
        let muxer = format.create_muxer(target)?;
        let (mime_tx, _) = watch::channel(None);
        Ok(Self {
            format,
            muxer: Some(muxer),
            state: OutputState::Pending,
            tracks: Vec::new(),
            mime_tx,
        })
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn tracks(&self) -> Vec<OutputTrack> {
        self.tracks.iter().map(|t| t.track.clone()).collect()
    }

    /// Declare a track. Codec support and track limits are checked here.
    pub fn add_track(&mut self, codec: Codec, options: TrackOptions) -> MediaResult<u32> {
        if self.state != OutputState::Pending {
            return Err(MediaError::configuration(
                "tracks can only be added before the output is started",
            ));
        }
        if !self.format.supports(codec) {
            return Err(MediaError::configuration(format!(
                "{} does not support codec {}",
                self.format.container_format(),
                codec
            )));
        }
        let limits = self.format.track_limits();
        let track_type = codec.track_type();
        let same_type = self
            .tracks
            .iter()
            .filter(|t| t.track.track_type() == track_type)
            .count();
        if same_type + 1 > limits.for_type(track_type).1 {
            return Err(MediaError::configuration(format!(
                "{} supports at most {} {} tracks",
                self.format.container_format(),
                limits.for_type(track_type).1,
                track_type.name()
            )));
        }
        if self.tracks.len() + 1 > limits.total.1 {
            return Err(MediaError::configuration(format!(
                "{} supports at most {} tracks",
                self.format.container_format(),
                limits.total.1
            )));
        }

        let id = self.tracks.len() as u32 + 1;
        self.tracks.push(TrackState {
            track: OutputTrack {
                id,
                codec,
                language: options.language,
                rotation: options.rotation,
            },
            config: None,
            queue: VecDeque::new(),
            packet_count: 0,
            closed: false,
        });
        Ok(id)
    }

    pub fn add_video_track(&mut self, codec: Codec, options: TrackOptions) -> MediaResult<u32> {
        self.add_typed_track(TrackType::Video, codec, options)
    }

    pub fn add_audio_track(&mut self, codec: Codec, options: TrackOptions) -> MediaResult<u32> {
        self.add_typed_track(TrackType::Audio, codec, options)
    }

    pub fn add_subtitle_track(&mut self, codec: Codec, options: TrackOptions) -> MediaResult<u32> {
        self.add_typed_track(TrackType::Subtitle, codec, options)
    }

    fn add_typed_track(
        &mut self,
        track_type: TrackType,
        codec: Codec,
        options: TrackOptions,
    ) -> MediaResult<u32> {
        if codec.track_type() != track_type {
            return Err(MediaError::configuration(format!(
                "{} is not a {} codec",
                codec,
                track_type.name()
            )));
        }
        self.add_track(codec, options)
    }

    /// Lock in the track composition and write headers.
    pub async fn start(&mut self) -> MediaResult<()> {
        if self.state != OutputState::Pending {
            return Err(MediaError::configuration("output was already started"));
        }
        let limits = self.format.track_limits();
        for track_type in [TrackType::Video, TrackType::Audio, TrackType::Subtitle] {
            let count = self
                .tracks
                .iter()
                .filter(|t| t.track.track_type() == track_type)
                .count();
            if count < limits.for_type(track_type).0 {
                return Err(MediaError::configuration(format!(
                    "{} requires at least {} {} tracks",
                    self.format.container_format(),
                    limits.for_type(track_type).0,
                    track_type.name()
                )));
            }
        }
        if self.tracks.len() < limits.total.0 {
            return Err(MediaError::configuration("output has no tracks"));
        }

        let tracks = self.tracks();
        self.muxer()?.start(&tracks).await?;
        self.state = OutputState::Started;
        info!(
            "started {} output with {} tracks",
            self.format.container_format(),
            tracks.len()
        );
        Ok(())
    }

    /// Queue a packet. `config` is required with the first packet of tracks
    /// whose codec needs out-of-band parameters in this format.
    pub async fn add_packet(
        &mut self,
        track_id: u32,
        packet: EncodedPacket,
        config: Option<DecoderConfig>,
    ) -> MediaResult<()> {
        self.ensure_started()?;
        let state = self.track_mut(track_id)?;
        if state.closed {
            return Err(MediaError::configuration(format!(
                "track {} was already closed",
                track_id
            )));
        }
        if state.packet_count == 0 {
            if let Some(config) = config {
                state.config = Some(config);
            }
        }
        state.packet_count += 1;
        state.queue.push_back(packet);

        if self.mime_tx.borrow().is_none() && self.tracks.iter().all(|t| t.packet_count > 0) {
            self.resolve_mime_type();
        }
        self.drain(false).await
    }

    /// Declare that a track receives no further packets, letting the other
    /// tracks be interleaved past it.
    pub async fn close_track(&mut self, track_id: u32) -> MediaResult<()> {
        self.ensure_started()?;
        self.track_mut(track_id)?.closed = true;
        self.drain(false).await
    }

    /// Flush queued packets and write trailers.
    pub async fn finalize(&mut self) -> MediaResult<()> {
        self.ensure_started()?;
        for track in &mut self.tracks {
            track.closed = true;
        }
        self.drain(true).await?;
        if self.mime_tx.borrow().is_none() {
            self.resolve_mime_type();
        }
        self.muxer()?.finalize().await?;
        self.muxer = None;
        self.state = OutputState::Finalized;
        info!("finalized {} output", self.format.container_format());
        Ok(())
    }

    /// Abandon the output. Queued packets are dropped, nothing more is
    /// written and the target is released.
    pub async fn cancel(&mut self) -> MediaResult<()> {
        for track in &mut self.tracks {
            track.queue.clear();
        }
        self.state = OutputState::Canceled;
        match self.muxer.take() {
            Some(mut muxer) => {
                debug!("canceling {} output", self.format.container_format());
                muxer.abort().await
            }
            None => Ok(()),
        }
    }

    /// Full mime type with codec parameters. Resolves once every track has
    /// seen its first packet, or at finalize.
    pub async fn mime_type(&self) -> MediaResult<String> {
        self.mime_type_handle().resolve().await
    }

    /// A handle that can await the mime type while packets are being added.
    pub fn mime_type_handle(&self) -> MimeTypeHandle {
        MimeTypeHandle {
            rx: self.mime_tx.subscribe(),
        }
    }

    /// The mime type if already resolved.
    pub fn resolved_mime_type(&self) -> Option<String> {
        self.mime_tx.borrow().clone()
    }

    fn resolve_mime_type(&self) {
        let written: Vec<&TrackState> = self.tracks.iter().filter(|t| t.packet_count > 0).collect();
        let has_video = written
            .iter()
            .any(|t| t.track.track_type() == TrackType::Video);
        let codecs: Vec<String> = written.iter().map(|t| t.codec_string()).collect();
        let mime = compose_mime_type(self.format.base_mime_type(has_video), &codecs);
        debug!("output mime type resolved: {}", mime);
        self.mime_tx.send_replace(Some(mime));
    }

    fn muxer(&mut self) -> MediaResult<&mut Box<dyn Muxer>> {
        self.muxer
            .as_mut()
            .ok_or_else(|| MediaError::configuration("output target was released"))
    }

    fn ensure_started(&self) -> MediaResult<()> {
        match self.state {
            OutputState::Started => Ok(()),
            OutputState::Pending => Err(MediaError::configuration("output has not been started")),
            OutputState::Finalized => Err(MediaError::configuration("output was already finalized")),
            OutputState::Canceled => Err(MediaError::configuration("output was canceled")),
        }
    }

    fn track_mut(&mut self, track_id: u32) -> MediaResult<&mut TrackState> {
        self.tracks
            .iter_mut()
            .find(|t| t.track.id == track_id)
            .ok_or_else(|| MediaError::configuration(format!("unknown track {}", track_id)))
    }

    /// Hand packets to the muxer in timestamp order. A packet is released
    /// only when every open track has one queued to compare against.
    async fn drain(&mut self, flush: bool) -> MediaResult<()> {
        loop {
            if !flush && self.tracks.iter().any(|t| !t.closed && t.queue.is_empty()) {
                return Ok(());
            }
            let next = self
                .tracks
                .iter()
                .enumerate()
                .filter_map(|(i, t)| t.queue.front().map(|p| (i, p.timestamp)))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            let Some((i, _)) = next else {
                return Ok(());
            };
            let Some(muxer) = self.muxer.as_mut() else {
                return Err(MediaError::configuration("output target was released"));
            };
            let track = &mut self.tracks[i];
            let Some(packet) = track.queue.pop_front() else {
                return Ok(());
            };
            muxer
                .add_packet(&track.track, &packet, track.config.as_ref())
                .await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MediaResult;
    use crate::packet::PacketType;
    use crate::streams::BufferTarget;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<(u32, f64)>>>;

    struct RecordingMuxer {
        log: Log,
        aborted: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl Muxer for RecordingMuxer {
        async fn start(&mut self, _tracks: &[OutputTrack]) -> MediaResult<()> {
            Ok(())
        }

        async fn add_packet(
            &mut self,
            track: &OutputTrack,
            packet: &EncodedPacket,
            _config: Option<&DecoderConfig>,
        ) -> MediaResult<()> {
            self.log.lock().unwrap().push((track.id, packet.timestamp));
            Ok(())
        }

        async fn finalize(&mut self) -> MediaResult<()> {
            Ok(())
        }

        async fn abort(&mut self) -> MediaResult<()> {
            *self.aborted.lock().unwrap() = true;
            Ok(())
        }
    }

    fn recording_output(format: OutputFormat) -> (Output, Log) {
        let (output, log, _) = aborting_output(format);
        (output, log)
    }

    fn aborting_output(format: OutputFormat) -> (Output, Log, Arc<Mutex<bool>>) {
        let log: Log = Arc::default();
        let aborted = Arc::new(Mutex::new(false));
        let mut output = Output::new(format, Box::new(BufferTarget::new())).unwrap();
        output.muxer = Some(Box::new(RecordingMuxer {
            log: log.clone(),
            aborted: aborted.clone(),
        }));
        (output, log, aborted)
    }

    fn packet(t: f64) -> EncodedPacket {
        EncodedPacket::new(vec![0; 4], PacketType::Key, t, 0.5)
    }

    #[tokio::test]
    async fn test_packets_interleaved_by_timestamp() {
        let (mut output, log) = recording_output(OutputFormat::matroska());
        let video = output.add_video_track(Codec::Vp9, TrackOptions::default()).unwrap();
        let audio = output.add_audio_track(Codec::Opus, TrackOptions::default()).unwrap();
        output.start().await.unwrap();

        for t in [0.0, 0.5, 1.0, 1.5] {
            output.add_packet(video, packet(t), None).await.unwrap();
        }
        assert!(log.lock().unwrap().is_empty());
        for t in [0.0, 0.25, 0.75, 1.25] {
            output.add_packet(audio, packet(t), None).await.unwrap();
        }
        output.finalize().await.unwrap();

        let timestamps: Vec<f64> = log.lock().unwrap().iter().map(|(_, t)| *t).collect();
        let mut sorted = timestamps.clone();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(timestamps, sorted);
        assert_eq!(timestamps.len(), 8);
    }

    #[tokio::test]
    async fn test_track_constraints() {
        let (mut output, _) = recording_output(OutputFormat::Adts);
        assert!(output.add_video_track(Codec::Avc, TrackOptions::default()).is_err());
        assert!(matches!(
            output.start().await,
            Err(MediaError::Configuration(_))
        ));
        output.add_audio_track(Codec::Aac, TrackOptions::default()).unwrap();
        assert!(output.add_audio_track(Codec::Aac, TrackOptions::default()).is_err());
        assert!(output.add_audio_track(Codec::Avc, TrackOptions::default()).is_err());

        let (mut ts, _) = recording_output(OutputFormat::mpeg_ts());
        for _ in 0..16 {
            ts.add_video_track(Codec::Avc, TrackOptions::default()).unwrap();
        }
        assert!(ts.add_video_track(Codec::Hevc, TrackOptions::default()).is_err());
        assert!(ts.add_subtitle_track(Codec::WebVtt, TrackOptions::default()).is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let (mut output, _) = recording_output(OutputFormat::webm());
        let id = output.add_video_track(Codec::Vp8, TrackOptions::default()).unwrap();
        assert!(output.add_packet(id, packet(0.0), None).await.is_err());
        output.start().await.unwrap();
        assert!(output.add_audio_track(Codec::Opus, TrackOptions::default()).is_err());
        assert!(output.add_packet(99, packet(0.0), None).await.is_err());
        output.finalize().await.unwrap();
        assert!(output.finalize().await.is_err());
    }

    #[tokio::test]
    async fn test_mime_type_resolves_after_first_packets() {
        let (mut output, _) = recording_output(OutputFormat::mp4());
        let video = output.add_video_track(Codec::Vp9, TrackOptions::default()).unwrap();
        let audio = output.add_audio_track(Codec::Opus, TrackOptions::default()).unwrap();
        output.start().await.unwrap();
        output.add_packet(video, packet(0.0), None).await.unwrap();
        assert_eq!(output.resolved_mime_type(), None);
        output.add_packet(audio, packet(0.0), None).await.unwrap();
        assert_eq!(
            output.mime_type().await.unwrap(),
            "video/mp4; codecs=\"vp09.00.10.08, opus\""
        );
    }

    #[tokio::test]
    async fn test_unused_track_left_out_of_mime_type() {
        let (mut output, _) = recording_output(OutputFormat::mp4());
        output.add_video_track(Codec::Vp9, TrackOptions::default()).unwrap();
        let audio = output.add_audio_track(Codec::Opus, TrackOptions::default()).unwrap();
        output.start().await.unwrap();
        output.add_packet(audio, packet(0.0), None).await.unwrap();
        output.finalize().await.unwrap();
        assert_eq!(output.mime_type().await.unwrap(), "audio/mp4; codecs=\"opus\"");
    }

    #[tokio::test]
    async fn test_mime_type_awaited_while_writing() {
        let (mut output, _) = recording_output(OutputFormat::webm());
        let video = output.add_video_track(Codec::Vp9, TrackOptions::default()).unwrap();
        let audio = output.add_audio_track(Codec::Opus, TrackOptions::default()).unwrap();
        let handle = output.mime_type_handle();
        assert_eq!(handle.get(), None);
        let waiter = tokio::spawn(handle.clone().resolve());

        output.start().await.unwrap();
        output.add_packet(video, packet(0.0), None).await.unwrap();
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        assert_eq!(handle.get(), None);
        output.add_packet(audio, packet(0.0), None).await.unwrap();

        // settles before finalize is called
        let mime = waiter.await.unwrap().unwrap();
        assert_eq!(mime, "video/webm; codecs=\"vp09.00.10.08, opus\"");
        output.finalize().await.unwrap();
        assert_eq!(handle.get(), Some(mime));
    }

    #[tokio::test]
    async fn test_mime_handle_fails_when_output_dropped() {
        let (mut output, _) = recording_output(OutputFormat::mp4());
        output.add_video_track(Codec::Vp9, TrackOptions::default()).unwrap();
        let handle = output.mime_type_handle();
        output.start().await.unwrap();
        drop(output);
        assert!(matches!(handle.resolve().await, Err(MediaError::Stream(_))));
    }

    #[tokio::test]
    async fn test_cancel_releases_target() {
        let (mut output, log, aborted) = aborting_output(OutputFormat::matroska());
        let video = output.add_video_track(Codec::Vp9, TrackOptions::default()).unwrap();
        output.start().await.unwrap();
        output.add_packet(video, packet(0.0), None).await.unwrap();
        output.cancel().await.unwrap();

        assert!(*aborted.lock().unwrap());
        assert!(output.muxer.is_none());
        assert!(output.add_packet(video, packet(1.0), None).await.is_err());
        assert!(output.finalize().await.is_err());
        // canceling twice is harmless
        output.cancel().await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
