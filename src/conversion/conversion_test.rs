#[cfg(test)]
mod tests {
    use crate::aac::AdtsHeader;
    use crate::codec::Codec;
    use crate::conversion::transcode::MockTranscodeBackend;
    use crate::conversion::*;
    use crate::decoder_config;
    use crate::demux::{Input, InputTrack};
    use crate::errors::{MediaError, MediaResult};
    use crate::mux::{Output, OutputFormat, TrackOptions};
    use crate::packet::{EncodedPacket, PacketRetrievalOptions, PacketType};
    use crate::streams::BufferTarget;
    use crate::track::{DecoderConfig, TrackType, VideoDecoderConfig};
    use async_trait::async_trait;
    use std::sync::Arc;

    const FRAME: f64 = 0.04;
    const AUDIO_FRAME: f64 = 0.032;

    fn vp9_config() -> DecoderConfig {
        DecoderConfig::Video(VideoDecoderConfig {
            codec: "vp09.00.10.08".to_string(),
            coded_width: 640,
            coded_height: 360,
            color_space: None,
            description: None,
        })
    }

    fn audio_config(codec: Codec) -> DecoderConfig {
        match codec {
            Codec::Aac => decoder_config::aac_from_asc(&[0x11, 0x90]).unwrap(),
            _ => decoder_config::audio(codec.default_codec_string().to_string(), 48000, 2, None),
        }
    }

    /// Three seconds of 25 fps VP9 with a key frame every second, plus one
    /// track per entry of `audio` with 32 ms frames.
    async fn matroska_source(audio: &[Codec]) -> Vec<u8> {
        let buffer = BufferTarget::new();
        let mut output = Output::new(OutputFormat::matroska(), Box::new(buffer.clone())).unwrap();
        let video = output.add_video_track(Codec::Vp9, TrackOptions::default()).unwrap();
        let mut audio_ids = Vec::new();
        for codec in audio {
            audio_ids.push((output.add_audio_track(*codec, TrackOptions::default()).unwrap(), *codec));
        }
        output.start().await.unwrap();

        for i in 0..75usize {
            let packet_type = if i % 25 == 0 { PacketType::Key } else { PacketType::Delta };
            let packet = EncodedPacket::new(vec![i as u8; 100 + i], packet_type, i as f64 * FRAME, FRAME);
            let config = (i == 0).then(vp9_config);
            output.add_packet(video, packet, config).await.unwrap();
        }
        for (id, codec) in audio_ids {
            for i in 0..93usize {
                let packet = EncodedPacket::new(vec![0xA0 ^ i as u8; 50], PacketType::Key, i as f64 * AUDIO_FRAME, AUDIO_FRAME);
                let config = (i == 0).then(|| audio_config(codec));
                output.add_packet(id, packet, config).await.unwrap();
            }
        }
        output.finalize().await.unwrap();
        buffer.bytes().await
    }

    async fn collect(track: &InputTrack) -> Vec<EncodedPacket> {
        let mut cursor = track.packet_sink().packets(PacketRetrievalOptions::default());
        let mut packets = Vec::new();
        while let Some(packet) = cursor.next().await.unwrap() {
            packets.push(packet);
        }
        packets
    }

    /// Re-labels each AC-3 frame as an Opus packet and emits one trailing packet on flush.
    struct RelabelingTranscoder {
        first: bool,
        last_end: f64,
        fail: bool,
    }

    #[async_trait]
    impl TrackTranscoder for RelabelingTranscoder {
        async fn push(&mut self, packet: EncodedPacket) -> MediaResult<Vec<TranscodedPacket>> {
            if self.fail {
                return Err(MediaError::conversion("decoder rejected the packet"));
            }
            let config = self
                .first
                .then(|| decoder_config::audio("opus".to_string(), 48000, 2, None));
            self.first = false;
            self.last_end = packet.end_timestamp();
            Ok(vec![(packet.with_data(vec![0xFC; 20]), config)])
        }

        async fn flush(&mut self) -> MediaResult<Vec<TranscodedPacket>> {
            let tail = EncodedPacket::new(vec![0xFC; 20], PacketType::Key, self.last_end, AUDIO_FRAME);
            Ok(vec![(tail, None)])
        }
    }

    fn opus_backend(fail: bool) -> Arc<dyn TranscodeBackend> {
        let mut backend = MockTranscodeBackend::new();
        backend
            .expect_supports()
            .returning(|from, to| from.codec() == "ac-3" && to == Codec::Opus);
        backend.expect_open().times(1).returning(move |_, _| {
            Ok(Box::new(RelabelingTranscoder {
                first: true,
                last_end: 0.0,
                fail,
            }) as Box<dyn TrackTranscoder>)
        });
        Arc::new(backend)
    }

    #[tokio::test]
    async fn test_passthrough_discards_unsupported_track() {
        let source = Input::from_bytes(matroska_source(&[Codec::Ac3]).await);
        let buffer = BufferTarget::new();
        let output = Output::new(OutputFormat::webm(), Box::new(buffer.clone())).unwrap();
        let mut conversion = Conversion::init(&source, output, ConversionOptions::default(), None)
            .await
            .unwrap();

        let planned = conversion.planned_tracks();
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].action, TrackAction::Passthrough);
        let discarded = conversion.discarded_tracks();
        assert_eq!(discarded.len(), 1);
        assert_eq!(discarded[0].track.codec, Some(Codec::Ac3));
        assert_eq!(discarded[0].reason, DiscardReason::NoEncodableTargetCodec);

        conversion.execute().await.unwrap();
        assert!(conversion.execute().await.is_err());

        let result = Input::from_bytes(buffer.bytes().await);
        let tracks = result.tracks().await.unwrap();
        assert_eq!(tracks.len(), 1);
        let original = collect(&source.tracks().await.unwrap()[0]).await;
        let copied = collect(&tracks[0]).await;
        assert_eq!(copied.len(), 75);
        for (a, b) in original.iter().zip(&copied) {
            assert_eq!(a.data, b.data);
            assert_eq!(a.packet_type, b.packet_type);
            assert!((a.timestamp - b.timestamp).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_transcodes_through_backend() {
        let source = Input::from_bytes(matroska_source(&[Codec::Ac3]).await);
        let buffer = BufferTarget::new();
        let output = Output::new(OutputFormat::webm(), Box::new(buffer.clone())).unwrap();
        let mut conversion = Conversion::init(&source, output, ConversionOptions::default(), Some(opus_backend(false)))
            .await
            .unwrap();
        assert!(conversion.discarded_tracks().is_empty());
        assert_eq!(
            conversion.planned_tracks()[1].action,
            TrackAction::Transcode { codec: Codec::Opus }
        );
        conversion.execute().await.unwrap();
        assert_eq!(
            conversion.output().mime_type().await.unwrap(),
            "video/webm; codecs=\"vp09.00.10.08, opus\""
        );

        let result = Input::from_bytes(buffer.bytes().await);
        let audio = result.primary_audio_track().await.unwrap().unwrap();
        assert_eq!(audio.codec(), Some(Codec::Opus));
        let packets = collect(&audio).await;
        assert_eq!(packets.len(), 94);
        assert!(packets.iter().all(|p| p.data == vec![0xFC; 20]));
    }

    #[tokio::test]
    async fn test_transcoder_failure_cancels_output() {
        let source = Input::from_bytes(matroska_source(&[Codec::Ac3]).await);
        let buffer = BufferTarget::new();
        let output = Output::new(OutputFormat::webm(), Box::new(buffer.clone())).unwrap();
        let mut conversion = Conversion::init(&source, output, ConversionOptions::default(), Some(opus_backend(true)))
            .await
            .unwrap();
        assert!(matches!(
            conversion.execute().await,
            Err(MediaError::Conversion(_))
        ));
        assert!(conversion.output().resolved_mime_type().is_none());
    }

    #[tokio::test]
    async fn test_trim_rebases_from_key_frame() {
        let source = Input::from_bytes(matroska_source(&[Codec::Ac3]).await);
        let buffer = BufferTarget::new();
        let output = Output::new(OutputFormat::matroska(), Box::new(buffer.clone())).unwrap();
        let options = ConversionOptions {
            start: 1.0,
            end: Some(2.0),
            discard_audio: true,
            ..Default::default()
        };
        let mut conversion = Conversion::init(&source, output, options, None).await.unwrap();
        assert_eq!(conversion.discarded_tracks()[0].reason, DiscardReason::DiscardedByUser);
        conversion.execute().await.unwrap();

        let result = Input::from_bytes(buffer.bytes().await);
        let video = result.primary_video_track().await.unwrap().unwrap();
        let packets = collect(&video).await;
        assert_eq!(packets.len(), 25);
        assert!(packets[0].is_key());
        assert_eq!(packets[0].timestamp, 0.0);
        assert_eq!(packets[0].data[0], 25);
        assert!((packets[24].timestamp - 0.96).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_track_limits_and_framing_for_adts() {
        let source = Input::from_bytes(matroska_source(&[Codec::Aac, Codec::Aac]).await);
        let buffer = BufferTarget::new();
        let output = Output::new(OutputFormat::Adts, Box::new(buffer.clone())).unwrap();
        let mut conversion = Conversion::init(&source, output, ConversionOptions::default(), None)
            .await
            .unwrap();

        let reasons: Vec<(TrackType, DiscardReason)> = conversion
            .discarded_tracks()
            .iter()
            .map(|d| (d.track.track_type, d.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                (TrackType::Video, DiscardReason::MaxTrackCountOfTypeReached),
                (TrackType::Audio, DiscardReason::MaxTrackCountOfTypeReached),
            ]
        );
        assert_eq!(conversion.planned_tracks()[0].action, TrackAction::ConvertBitstream);
        conversion.execute().await.unwrap();

        let bytes = buffer.bytes().await;
        let mut frames = 0;
        let mut pos = 0;
        while pos < bytes.len() {
            let header = AdtsHeader::parse(&bytes[pos..]).unwrap();
            assert_eq!(header.payload_length(), 50);
            pos += header.frame_length;
            frames += 1;
        }
        assert_eq!(frames, 93);
    }

    #[tokio::test]
    async fn test_no_usable_track() {
        let buffer = BufferTarget::new();
        let mut output = Output::new(OutputFormat::matroska(), Box::new(buffer.clone())).unwrap();
        let id = output.add_audio_track(Codec::Ac3, TrackOptions::default()).unwrap();
        output.start().await.unwrap();
        let packet = EncodedPacket::new(vec![0x0B, 0x77, 0, 0], PacketType::Key, 0.0, AUDIO_FRAME);
        output.add_packet(id, packet, Some(audio_config(Codec::Ac3))).await.unwrap();
        output.finalize().await.unwrap();

        let source = Input::from_bytes(buffer.bytes().await);
        let output = Output::new(OutputFormat::webm(), Box::new(BufferTarget::new())).unwrap();
        assert!(matches!(
            Conversion::init(&source, output, ConversionOptions::default(), None).await,
            Err(MediaError::Conversion(_))
        ));

        let output = Output::new(OutputFormat::webm(), Box::new(BufferTarget::new())).unwrap();
        let options = ConversionOptions {
            start: 2.0,
            end: Some(1.0),
            ..Default::default()
        };
        assert!(matches!(
            Conversion::init(&source, output, options, None).await,
            Err(MediaError::Configuration(_))
        ));
    }
}
