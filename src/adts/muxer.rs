use crate::aac::{prepend_adts_header, AdtsHeader, AudioSpecificConfig};
use crate::codec::Codec;
use crate::errors::{MediaError, MediaResult};
use crate::mux::{Muxer, OutputTrack, Writer};
use crate::packet::EncodedPacket;
use crate::track::DecoderConfig;
use async_trait::async_trait;
use log::info;

/// Concatenated ADTS frames of a single AAC track.
///
/// Packets described by an AudioSpecificConfig are raw AAC and get a header
/// each; packets without one must already be ADTS frames.
pub struct AdtsMuxer {
    writer: Writer,
    track_id: Option<u32>,
    /// `Some` once the first packet decided the framing.
    raw: Option<Option<AudioSpecificConfig>>,
    frames: usize,
}

impl AdtsMuxer {
    pub fn new(writer: Writer) -> Self {
        Self {
            writer,
            track_id: None,
            raw: None,
            frames: 0,
        }
    }
}

#[async_trait]
impl Muxer for AdtsMuxer {
    async fn start(&mut self, tracks: &[OutputTrack]) -> MediaResult<()> {
        match tracks {
            [track] if track.codec == Codec::Aac => {
                self.track_id = Some(track.id);
                Ok(())
            }
            _ => Err(MediaError::configuration(
                "ADTS output takes exactly one AAC track",
            )),
        }
    }

    async fn add_packet(
        &mut self,
        track: &OutputTrack,
        packet: &EncodedPacket,
        config: Option<&DecoderConfig>,
    ) -> MediaResult<()> {
        if self.track_id != Some(track.id) {
            return Err(MediaError::configuration(format!("unknown track {}", track.id)));
        }
        if self.raw.is_none() {
            let asc = config
                .and_then(DecoderConfig::description)
                .map(AudioSpecificConfig::parse)
                .transpose()?;
            self.raw = Some(asc);
        }
        match self.raw.as_ref().and_then(Option::as_ref) {
            Some(asc) => {
                let frame = prepend_adts_header(&packet.data, asc)?;
                self.writer.write(&frame).await?;
            }
            None => {
                AdtsHeader::parse(&packet.data).map_err(|_| {
                    MediaError::configuration(
                        "AAC packet is neither ADTS framed nor described by an AudioSpecificConfig",
                    )
                })?;
                self.writer.write(&packet.data).await?;
            }
        }
        self.frames += 1;
        Ok(())
    }

    async fn abort(&mut self) -> MediaResult<()> {
        self.writer.finish().await
    }

    async fn finalize(&mut self) -> MediaResult<()> {
        self.writer.finish().await?;
        info!("adts: wrote {} frames, {} bytes", self.frames, self.writer.position());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adts::AdtsDemuxer;
    use crate::aac::strip_adts_header;
    use crate::decoder_config::aac_from_asc;
    use crate::demux::Demuxer;
    use crate::packet::{PacketRetrievalOptions, PacketType};
    use crate::streams::{BufferTarget, MemorySource, SourceReader};
    use std::sync::Arc;

    fn aac_track() -> OutputTrack {
        OutputTrack {
            id: 1,
            codec: Codec::Aac,
            language: "und".to_string(),
            rotation: 0,
        }
    }

    #[tokio::test]
    async fn test_raw_frames_round_trip() {
        let buffer = BufferTarget::new();
        let mut muxer = AdtsMuxer::new(Writer::new(Box::new(buffer.clone())));
        let track = aac_track();
        let config = aac_from_asc(&[0x11, 0x90]).unwrap();
        muxer.start(&[track.clone()]).await.unwrap();
        for i in 0..5u8 {
            let packet = EncodedPacket::new(vec![i; 64], PacketType::Key, i as f64 * 1024.0 / 48000.0, 1024.0 / 48000.0);
            muxer.add_packet(&track, &packet, Some(&config)).await.unwrap();
        }
        muxer.finalize().await.unwrap();

        let bytes = buffer.bytes().await;
        assert_eq!(bytes.len(), 5 * (7 + 64));
        let reader = Arc::new(SourceReader::new(Arc::new(MemorySource::new(bytes))));
        let demuxer = AdtsDemuxer::open(reader, 1 << 20).await.unwrap();
        assert_eq!(demuxer.tracks()[0].audio.unwrap().channels, 2);
        let packet = demuxer
            .packets()
            .packet_at(1, 3.0 * 1024.0 / 48000.0, PacketRetrievalOptions::default())
            .await
            .unwrap()
            .unwrap();
        let (_, raw) = strip_adts_header(&packet.data).unwrap();
        assert_eq!(raw, &[3u8; 64][..]);
    }

    #[tokio::test]
    async fn test_unframed_packet_without_config() {
        let mut muxer = AdtsMuxer::new(Writer::new(Box::new(BufferTarget::new())));
        let track = aac_track();
        muxer.start(&[track.clone()]).await.unwrap();
        let packet = EncodedPacket::new(vec![0x21; 10], PacketType::Key, 0.0, 0.02);
        assert!(muxer.add_packet(&track, &packet, None).await.is_err());
    }

    #[tokio::test]
    async fn test_requires_single_aac_track() {
        let mut muxer = AdtsMuxer::new(Writer::new(Box::new(BufferTarget::new())));
        let mut mp3 = aac_track();
        mp3.codec = Codec::Mp3;
        assert!(muxer.start(&[mp3]).await.is_err());
    }
}
