use super::packet::{build_packet, AdaptationField};
use super::pes::{build_pes_header, to_clock, STREAM_ID_AUDIO, STREAM_ID_PRIVATE_1, STREAM_ID_VIDEO};
use super::psi::{build_pat, build_pmt, Descriptor, Pmt, PmtStream};
use super::{PAT_PID, TS_PACKET_SIZE};
use crate::codec::Codec;
use crate::conversion::BitstreamAdapter;
use crate::errors::{MediaError, MediaResult};
use crate::mux::{MpegTsOptions, Muxer, OutputFormat, OutputTrack, Writer};
use crate::packet::EncodedPacket;
use crate::track::{DecoderConfig, TrackType};
use async_trait::async_trait;
use log::{debug, info};
use std::collections::HashMap;

const PROGRAM_NUMBER: u16 = 1;
const TRANSPORT_STREAM_ID: u16 = 1;
const DESCRIPTOR_LANGUAGE: u8 = 0x0A;
const DESCRIPTOR_AC3: u8 = 0x6A;

struct StreamWriter {
    pid: u16,
    stream_id: u8,
    is_video: bool,
    /// Boxed input (a config with a description) is rewritten to Annex B or ADTS.
    framing: Option<BitstreamAdapter>,
}

fn stream_type(codec: Codec) -> u8 {
    match codec {
        Codec::Avc => 0x1B,
        Codec::Hevc => 0x24,
        Codec::Aac => 0x0F,
        Codec::Mp3 => 0x03,
        Codec::Eac3 => 0x87,
        _ => 0x81,
    }
}

/// MPEG transport stream writer.
///
/// The program is fixed at `start`: PAT and PMT list every declared track and
/// are repeated ahead of each key packet of the PCR stream. Video PES packets
/// are unbounded, audio PES packets carry one frame each.
pub struct TsMuxer {
    writer: Writer,
    options: MpegTsOptions,
    streams: HashMap<u32, StreamWriter>,
    pmt: Option<Pmt>,
    continuity: HashMap<u16, u8>,
    last_pcr: u64,
    pes_count: usize,
}

impl TsMuxer {
    pub fn new(writer: Writer, options: MpegTsOptions) -> Self {
        Self {
            writer,
            options,
            streams: HashMap::new(),
            pmt: None,
            continuity: HashMap::new(),
            last_pcr: 0,
            pes_count: 0,
        }
    }

    fn next_continuity(&mut self, pid: u16) -> u8 {
        let counter = self.continuity.entry(pid).or_insert(0);
        let current = *counter;
        *counter = (current + 1) & 0x0F;
        current
    }

    /// Packetize a section, pointer field first.
    async fn write_section(&mut self, pid: u16, section: &[u8]) -> MediaResult<()> {
        let mut payload = Vec::with_capacity(section.len() + 1);
        payload.push(0);
        payload.extend_from_slice(section);
        let mut rest = payload.as_slice();
        let mut first = true;
        while !rest.is_empty() {
            let cc = self.next_continuity(pid);
            let (packet, taken) = build_packet(pid, first, cc, AdaptationField::default(), rest);
            self.writer.write(&packet).await?;
            rest = &rest[taken..];
            first = false;
        }
        Ok(())
    }

    async fn write_tables(&mut self) -> MediaResult<()> {
        let Some(pmt) = self.pmt.as_ref() else {
            return Ok(());
        };
        let pmt_section = build_pmt(PROGRAM_NUMBER, pmt);
        let pat_section = build_pat(TRANSPORT_STREAM_ID, PROGRAM_NUMBER, self.options.pmt_pid);
        self.write_section(PAT_PID, &pat_section).await?;
        self.write_section(self.options.pmt_pid, &pmt_section).await
    }

    async fn write_pes(&mut self, pid: u16, data: &[u8], adaptation: AdaptationField) -> MediaResult<()> {
        let mut rest = data;
        let mut first = true;
        while !rest.is_empty() {
            let cc = self.next_continuity(pid);
            let field = if first { adaptation } else { AdaptationField::default() };
            let (packet, taken) = build_packet(pid, first, cc, field, rest);
            self.writer.write(&packet).await?;
            rest = &rest[taken..];
            first = false;
        }
        Ok(())
    }
}

#[async_trait]
impl Muxer for TsMuxer {
    async fn start(&mut self, tracks: &[OutputTrack]) -> MediaResult<()> {
        let mut ordered: Vec<&OutputTrack> = tracks
            .iter()
            .filter(|t| t.track_type() == TrackType::Video)
            .collect();
        ordered.extend(tracks.iter().filter(|t| t.track_type() == TrackType::Audio));
        if let Some(track) = tracks.iter().find(|t| t.track_type() == TrackType::Subtitle) {
            return Err(MediaError::configuration(format!(
                "MPEG-TS cannot carry subtitle track {}",
                track.id
            )));
        }

        let mut streams = Vec::with_capacity(ordered.len());
        let (mut video_count, mut audio_count) = (0u8, 0u8);
        for (i, track) in ordered.iter().enumerate() {
            let pid = self.options.pid_base + i as u16;
            let is_video = track.track_type() == TrackType::Video;
            let stream_id = match track.codec {
                _ if is_video => {
                    video_count += 1;
                    STREAM_ID_VIDEO + (video_count - 1)
                }
                Codec::Ac3 | Codec::Eac3 => STREAM_ID_PRIVATE_1,
                _ => {
                    audio_count += 1;
                    STREAM_ID_AUDIO + (audio_count - 1)
                }
            };
            let mut descriptors = Vec::new();
            if track.codec == Codec::Ac3 {
                descriptors.push(Descriptor {
                    tag: DESCRIPTOR_AC3,
                    data: vec![0],
                });
            }
            if !is_video && track.language.len() == 3 {
                let mut data = track.language.as_bytes().to_vec();
                data.push(0);
                descriptors.push(Descriptor {
                    tag: DESCRIPTOR_LANGUAGE,
                    data,
                });
            }
            streams.push(PmtStream {
                stream_type: stream_type(track.codec),
                pid,
                descriptors,
            });
            self.streams.insert(
                track.id,
                StreamWriter {
                    pid,
                    stream_id,
                    is_video,
                    framing: None,
                },
            );
            debug!("mpegts: track {} ({}) on pid {:#x}", track.id, track.codec, pid);
        }

        let pcr_pid = streams.first().map_or(0x1FFF, |s| s.pid);
        self.pmt = Some(Pmt { pcr_pid, streams });
        self.write_tables().await
    }

    async fn add_packet(
        &mut self,
        track: &OutputTrack,
        packet: &EncodedPacket,
        config: Option<&DecoderConfig>,
    ) -> MediaResult<()> {
        let stream = self
            .streams
            .get_mut(&track.id)
            .ok_or_else(|| MediaError::configuration(format!("unknown track {}", track.id)))?;
        if stream.framing.is_none() {
            if let Some(config) = config {
                if config.track_type() != track.track_type() {
                    return Err(MediaError::configuration(format!(
                        "decoder config does not match track {}",
                        track.id
                    )));
                }
            }
            let format = OutputFormat::MpegTs(self.options);
            stream.framing = Some(BitstreamAdapter::plan(track.codec, config, &format)?);
        }
        let payload = match stream.framing.as_ref() {
            Some(framing) => framing.convert(packet)?.data,
            None => packet.data.clone(),
        };
        let (pid, stream_id, is_video) = (stream.pid, stream.stream_id, stream.is_video);

        let is_pcr = self.pmt.as_ref().is_some_and(|p| p.pcr_pid == pid);
        if is_pcr && packet.is_key() {
            self.write_tables().await?;
        }

        let pts = to_clock(packet.timestamp);
        let mut pes = build_pes_header(stream_id, pts, None, payload.len(), !is_video);
        pes.extend_from_slice(&payload);

        let pcr = if is_pcr {
            let ticks = packet.timestamp.max(0.0) * 90_000.0;
            self.last_pcr = self.last_pcr.max(ticks.round() as u64 * 300);
            Some(self.last_pcr)
        } else {
            None
        };
        let adaptation = AdaptationField {
            random_access: packet.is_key(),
            pcr,
        };
        self.write_pes(pid, &pes, adaptation).await?;
        self.pes_count += 1;
        Ok(())
    }

    async fn abort(&mut self) -> MediaResult<()> {
        self.writer.finish().await
    }

    async fn finalize(&mut self) -> MediaResult<()> {
        self.writer.finish().await?;
        info!(
            "mpegts: wrote {} PES packets in {} transport packets",
            self.pes_count,
            self.writer.position() / TS_PACKET_SIZE as u64
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpegts::packet::parse_header;
    use crate::mpegts::pes::parse_pes_header;
    use crate::mpegts::psi::{parse_pmt, parse_section};
    use crate::packet::PacketType;
    use crate::streams::BufferTarget;

    fn track(id: u32, codec: Codec) -> OutputTrack {
        OutputTrack {
            id,
            codec,
            language: "eng".to_string(),
            rotation: 0,
        }
    }

    fn packets(bytes: &[u8]) -> Vec<&[u8]> {
        assert_eq!(bytes.len() % TS_PACKET_SIZE, 0);
        bytes.chunks(TS_PACKET_SIZE).collect()
    }

    #[tokio::test]
    async fn test_pids_and_tables_at_start() {
        let buffer = BufferTarget::new();
        let mut muxer = TsMuxer::new(Writer::new(Box::new(buffer.clone())), MpegTsOptions::default());
        // audio declared first still gets the PID after video
        muxer
            .start(&[track(1, Codec::Aac), track(2, Codec::Avc), track(3, Codec::Ac3)])
            .await
            .unwrap();
        muxer.finalize().await.unwrap();

        let bytes = buffer.bytes().await;
        let ts = packets(&bytes);
        assert_eq!(ts.len(), 2);
        assert_eq!(parse_header(ts[0]).unwrap().pid, PAT_PID);
        let pmt_header = parse_header(ts[1]).unwrap();
        assert_eq!(pmt_header.pid, 0x1000);
        let payload = &ts[1][pmt_header.payload_offset.unwrap() + 1..];
        let section = parse_section(payload).unwrap();
        let pmt = parse_pmt(section.body).unwrap();
        assert_eq!(pmt.pcr_pid, 0x100);
        let layout: Vec<(u8, u16)> = pmt.streams.iter().map(|s| (s.stream_type, s.pid)).collect();
        assert_eq!(layout, vec![(0x1B, 0x100), (0x0F, 0x101), (0x81, 0x102)]);
        assert!(pmt.streams[1].descriptors.iter().any(|d| d.data == b"eng\0"));
    }

    #[tokio::test]
    async fn test_key_packet_repeats_tables_and_sets_pcr() {
        let buffer = BufferTarget::new();
        let mut muxer = TsMuxer::new(Writer::new(Box::new(buffer.clone())), MpegTsOptions::default());
        let video = track(1, Codec::Avc);
        muxer.start(&[video.clone()]).await.unwrap();
        let frame = [0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00];
        let key = EncodedPacket::new(frame.to_vec(), PacketType::Key, 1.0, 1.0 / 30.0);
        let delta = EncodedPacket::new(vec![0, 0, 0, 1, 0x41, 0x9A], PacketType::Delta, 1.0 + 1.0 / 30.0, 1.0 / 30.0);
        muxer.add_packet(&video, &key, None).await.unwrap();
        muxer.add_packet(&video, &delta, None).await.unwrap();
        muxer.finalize().await.unwrap();

        let bytes = buffer.bytes().await;
        let headers: Vec<_> = packets(&bytes).iter().map(|p| parse_header(p).unwrap()).collect();
        let pids: Vec<u16> = headers.iter().map(|h| h.pid).collect();
        assert_eq!(pids, vec![0, 0x1000, 0, 0x1000, 0x100, 0x100]);
        assert_eq!(headers[2].continuity_counter, 1);
        assert!(headers[4].random_access);
        assert_eq!(headers[4].pcr, Some(90_000 * 300));
        assert!(!headers[5].random_access);

        let pes_start = headers[4].payload_offset.unwrap();
        let pes = parse_pes_header(&bytes[4 * TS_PACKET_SIZE + pes_start..]).unwrap();
        assert_eq!(pes.stream_id, STREAM_ID_VIDEO);
        assert_eq!(pes.pts, Some(90_000));
        assert_eq!(pes.packet_length, 0);
    }

    #[tokio::test]
    async fn test_raw_aac_is_wrapped_in_adts() {
        let buffer = BufferTarget::new();
        let mut muxer = TsMuxer::new(Writer::new(Box::new(buffer.clone())), MpegTsOptions::default());
        let audio = track(1, Codec::Aac);
        muxer.start(&[audio.clone()]).await.unwrap();
        let config = crate::decoder_config::aac_from_asc(&[0x12, 0x10]).unwrap();
        let packet = EncodedPacket::new(vec![0x21; 50], PacketType::Key, 0.0, 1024.0 / 44100.0);
        muxer.add_packet(&audio, &packet, Some(&config)).await.unwrap();
        muxer.finalize().await.unwrap();

        let bytes = buffer.bytes().await;
        let ts = packets(&bytes);
        let header = parse_header(ts[2]).unwrap();
        let data = &ts[2][header.payload_offset.unwrap()..];
        let pes = parse_pes_header(data).unwrap();
        assert_eq!(pes.total_length(), Some(pes.header_length + 7 + 50));
        let frame = &data[pes.header_length..];
        assert_eq!(&frame[..2], &[0xFF, 0xF1]);
        assert_eq!(&frame[7..57], &[0x21; 50][..]);
    }

    #[tokio::test]
    async fn test_boxed_avc_carries_parameter_sets_once() {
        use crate::avc::{annex_b_to_length_prefixed, AvccConfig, NalUnitFormat, NalUnitIter};
        use crate::decoder_config::tests::{PPS, SPS};
        use crate::demux::Input;
        use crate::packet::PacketRetrievalOptions;

        let mut in_band = Vec::new();
        for nal in [&SPS[..], &PPS[..], &[0x65, 0x88, 0x84][..]] {
            in_band.extend_from_slice(&[0, 0, 0, 1]);
            in_band.extend_from_slice(nal);
        }
        let record = AvccConfig::from_annex_b(&in_band).unwrap().to_bytes();
        let config = crate::decoder_config::avc_from_annex_b(&in_band)
            .unwrap()
            .with_description(Some(record));

        let buffer = BufferTarget::new();
        let mut muxer = TsMuxer::new(Writer::new(Box::new(buffer.clone())), MpegTsOptions::default());
        let video = track(1, Codec::Avc);
        muxer.start(&[video.clone()]).await.unwrap();
        let with_sets = annex_b_to_length_prefixed(&in_band, 4).unwrap();
        let bare = annex_b_to_length_prefixed(&[0, 0, 0, 1, 0x65, 0x88, 0x84], 4).unwrap();
        muxer
            .add_packet(&video, &EncodedPacket::new(with_sets, PacketType::Key, 0.0, 1.0), Some(&config))
            .await
            .unwrap();
        muxer
            .add_packet(&video, &EncodedPacket::new(bare, PacketType::Key, 1.0, 1.0), None)
            .await
            .unwrap();
        muxer.finalize().await.unwrap();

        let input = Input::from_bytes(buffer.bytes().await);
        let tracks = input.tracks().await.unwrap();
        let mut cursor = tracks[0].packet_sink().packets(PacketRetrievalOptions::default());
        let mut sps_counts = Vec::new();
        while let Some(packet) = cursor.next().await.unwrap() {
            let count = NalUnitIter::new(&packet.data, NalUnitFormat::AnnexB)
                .filter(|nal| nal.slice(&packet.data).first().is_some_and(|h| h & 0x1F == 7))
                .count();
            sps_counts.push(count);
        }
        assert_eq!(sps_counts, vec![1, 1]);
    }
}
