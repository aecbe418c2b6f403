use super::scanner::TsScanner;
use super::{SYNC_BYTE, TS_PACKET_SIZE};
use crate::codec::Codec;
use crate::demux::index::VIDEO_REORDER_MARGIN;
use crate::demux::{ChunkScanner, ContainerFormat, Demuxer, PacketIndex, PacketLookup, ScanBatch};
use crate::errors::{MediaError, MediaResult};
use crate::streams::SourceReader;
use crate::track::{AudioTrackInfo, DecoderConfig, Track, TrackType, VideoTrackInfo};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

const M2TS_PACKET_SIZE: usize = 192;
/// Bytes scanned at open while waiting for every stream's first packet.
const PROBE_LIMIT: u64 = 8 << 20;
/// Step size while probing, so track listing stops close to the last config.
const PROBE_STEP: u64 = 64 * TS_PACKET_SIZE as u64;

/// Packet size and sync byte offset of the stream.
async fn detect_packet_layout(reader: &SourceReader) -> MediaResult<(usize, usize)> {
    let head = reader.read(0, (M2TS_PACKET_SIZE * 3) as u64).await?;
    let synced = |size: usize, offset: usize| {
        let positions: Vec<usize> = (0..3)
            .map(|i| offset + i * size)
            .filter(|p| *p < head.len())
            .collect();
        !positions.is_empty() && positions.iter().all(|p| head[*p] == SYNC_BYTE)
    };
    if synced(TS_PACKET_SIZE, 0) {
        Ok((TS_PACKET_SIZE, 0))
    } else if synced(M2TS_PACKET_SIZE, 4) {
        Ok((M2TS_PACKET_SIZE, 4))
    } else {
        Err(MediaError::format("no transport stream sync byte"))
    }
}

/// MPEG transport stream reader.
///
/// Opening scans in small steps until the PMT is known and each announced
/// stream has produced a decoder config. The rest of the stream is indexed in
/// `seek_chunk_size` steps as queries reach past what is known. Track ids
/// are the elementary stream PIDs.
pub struct TsDemuxer {
    tracks: Vec<Track>,
    configs: HashMap<u32, DecoderConfig>,
    index: PacketIndex,
}

impl TsDemuxer {
    pub async fn open(reader: Arc<SourceReader>, seek_chunk_size: u64) -> MediaResult<Self> {
        let (packet_size, sync_offset) = detect_packet_layout(&reader).await?;
        let mut scanner = TsScanner::new(packet_size, sync_offset, PROBE_STEP);
        let mut batch = ScanBatch {
            entries: Vec::new(),
            done: false,
        };
        loop {
            let step = scanner.scan_next(&reader).await?;
            batch.entries.extend(step.entries);
            if step.done {
                batch.done = true;
                break;
            }
            if scanner.streams_ready() {
                break;
            }
            if scanner.position() >= PROBE_LIMIT {
                warn!(
                    "stopped probing after {} bytes with streams still unconfigured",
                    scanner.position()
                );
                break;
            }
        }
        if !scanner.has_program() && !batch.done {
            return Err(MediaError::format("no program map table found"));
        }

        let mut tracks = Vec::new();
        let mut configs = HashMap::new();
        let mut retained = Vec::new();
        for stream in scanner.streams() {
            let Some(config) = stream.config else {
                debug!("pid {:#x} produced no usable packet, dropping it", stream.pid);
                continue;
            };
            let codec = Codec::from_codec_string(config.codec()).unwrap_or(stream.codec);
            let track_type = codec.track_type();
            let id = stream.pid as u32;
            tracks.push(Track {
                id,
                track_type,
                codec: Some(codec),
                internal_codec_id: format!("{:#04x}", stream.stream_type),
                time_resolution: 90_000,
                language: stream.language,
                video: config.as_video().map(|v| VideoTrackInfo {
                    display_width: v.coded_width,
                    display_height: v.coded_height,
                    rotation: 0,
                }),
                audio: config.as_audio().map(|a| AudioTrackInfo {
                    sample_rate: a.sample_rate,
                    channels: a.number_of_channels,
                }),
            });
            configs.insert(id, config);
            retained.push(stream.pid);
        }
        batch
            .entries
            .retain(|(id, _)| retained.contains(&(*id as u16)));
        info!(
            "opened MPEG-TS ({}-byte packets) with {} tracks",
            packet_size,
            tracks.len()
        );

        let scanner: Option<Box<dyn ChunkScanner>> = if batch.done {
            None
        } else {
            scanner.freeze(&retained);
            scanner.set_chunk_size(seek_chunk_size);
            Some(Box::new(scanner))
        };
        let mut index = PacketIndex::new(reader, scanner);
        for track in &tracks {
            let margin = match track.track_type {
                TrackType::Video => VIDEO_REORDER_MARGIN,
                _ => 0.0,
            };
            index = index.with_track(track.id, margin);
        }

        Ok(Self {
            tracks,
            configs,
            index: index.with_entries(batch),
        })
    }
}

#[async_trait]
impl Demuxer for TsDemuxer {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::MpegTs
    }

    fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    async fn decoder_config(&self, track_id: u32) -> MediaResult<Option<DecoderConfig>> {
        Ok(self.configs.get(&track_id).cloned())
    }

    fn packets(&self) -> &dyn PacketLookup {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aac::{prepend_adts_header, AudioSpecificConfig};
    use crate::decoder_config::tests::{PPS, SPS};
    use crate::mpegts::packet::{build_packet, AdaptationField};
    use crate::mpegts::pes::{build_pes_header, STREAM_ID_AUDIO, STREAM_ID_VIDEO};
    use crate::mpegts::psi::{build_pat, build_pmt, Pmt, PmtStream};
    use crate::packet::PacketRetrievalOptions;
    use crate::streams::MemorySource;

    const VIDEO_PID: u16 = 0x100;
    const AUDIO_PID: u16 = 0x101;
    const PMT_PID: u16 = 0x1000;

    struct TsBuilder {
        out: Vec<u8>,
        counters: HashMap<u16, u8>,
    }

    impl TsBuilder {
        fn new() -> Self {
            Self {
                out: Vec::new(),
                counters: HashMap::new(),
            }
        }

        fn write(&mut self, pid: u16, data: &[u8], adaptation: AdaptationField) {
            let mut rest = data;
            let mut first = true;
            while !rest.is_empty() {
                let cc = self.counters.entry(pid).or_insert(0);
                let field = if first { adaptation } else { AdaptationField::default() };
                let (packet, taken) = build_packet(pid, first, *cc, field, rest);
                *cc = (*cc + 1) & 0x0F;
                self.out.extend_from_slice(&packet);
                rest = &rest[taken..];
                first = false;
            }
        }

        fn tables(&mut self, streams: Vec<PmtStream>) {
            let pat = [vec![0], build_pat(1, 1, PMT_PID)].concat();
            self.write(0, &pat, AdaptationField::default());
            let pmt = build_pmt(
                1,
                &Pmt {
                    pcr_pid: VIDEO_PID,
                    streams,
                },
            );
            self.write(PMT_PID, &[vec![0], pmt].concat(), AdaptationField::default());
        }

        fn video(&mut self, pts: u64, key: bool) {
            let mut es = Vec::new();
            if key {
                for nal in [&SPS[..], &PPS[..]] {
                    es.extend_from_slice(&[0, 0, 0, 1]);
                    es.extend_from_slice(nal);
                }
                es.extend_from_slice(&[0, 0, 0, 1, 0x65]);
            } else {
                es.extend_from_slice(&[0, 0, 0, 1, 0x41]);
            }
            es.extend(std::iter::repeat(0x5A).take(300));
            let mut pes = build_pes_header(STREAM_ID_VIDEO, pts, None, es.len(), false);
            pes.extend_from_slice(&es);
            let adaptation = AdaptationField {
                random_access: key,
                pcr: Some(pts * 300),
            };
            self.write(VIDEO_PID, &pes, adaptation);
        }

        /// Two AAC frames of 1024 samples at 48 kHz.
        fn audio(&mut self, pts: u64) {
            let asc = AudioSpecificConfig::new(2, 48000, 2);
            let mut es = prepend_adts_header(&[0x11; 40], &asc).unwrap();
            es.extend(prepend_adts_header(&[0x22; 40], &asc).unwrap());
            let mut pes = build_pes_header(STREAM_ID_AUDIO, pts, None, es.len(), true);
            pes.extend_from_slice(&es);
            self.write(AUDIO_PID, &pes, AdaptationField::default());
        }
    }

    fn program() -> Vec<PmtStream> {
        vec![
            PmtStream {
                stream_type: 0x1B,
                pid: VIDEO_PID,
                descriptors: Vec::new(),
            },
            PmtStream {
                stream_type: 0x0F,
                pid: AUDIO_PID,
                descriptors: Vec::new(),
            },
            // private data without recognizable descriptors is skipped
            PmtStream {
                stream_type: 0x06,
                pid: 0x102,
                descriptors: Vec::new(),
            },
        ]
    }

    /// One second of 30 fps video with a key frame every 10 frames, and audio.
    fn sample_stream() -> Vec<u8> {
        let mut ts = TsBuilder::new();
        let start = 126_000u64;
        for frame in 0..30u64 {
            if frame % 10 == 0 {
                ts.tables(program());
            }
            ts.video(start + frame * 3000, frame % 10 == 0);
            if frame % 2 == 0 {
                ts.audio(start + frame * 3000);
            }
        }
        ts.out
    }

    async fn open(data: Vec<u8>, chunk: u64) -> TsDemuxer {
        let reader = Arc::new(SourceReader::new(Arc::new(MemorySource::new(data))));
        TsDemuxer::open(reader, chunk).await.unwrap()
    }

    #[tokio::test]
    async fn test_tracks_from_pmt() {
        let demuxer = open(sample_stream(), 1 << 20).await;
        let tracks = demuxer.tracks();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].id, VIDEO_PID as u32);
        assert_eq!(tracks[0].codec, Some(Codec::Avc));
        assert_eq!(tracks[0].internal_codec_id, "0x1b");
        assert_eq!(tracks[0].video.unwrap().display_width, 640);
        assert_eq!(tracks[1].codec, Some(Codec::Aac));
        assert_eq!(tracks[1].audio.unwrap().sample_rate, 48000);

        let config = demuxer.decoder_config(VIDEO_PID as u32).await.unwrap().unwrap();
        assert_eq!(config.codec(), "avc1.4d401e");
        assert_eq!(config.description(), None);
    }

    #[tokio::test]
    async fn test_small_chunks_index_lazily() {
        let demuxer = open(sample_stream(), 2 * TS_PACKET_SIZE as u64).await;
        let packets = demuxer.packets();
        assert!(!demuxer.index.is_complete().await);

        let key = packets
            .key_packet_at(VIDEO_PID as u32, 1.4 + 0.5, PacketRetrievalOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert!((key.timestamp - (1.4 + 0.3333)).abs() < 1e-3);
        assert!(key.is_key());
        assert_eq!(&key.data[..4], &[0, 0, 0, 1]);
        assert_eq!(key.data.len(), 4 + SPS.len() + 4 + PPS.len() + 5 + 300);

        let last = packets
            .packet_at(VIDEO_PID as u32, f64::INFINITY, PacketRetrievalOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert!((last.timestamp - (1.4 + 29.0 / 30.0)).abs() < 1e-3);
        assert!(demuxer.index.is_complete().await);
    }

    #[tokio::test]
    async fn test_audio_split_per_frame() {
        let demuxer = open(sample_stream(), 1 << 20).await;
        let packets = demuxer.packets();
        let options = PacketRetrievalOptions::default();
        let first = packets
            .first_packet(AUDIO_PID as u32, options)
            .await
            .unwrap()
            .unwrap();
        assert!((first.timestamp - 1.4).abs() < 1e-9);
        assert!((first.duration - 1024.0 / 48000.0).abs() < 1e-9);
        assert_eq!(first.data.len(), 47);
        assert_eq!(first.data[7], 0x11);

        let second = packets
            .next_packet(AUDIO_PID as u32, first.sequence_number, options)
            .await
            .unwrap()
            .unwrap();
        assert!((second.timestamp - (1.4 + 1024.0 / 48000.0)).abs() < 1e-9);
        assert_eq!(second.data[7], 0x22);
        packets
            .packet_at(AUDIO_PID as u32, f64::INFINITY, options)
            .await
            .unwrap();
        assert_eq!(demuxer.index.indexed_count(AUDIO_PID as u32).await, 30);
    }

    #[tokio::test]
    async fn test_m2ts_packets() {
        let ts = sample_stream();
        let mut m2ts = Vec::new();
        for (i, packet) in ts.chunks(TS_PACKET_SIZE).enumerate() {
            m2ts.extend_from_slice(&(i as u32).to_be_bytes());
            m2ts.extend_from_slice(packet);
        }
        let demuxer = open(m2ts, 1 << 20).await;
        assert_eq!(demuxer.tracks().len(), 2);
        let first = demuxer
            .packets()
            .first_packet(VIDEO_PID as u32, PacketRetrievalOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&first.data[4..4 + SPS.len()], &SPS[..]);
    }

    #[tokio::test]
    async fn test_garbage_is_rejected() {
        let reader = Arc::new(SourceReader::new(Arc::new(MemorySource::new(vec![0u8; 1000]))));
        assert!(TsDemuxer::open(reader, 1 << 20).await.is_err());
    }
}
