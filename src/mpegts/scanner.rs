//! Chunked transport stream scanner feeding the packet index.
//!
//! Each step parses `chunk_size` bytes worth of transport packets. PES
//! payloads are reassembled per PID; a packet's location is the list of
//! transport payload ranges it was assembled from, so payloads are read back
//! without copying them into the index.

use super::packet::parse_header;
use super::pes::{parse_pes_header, TimestampUnwrapper, CLOCK_RATE};
use super::psi::{parse_pat, parse_pmt, parse_section, PmtStream, SectionAssembler, TABLE_PAT, TABLE_PMT};
use super::{PAT_PID, SYNC_BYTE, TS_PACKET_SIZE};
use crate::ac3::find_ac3_frames;
use crate::aac::find_adts_frames;
use crate::avc::{is_idr_packet, NalUnitFormat};
use crate::codec::Codec;
use crate::decoder_config;
use crate::demux::{ChunkScanner, IndexEntry, PacketLocation, ScanBatch};
use crate::errors::MediaResult;
use crate::hevc::is_irap_packet;
use crate::mpeg_audio::find_mpeg_audio_frames;
use crate::streams::SourceReader;
use crate::track::DecoderConfig;
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

const DESCRIPTOR_REGISTRATION: u8 = 0x05;
const DESCRIPTOR_LANGUAGE: u8 = 0x0A;
const DESCRIPTOR_AC3: u8 = 0x6A;
const DESCRIPTOR_EAC3: u8 = 0x7A;

/// How a stream's PES payloads are cut into packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Avc,
    Hevc,
    Aac,
    MpegAudio,
    Ac3,
}

impl StreamKind {
    fn is_video(&self) -> bool {
        matches!(self, StreamKind::Avc | StreamKind::Hevc)
    }
}

/// Kind and codec of a PMT entry, `None` for stream types not handled.
pub fn classify(stream: &PmtStream) -> Option<(StreamKind, Codec)> {
    let has = |tag: u8| stream.descriptors.iter().any(|d| d.tag == tag);
    let registration = stream
        .descriptors
        .iter()
        .find(|d| d.tag == DESCRIPTOR_REGISTRATION)
        .map(|d| d.data.as_slice());
    match stream.stream_type {
        0x1B => Some((StreamKind::Avc, Codec::Avc)),
        0x24 => Some((StreamKind::Hevc, Codec::Hevc)),
        0x0F => Some((StreamKind::Aac, Codec::Aac)),
        0x03 | 0x04 => Some((StreamKind::MpegAudio, Codec::Mp3)),
        0x81 => Some((StreamKind::Ac3, Codec::Ac3)),
        0x87 => Some((StreamKind::Ac3, Codec::Eac3)),
        0x06 if has(DESCRIPTOR_EAC3) || registration == Some(b"EAC3") => {
            Some((StreamKind::Ac3, Codec::Eac3))
        }
        0x06 if has(DESCRIPTOR_AC3) || registration == Some(b"AC-3") => {
            Some((StreamKind::Ac3, Codec::Ac3))
        }
        _ => None,
    }
}

/// An elementary stream announced by the PMT
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub pid: u16,
    pub stream_type: u8,
    pub kind: StreamKind,
    pub codec: Codec,
    pub language: String,
    /// Derived from the first packet that carries enough parameters.
    pub config: Option<DecoderConfig>,
    pub packet_count: usize,
}

#[derive(Debug, Default)]
struct PesBuffer {
    pieces: Vec<(u64, u32)>,
    data: Vec<u8>,
    random_access: bool,
}

struct StreamState {
    info: StreamInfo,
    clock: TimestampUnwrapper,
    pes: Option<PesBuffer>,
    /// Presentation time following the last emitted audio frame.
    next_pts: Option<f64>,
}

impl StreamState {
    fn seconds(&mut self, raw: Option<u64>) -> Option<f64> {
        raw.map(|ts| self.clock.unwrap(ts) as f64 / CLOCK_RATE as f64)
    }

    fn finish(&mut self, pes: PesBuffer, entries: &mut Vec<(u32, IndexEntry)>) {
        let pid = self.info.pid;
        let Some(header) = parse_pes_header(&pes.data) else {
            debug!("pid {:#x}: dropping PES without a valid header", pid);
            return;
        };
        let end = header
            .total_length()
            .map_or(pes.data.len(), |total| total.min(pes.data.len()));
        if end <= header.header_length {
            return;
        }
        let payload = &pes.data[header.header_length..end];
        let dts = self.seconds(header.dts);
        let pts = self.seconds(header.pts);
        let pieces: Arc<[(u64, u32)]> = pes.pieces.into();
        let track_id = pid as u32;

        if self.info.kind.is_video() {
            let Some(pts) = pts else {
                debug!("pid {:#x}: video PES without PTS", pid);
                return;
            };
            let is_key = pes.random_access
                || match self.info.kind {
                    StreamKind::Hevc => is_irap_packet(payload, NalUnitFormat::AnnexB),
                    _ => is_idr_packet(payload, NalUnitFormat::AnnexB),
                };
            if self.info.config.is_none() {
                let config = match self.info.kind {
                    StreamKind::Hevc => decoder_config::hevc_from_annex_b(payload),
                    _ => decoder_config::avc_from_annex_b(payload),
                };
                self.info.config = config.ok();
            }
            entries.push((
                track_id,
                IndexEntry {
                    pts,
                    dts: dts.unwrap_or(pts),
                    duration: None,
                    is_key,
                    location: PacketLocation::Scattered {
                        pieces,
                        skip: header.header_length as u32,
                        size: payload.len() as u32,
                    },
                },
            ));
            self.info.packet_count += 1;
            return;
        }

        let frames: Vec<(usize, usize, f64)> = match self.info.kind {
            StreamKind::Aac => find_adts_frames(payload)
                .into_iter()
                .map(|(offset, h)| (offset, h.frame_length, h.duration()))
                .collect(),
            StreamKind::MpegAudio => find_mpeg_audio_frames(payload)
                .into_iter()
                .map(|(offset, h)| (offset, h.frame_size, h.duration()))
                .collect(),
            _ => find_ac3_frames(payload)
                .into_iter()
                .map(|(offset, info)| (offset, info.frame_size, info.duration()))
                .collect(),
        };
        if frames.is_empty() {
            debug!("pid {:#x}: no complete audio frame in PES", pid);
            return;
        }
        let mut time = pts.or(self.next_pts).unwrap_or(0.0);
        for (offset, size, duration) in frames {
            let frame = &payload[offset..offset + size];
            if self.info.config.is_none() {
                let config = match self.info.kind {
                    StreamKind::Aac => decoder_config::aac_from_adts(frame),
                    StreamKind::MpegAudio => decoder_config::mp3_from_frame(frame),
                    _ => decoder_config::ac3_from_frame(frame),
                };
                self.info.config = config.ok();
            }
            entries.push((
                track_id,
                IndexEntry {
                    pts: time,
                    dts: time,
                    duration: Some(duration),
                    is_key: true,
                    location: PacketLocation::Scattered {
                        pieces: pieces.clone(),
                        skip: (header.header_length + offset) as u32,
                        size: size as u32,
                    },
                },
            ));
            self.info.packet_count += 1;
            time += duration;
        }
        self.next_pts = Some(time);
    }
}

pub struct TsScanner {
    packet_size: usize,
    /// Bytes before the sync byte in each packet (4 for M2TS).
    sync_offset: usize,
    position: u64,
    chunk_size: u64,
    pat: SectionAssembler,
    pmt_pid: Option<u16>,
    pmt: SectionAssembler,
    streams: HashMap<u16, StreamState>,
    /// PIDs in PMT order.
    order: Vec<u16>,
    /// No new streams are accepted once the track list is published.
    frozen: bool,
    finished: bool,
}

impl TsScanner {
    pub fn new(packet_size: usize, sync_offset: usize, chunk_size: u64) -> Self {
        Self {
            packet_size,
            sync_offset,
            position: 0,
            chunk_size: chunk_size.max(packet_size as u64),
            pat: SectionAssembler::default(),
            pmt_pid: None,
            pmt: SectionAssembler::default(),
            streams: HashMap::new(),
            order: Vec::new(),
            frozen: false,
            finished: false,
        }
    }

    pub fn set_chunk_size(&mut self, chunk_size: u64) {
        self.chunk_size = chunk_size.max(self.packet_size as u64);
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn has_program(&self) -> bool {
        !self.order.is_empty()
    }

    /// Every announced stream has a decoder config.
    pub fn streams_ready(&self) -> bool {
        self.has_program()
            && self
                .streams
                .values()
                .all(|s| s.info.config.is_some())
    }

    pub fn streams(&self) -> Vec<StreamInfo> {
        self.order
            .iter()
            .filter_map(|pid| self.streams.get(pid))
            .map(|s| s.info.clone())
            .collect()
    }

    /// Keep only `pids` and stop accepting new streams.
    pub fn freeze(&mut self, pids: &[u16]) {
        self.streams.retain(|pid, _| pids.contains(pid));
        self.order.retain(|pid| pids.contains(pid));
        self.frozen = true;
    }

    fn handle_pat(&mut self, section: &[u8]) {
        let Ok(section) = parse_section(section) else {
            warn!("skipping invalid PAT section");
            return;
        };
        if section.table_id != TABLE_PAT {
            return;
        }
        let Some(&(program, pmt_pid)) = parse_pat(section.body).first() else {
            return;
        };
        if self.pmt_pid != Some(pmt_pid) {
            debug!("program {} maps to PMT pid {:#x}", program, pmt_pid);
            self.pmt_pid = Some(pmt_pid);
            self.pmt = SectionAssembler::default();
        }
    }

    fn handle_pmt(&mut self, section: &[u8]) {
        let pmt = match parse_section(section).and_then(|s| {
            if s.table_id == TABLE_PMT {
                parse_pmt(s.body).map(Some)
            } else {
                Ok(None)
            }
        }) {
            Ok(Some(pmt)) => pmt,
            Ok(None) => return,
            Err(e) => {
                warn!("skipping invalid PMT section: {}", e);
                return;
            }
        };
        for stream in &pmt.streams {
            if self.streams.contains_key(&stream.pid) {
                continue;
            }
            if self.frozen {
                debug!("ignoring stream {:#x} announced after open", stream.pid);
                continue;
            }
            let Some((kind, codec)) = classify(stream) else {
                debug!(
                    "skipping pid {:#x} with unsupported stream type {:#x}",
                    stream.pid, stream.stream_type
                );
                continue;
            };
            let language = stream
                .descriptors
                .iter()
                .find(|d| d.tag == DESCRIPTOR_LANGUAGE && d.data.len() >= 3)
                .map(|d| String::from_utf8_lossy(&d.data[..3]).into_owned())
                .unwrap_or_else(|| "und".to_string());
            self.order.push(stream.pid);
            self.streams.insert(
                stream.pid,
                StreamState {
                    info: StreamInfo {
                        pid: stream.pid,
                        stream_type: stream.stream_type,
                        kind,
                        codec,
                        language,
                        config: None,
                        packet_count: 0,
                    },
                    clock: TimestampUnwrapper::default(),
                    pes: None,
                    next_pts: None,
                },
            );
        }
    }

    fn handle_packet(&mut self, offset: u64, packet: &[u8], entries: &mut Vec<(u32, IndexEntry)>) {
        let Ok(header) = parse_header(packet) else {
            return;
        };
        let Some(payload_offset) = header.payload_offset else {
            return;
        };
        let payload = &packet[payload_offset..];
        if header.pid == PAT_PID {
            for section in self.pat.push(payload, header.payload_unit_start) {
                self.handle_pat(&section);
            }
            return;
        }
        if Some(header.pid) == self.pmt_pid {
            for section in self.pmt.push(payload, header.payload_unit_start) {
                self.handle_pmt(&section);
            }
            return;
        }
        let Some(stream) = self.streams.get_mut(&header.pid) else {
            return;
        };
        if header.payload_unit_start {
            if let Some(previous) = stream.pes.take() {
                stream.finish(previous, entries);
            }
            stream.pes = Some(PesBuffer {
                random_access: header.random_access,
                ..Default::default()
            });
        }
        let Some(pes) = stream.pes.as_mut() else {
            return;
        };
        pes.pieces.push((offset + payload_offset as u64, payload.len() as u32));
        pes.data.extend_from_slice(payload);
        let complete = parse_pes_header(&pes.data)
            .and_then(|h| h.total_length())
            .is_some_and(|total| pes.data.len() >= total);
        if complete {
            if let Some(pes) = stream.pes.take() {
                stream.finish(pes, entries);
            }
        }
    }

    fn flush(&mut self, entries: &mut Vec<(u32, IndexEntry)>) {
        for pid in self.order.clone() {
            if let Some(stream) = self.streams.get_mut(&pid) {
                if let Some(pes) = stream.pes.take() {
                    stream.finish(pes, entries);
                }
            }
        }
    }

    fn sync_at(&self, data: &[u8], pos: usize) -> bool {
        data.get(pos + self.sync_offset) == Some(&SYNC_BYTE)
    }
}

#[async_trait]
impl ChunkScanner for TsScanner {
    async fn scan_next(&mut self, reader: &SourceReader) -> MediaResult<ScanBatch> {
        if self.finished {
            return Ok(ScanBatch {
                entries: Vec::new(),
                done: true,
            });
        }
        let packets = (self.chunk_size / self.packet_size as u64).max(1);
        let wanted = packets * self.packet_size as u64;
        let data = reader.read(self.position, self.position + wanted).await?;
        let at_end = (data.len() as u64) < wanted;

        let mut entries = Vec::new();
        let mut pos = 0;
        while pos + self.packet_size <= data.len() {
            if !self.sync_at(&data, pos) {
                let resync = (pos + 1..data.len()).find(|&p| self.sync_at(&data, p));
                warn!(
                    "lost transport stream sync at {}, skipping {} bytes",
                    self.position + pos as u64,
                    resync.unwrap_or(data.len()) - pos
                );
                pos = resync.unwrap_or(data.len());
                continue;
            }
            let start = pos + self.sync_offset;
            let offset = self.position + start as u64;
            self.handle_packet(offset, &data[start..start + TS_PACKET_SIZE], &mut entries);
            pos += self.packet_size;
        }
        self.position += pos.min(data.len()) as u64;

        if at_end {
            self.flush(&mut entries);
            self.finished = true;
            debug!("transport stream scan finished at {}", self.position);
        }
        Ok(ScanBatch {
            entries,
            done: at_end,
        })
    }
}
