//! 188-byte transport packets.
//!
//! ```text
//! 0x47 | TEI PUSI PRIO PID(13) | SC(2) AFC(2) CC(4) | [adaptation field] | payload
//! ```

use super::{SYNC_BYTE, TS_PACKET_SIZE};
use crate::errors::{MediaError, MediaResult};

const FLAG_RANDOM_ACCESS: u8 = 0x40;
const FLAG_PCR: u8 = 0x10;
/// Header bytes before the payload of a packet without adaptation field.
const HEADER_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    pub pid: u16,
    pub payload_unit_start: bool,
    pub continuity_counter: u8,
    pub random_access: bool,
    /// Program clock reference in 27 MHz units.
    pub pcr: Option<u64>,
    /// Offset of the payload within the packet, `None` without payload.
    pub payload_offset: Option<usize>,
}

pub fn parse_header(packet: &[u8]) -> MediaResult<TsHeader> {
    if packet.len() < TS_PACKET_SIZE || packet[0] != SYNC_BYTE {
        return Err(MediaError::format("transport packet without sync byte"));
    }
    let pid = u16::from_be_bytes([packet[1] & 0x1F, packet[2]]);
    let payload_unit_start = packet[1] & 0x40 != 0;
    let control = (packet[3] >> 4) & 0x03;
    let continuity_counter = packet[3] & 0x0F;

    let mut random_access = false;
    let mut pcr = None;
    let mut offset = HEADER_SIZE;
    if control & 0x02 != 0 {
        let length = packet[4] as usize;
        if length > 0 {
            let flags = packet[5];
            random_access = flags & FLAG_RANDOM_ACCESS != 0;
            if flags & FLAG_PCR != 0 && length >= 7 {
                let b = &packet[6..12];
                let base = ((b[0] as u64) << 25)
                    | ((b[1] as u64) << 17)
                    | ((b[2] as u64) << 9)
                    | ((b[3] as u64) << 1)
                    | (b[4] as u64 >> 7);
                let extension = (((b[4] & 0x01) as u64) << 8) | b[5] as u64;
                pcr = Some(base * 300 + extension);
            }
        }
        offset += 1 + length;
    }
    let payload_offset = (control & 0x01 != 0 && offset < TS_PACKET_SIZE).then_some(offset);

    Ok(TsHeader {
        pid,
        payload_unit_start,
        continuity_counter,
        random_access,
        pcr,
        payload_offset,
    })
}

/// Adaptation field contents written ahead of a payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptationField {
    pub random_access: bool,
    /// 27 MHz units.
    pub pcr: Option<u64>,
}

impl AdaptationField {
    fn is_empty(&self) -> bool {
        !self.random_access && self.pcr.is_none()
    }

    /// Bytes after the length byte, before stuffing.
    fn body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(7);
        let mut flags = 0;
        if self.random_access {
            flags |= FLAG_RANDOM_ACCESS;
        }
        if self.pcr.is_some() {
            flags |= FLAG_PCR;
        }
        body.push(flags);
        if let Some(pcr) = self.pcr {
            let base = (pcr / 300) & 0x1_FFFF_FFFF;
            let extension = (pcr % 300) as u16;
            body.push((base >> 25) as u8);
            body.push((base >> 17) as u8);
            body.push((base >> 9) as u8);
            body.push((base >> 1) as u8);
            body.push(((base & 0x01) << 7) as u8 | 0x7E | ((extension >> 8) as u8 & 0x01));
            body.push(extension as u8);
        }
        body
    }
}

/// Build one packet carrying as much of `payload` as fits. Short payloads are
/// padded with adaptation field stuffing. Returns the packet and the number
/// of payload bytes it holds.
pub fn build_packet(
    pid: u16,
    payload_unit_start: bool,
    continuity_counter: u8,
    adaptation: AdaptationField,
    payload: &[u8],
) -> ([u8; TS_PACKET_SIZE], usize) {
    let mut packet = [0xFFu8; TS_PACKET_SIZE];
    packet[0] = SYNC_BYTE;
    packet[1] = ((pid >> 8) as u8 & 0x1F) | if payload_unit_start { 0x40 } else { 0 };
    packet[2] = pid as u8;

    let body = if adaptation.is_empty() {
        Vec::new()
    } else {
        adaptation.body()
    };
    // length byte plus body, when present
    let field_size = if body.is_empty() { 0 } else { 1 + body.len() };
    let room = TS_PACKET_SIZE - HEADER_SIZE - field_size;
    let taken = payload.len().min(room);
    let stuffing = room - taken;

    let (control, field_length) = match (field_size, stuffing) {
        (0, 0) => (0x10, None),
        // a lone length byte of zero is the one byte stuffing
        (0, 1) => (0x30, Some(0)),
        (0, n) => (0x30, Some(n - 1)),
        (size, n) => (0x30, Some(size - 1 + n)),
    };
    packet[3] = control | (continuity_counter & 0x0F);

    let mut pos = HEADER_SIZE;
    if let Some(length) = field_length {
        packet[pos] = length as u8;
        pos += 1;
        if length > 0 {
            if body.is_empty() {
                packet[pos] = 0;
                pos += 1;
            } else {
                packet[pos..pos + body.len()].copy_from_slice(&body);
                pos += body.len();
            }
        }
        pos = HEADER_SIZE + 1 + length;
    }
    packet[pos..pos + taken].copy_from_slice(&payload[..taken]);
    (packet, taken)
}
