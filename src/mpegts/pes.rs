//! PES headers and 33-bit timestamps.

/// PTS/DTS clock rate.
pub const CLOCK_RATE: u64 = 90_000;
const TIMESTAMP_MODULUS: i64 = 1 << 33;

pub const STREAM_ID_PRIVATE_1: u8 = 0xBD;
pub const STREAM_ID_AUDIO: u8 = 0xC0;
pub const STREAM_ID_VIDEO: u8 = 0xE0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// PES_packet_length, 0 when unbounded.
    pub packet_length: u16,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// Bytes before the elementary stream payload.
    pub header_length: usize,
}

impl PesHeader {
    /// Total PES size when bounded.
    pub fn total_length(&self) -> Option<usize> {
        (self.packet_length > 0).then(|| 6 + self.packet_length as usize)
    }
}

pub fn decode_timestamp(b: &[u8]) -> u64 {
    (((b[0] >> 1) & 0x07) as u64) << 30
        | (b[1] as u64) << 22
        | ((b[2] >> 1) as u64) << 15
        | (b[3] as u64) << 7
        | (b[4] >> 1) as u64
}

pub fn encode_timestamp(ts: u64, marker: u8) -> [u8; 5] {
    [
        (marker << 4) | ((((ts >> 30) & 0x07) as u8) << 1) | 0x01,
        (ts >> 22) as u8,
        ((((ts >> 15) & 0x7F) as u8) << 1) | 0x01,
        (ts >> 7) as u8,
        (((ts & 0x7F) as u8) << 1) | 0x01,
    ]
}

/// Parse the header at the start of a PES; `None` until enough bytes are present.
pub fn parse_pes_header(data: &[u8]) -> Option<PesHeader> {
    if data.len() < 9 || data[..3] != [0, 0, 1] {
        return None;
    }
    let stream_id = data[3];
    let packet_length = u16::from_be_bytes([data[4], data[5]]);
    let flags = data[7] >> 6;
    let header_length = 9 + data[8] as usize;
    if data.len() < header_length {
        return None;
    }
    let pts = (flags & 0x02 != 0 && header_length >= 14).then(|| decode_timestamp(&data[9..14]));
    let dts = (flags == 0x03 && header_length >= 19).then(|| decode_timestamp(&data[14..19]));
    Some(PesHeader {
        stream_id,
        packet_length,
        pts,
        dts,
        header_length,
    })
}

/// Header for a PES carrying `payload_len` bytes. Video PES are unbounded.
pub fn build_pes_header(stream_id: u8, pts: u64, dts: Option<u64>, payload_len: usize, bounded: bool) -> Vec<u8> {
    let dts = dts.filter(|d| *d != pts);
    let data_length = if dts.is_some() { 10 } else { 5 };
    let packet_length = 3 + data_length + payload_len;
    let packet_length = if bounded && packet_length <= u16::MAX as usize {
        packet_length as u16
    } else {
        0
    };

    let mut header = Vec::with_capacity(9 + data_length);
    header.extend_from_slice(&[0, 0, 1, stream_id]);
    header.extend_from_slice(&packet_length.to_be_bytes());
    header.push(0x84); // marker bits, data alignment
    header.push(if dts.is_some() { 0xC0 } else { 0x80 });
    header.push(data_length as u8);
    match dts {
        Some(dts) => {
            header.extend_from_slice(&encode_timestamp(pts, 0x03));
            header.extend_from_slice(&encode_timestamp(dts, 0x01));
        }
        None => header.extend_from_slice(&encode_timestamp(pts, 0x02)),
    }
    header
}

/// Seconds to 90 kHz ticks folded into 33 bits.
pub fn to_clock(seconds: f64) -> u64 {
    let ticks = (seconds * CLOCK_RATE as f64).round() as i64;
    ticks.rem_euclid(TIMESTAMP_MODULUS) as u64
}

/// Extends 33-bit timestamps across wraparounds
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampUnwrapper {
    last: Option<i64>,
    offset: i64,
}

impl TimestampUnwrapper {
    pub fn unwrap(&mut self, raw: u64) -> i64 {
        let mut value = raw as i64 + self.offset;
        if let Some(last) = self.last {
            let half = TIMESTAMP_MODULUS / 2;
            if value - last < -half {
                self.offset += TIMESTAMP_MODULUS;
                value += TIMESTAMP_MODULUS;
            } else if value - last > half {
                self.offset -= TIMESTAMP_MODULUS;
                value -= TIMESTAMP_MODULUS;
            }
        }
        self.last = Some(value);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_with_pts_and_dts() {
        let header = build_pes_header(STREAM_ID_VIDEO, 183_000, Some(180_000), 1000, false);
        assert_eq!(header.len(), 19);
        let parsed = parse_pes_header(&header).unwrap();
        assert_eq!(parsed.stream_id, STREAM_ID_VIDEO);
        assert_eq!(parsed.packet_length, 0);
        assert_eq!(parsed.pts, Some(183_000));
        assert_eq!(parsed.dts, Some(180_000));
        assert_eq!(parsed.header_length, 19);
    }

    #[test]
    fn test_bounded_audio_header() {
        let header = build_pes_header(STREAM_ID_AUDIO, 90_000, Some(90_000), 400, true);
        let parsed = parse_pes_header(&header).unwrap();
        assert_eq!(parsed.dts, None);
        assert_eq!(parsed.total_length(), Some(14 + 400));
        assert!(parse_pes_header(&header[..10]).is_none());
    }

    #[test]
    fn test_unwrap_across_wrap() {
        let mut unwrapper = TimestampUnwrapper::default();
        let near_end = (1u64 << 33) - 3000;
        assert_eq!(unwrapper.unwrap(near_end), near_end as i64);
        assert_eq!(unwrapper.unwrap(3000), (1i64 << 33) + 3000);
        // small backward steps from reordering do not unwrap
        assert_eq!(unwrapper.unwrap(1000), (1i64 << 33) + 1000);
    }

    #[test]
    fn test_negative_times_fold() {
        assert_eq!(to_clock(-1.0 / 90_000.0), (1u64 << 33) - 1);
        assert_eq!(to_clock(2.0), 180_000);
    }

    proptest! {
        #[test]
        fn timestamp_encoding_round_trips(ts in 0u64..(1u64 << 33)) {
            prop_assert_eq!(decode_timestamp(&encode_timestamp(ts, 0x02)), ts);
        }
    }
}
