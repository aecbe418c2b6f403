//! AC-3 and E-AC-3 syncframe headers.

use crate::bits::reader::BitReader;
use crate::errors::{MediaError, MediaResult};
use std::io::Cursor;

pub const AC3_SYNC_WORD: u16 = 0x0B77;

const AC3_SAMPLE_RATES: [u32; 3] = [48000, 44100, 32000];
const AC3_BITRATES: [u32; 19] = [
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 576, 640,
];
const ACMOD_CHANNELS: [u16; 8] = [2, 1, 2, 3, 3, 4, 4, 5];
const EAC3_BLOCKS: [u32; 4] = [1, 2, 3, 6];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ac3FrameInfo {
    /// True for E-AC-3 (bsid 11..=16).
    pub enhanced: bool,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_size: usize,
    pub samples_per_frame: u32,
    pub bsid: u8,
}

impl Ac3FrameInfo {
    /// Parse the syncframe header at the start of `data`.
    pub fn parse(data: &[u8]) -> MediaResult<Self> {
        if data.len() < 7 {
            return Err(MediaError::format("AC-3 header truncated"));
        }
        if u16::from_be_bytes([data[0], data[1]]) != AC3_SYNC_WORD {
            return Err(MediaError::format("AC-3 sync word not found"));
        }
        let bsid = data[5] >> 3;
        if bsid > 16 {
            return Err(MediaError::format(format!("unknown AC-3 bsid {}", bsid)));
        }
        if bsid > 10 {
            parse_eac3(data, bsid)
        } else {
            parse_ac3(data, bsid)
        }
    }

    pub fn duration(&self) -> f64 {
        self.samples_per_frame as f64 / self.sample_rate as f64
    }

    pub fn codec_string(&self) -> &'static str {
        if self.enhanced {
            "ec-3"
        } else {
            "ac-3"
        }
    }
}

fn parse_ac3(data: &[u8], bsid: u8) -> MediaResult<Ac3FrameInfo> {
    let mut r = BitReader::new(Cursor::new(&data[4..]));
    let fscod = r.read(2) as usize;
    let frmsizecod = r.read(6) as usize;
    r.read(5); // bsid
    r.read(3); // bsmod
    let acmod = r.read(3) as usize;
    if acmod & 1 != 0 && acmod != 1 {
        r.read(2); // cmixlev
    }
    if acmod & 4 != 0 {
        r.read(2); // surmixlev
    }
    if acmod == 2 {
        r.read(2); // dsurmod
    }
    let lfeon = r.read_flag();

    if fscod >= AC3_SAMPLE_RATES.len() || frmsizecod / 2 >= AC3_BITRATES.len() {
        return Err(MediaError::format("invalid AC-3 frame size code"));
    }
    let sample_rate = AC3_SAMPLE_RATES[fscod];
    let bitrate = AC3_BITRATES[frmsizecod / 2];
    let mut words = (bitrate * 96_000 / sample_rate) as usize;
    if sample_rate == 44100 && frmsizecod & 1 == 1 {
        words += 1;
    }
    Ok(Ac3FrameInfo {
        enhanced: false,
        sample_rate,
        channels: ACMOD_CHANNELS[acmod] + lfeon as u16,
        frame_size: words * 2,
        samples_per_frame: 1536,
        bsid,
    })
}

fn parse_eac3(data: &[u8], bsid: u8) -> MediaResult<Ac3FrameInfo> {
    let mut r = BitReader::new(Cursor::new(&data[2..]));
    r.read(2); // strmtyp
    r.read(3); // substreamid
    let frmsiz = r.read(11) as usize;
    let fscod = r.read(2) as usize;
    let (sample_rate, blocks) = if fscod == 3 {
        let fscod2 = r.read(2) as usize;
        if fscod2 == 3 {
            return Err(MediaError::format("invalid E-AC-3 sample rate code"));
        }
        (AC3_SAMPLE_RATES[fscod2] / 2, 6)
    } else {
        (AC3_SAMPLE_RATES[fscod], EAC3_BLOCKS[r.read(2) as usize])
    };
    let acmod = r.read(3) as usize;
    let lfeon = r.read_flag();
    Ok(Ac3FrameInfo {
        enhanced: true,
        sample_rate,
        channels: ACMOD_CHANNELS[acmod] + lfeon as u16,
        frame_size: (frmsiz + 1) * 2,
        samples_per_frame: blocks * 256,
        bsid,
    })
}

/// Split a buffer of back-to-back syncframes. A trailing partial frame is ignored.
pub fn find_ac3_frames(data: &[u8]) -> Vec<(usize, Ac3FrameInfo)> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos + 7 <= data.len() {
        match Ac3FrameInfo::parse(&data[pos..]) {
            Ok(info) if info.frame_size > 0 && pos + info.frame_size <= data.len() => {
                frames.push((pos, info));
                pos += info.frame_size;
            }
            Ok(_) => break,
            Err(_) => pos += 1,
        }
    }
    frames
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 48 kHz 3/2 + LFE, 384 kbps syncframe filled with zeros.
    pub(crate) fn ac3_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 1536];
        frame[0] = 0x0B;
        frame[1] = 0x77;
        frame[4] = 0x1C; // fscod 0, frmsizecod 28
        frame[5] = 0x40; // bsid 8, bsmod 0
        frame[6] = 0xE0 | 0x04 | 0x01; // acmod 7, cmixlev, surmixlev, lfeon
        frame
    }

    #[test]
    fn test_parse_ac3() {
        let info = Ac3FrameInfo::parse(&ac3_frame()).unwrap();
        assert!(!info.enhanced);
        assert_eq!(info.sample_rate, 48000);
        assert_eq!(info.channels, 6);
        assert_eq!(info.frame_size, 1536);
        assert_eq!(info.codec_string(), "ac-3");
        assert!((info.duration() - 0.032).abs() < 1e-9);
    }

    #[test]
    fn test_parse_eac3() {
        // strmtyp 0, frmsiz 255, fscod 0, numblkscod 3, acmod 2, lfe off, bsid 16
        let header = [0x0B, 0x77, 0x00, 0xFF, 0x34, 0x80];
        let mut frame = header.to_vec();
        frame.resize(512, 0);
        let info = Ac3FrameInfo::parse(&frame).unwrap();
        assert!(info.enhanced);
        assert_eq!(info.frame_size, 512);
        assert_eq!(info.sample_rate, 48000);
        assert_eq!(info.channels, 2);
        assert_eq!(info.samples_per_frame, 1536);
        assert_eq!(info.bsid, 16);
    }

    #[test]
    fn test_find_frames() {
        let mut data = ac3_frame();
        data.extend(ac3_frame());
        data.extend_from_slice(&[0x0B, 0x77, 0, 0]);
        let frames = find_ac3_frames(&data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].0, 1536);
    }
}
