//! MPEG-1/2/2.5 audio frame headers (layers I-III).

use crate::errors::{MediaError, MediaResult};

const BITRATES_V1: [[u32; 15]; 3] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];
const BITRATES_V2: [[u32; 15]; 2] = [
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];
const SAMPLE_RATES_V1: [u32; 3] = [44100, 48000, 32000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpegAudioHeader {
    pub version: MpegVersion,
    /// 1, 2 or 3.
    pub layer: u8,
    /// kbit/s
    pub bitrate: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub padding: bool,
    pub frame_size: usize,
}

impl MpegAudioHeader {
    pub fn parse(data: &[u8]) -> MediaResult<Self> {
        if data.len() < 4 {
            return Err(MediaError::format("MPEG audio header truncated"));
        }
        if data[0] != 0xFF || data[1] & 0xE0 != 0xE0 {
            return Err(MediaError::format("MPEG audio sync not found"));
        }
        let version = match (data[1] >> 3) & 0x03 {
            0 => MpegVersion::Mpeg25,
            2 => MpegVersion::Mpeg2,
            3 => MpegVersion::Mpeg1,
            _ => return Err(MediaError::format("reserved MPEG audio version")),
        };
        let layer = match (data[1] >> 1) & 0x03 {
            1 => 3,
            2 => 2,
            3 => 1,
            _ => return Err(MediaError::format("reserved MPEG audio layer")),
        };
        let bitrate_index = (data[2] >> 4) as usize;
        let rate_index = ((data[2] >> 2) & 0x03) as usize;
        if bitrate_index == 0 || bitrate_index == 15 || rate_index == 3 {
            return Err(MediaError::format("unsupported MPEG audio bitrate or sample rate"));
        }
        let bitrate = match version {
            MpegVersion::Mpeg1 => BITRATES_V1[layer as usize - 1][bitrate_index],
            _ => BITRATES_V2[if layer == 1 { 0 } else { 1 }][bitrate_index],
        };
        let sample_rate = match version {
            MpegVersion::Mpeg1 => SAMPLE_RATES_V1[rate_index],
            MpegVersion::Mpeg2 => SAMPLE_RATES_V1[rate_index] / 2,
            MpegVersion::Mpeg25 => SAMPLE_RATES_V1[rate_index] / 4,
        };
        let padding = data[2] & 0x02 != 0;
        let channels = if data[3] >> 6 == 3 { 1 } else { 2 };

        let mut header = MpegAudioHeader {
            version,
            layer,
            bitrate,
            sample_rate,
            channels,
            padding,
            frame_size: 0,
        };
        header.frame_size = header.compute_frame_size();
        Ok(header)
    }

    fn compute_frame_size(&self) -> usize {
        let bitrate = self.bitrate as usize * 1000;
        let rate = self.sample_rate as usize;
        let pad = self.padding as usize;
        match self.layer {
            1 => (12 * bitrate / rate + pad) * 4,
            2 => 144 * bitrate / rate + pad,
            _ if self.version == MpegVersion::Mpeg1 => 144 * bitrate / rate + pad,
            _ => 72 * bitrate / rate + pad,
        }
    }

    pub fn samples_per_frame(&self) -> u32 {
        match (self.layer, self.version) {
            (1, _) => 384,
            (3, MpegVersion::Mpeg2 | MpegVersion::Mpeg25) => 576,
            _ => 1152,
        }
    }

    pub fn duration(&self) -> f64 {
        self.samples_per_frame() as f64 / self.sample_rate as f64
    }
}

/// Split a buffer of consecutive MPEG audio frames, skipping garbage between them.
pub fn find_mpeg_audio_frames(data: &[u8]) -> Vec<(usize, MpegAudioHeader)> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos + 4 <= data.len() {
        match MpegAudioHeader::parse(&data[pos..]) {
            Ok(header) if pos + header.frame_size <= data.len() => {
                frames.push((pos, header));
                pos += header.frame_size;
            }
            Ok(_) => break,
            Err(_) => pos += 1,
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mpeg1_layer3() {
        // 128 kbps, 44.1 kHz, joint stereo
        let header = MpegAudioHeader::parse(&[0xFF, 0xFB, 0x90, 0x44]).unwrap();
        assert_eq!(header.version, MpegVersion::Mpeg1);
        assert_eq!(header.layer, 3);
        assert_eq!(header.bitrate, 128);
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.channels, 2);
        assert_eq!(header.frame_size, 417);
        assert_eq!(header.samples_per_frame(), 1152);
    }

    #[test]
    fn test_mpeg2_layer3_mono() {
        // 64 kbps, 24 kHz, mono, padded
        let header = MpegAudioHeader::parse(&[0xFF, 0xF3, 0x86, 0xC0]).unwrap();
        assert_eq!(header.version, MpegVersion::Mpeg2);
        assert_eq!(header.sample_rate, 24000);
        assert_eq!(header.channels, 1);
        assert_eq!(header.frame_size, 193);
        assert_eq!(header.samples_per_frame(), 576);
    }

    #[test]
    fn test_rejects_free_format() {
        assert!(MpegAudioHeader::parse(&[0xFF, 0xFB, 0x00, 0x44]).is_err());
    }

    #[test]
    fn test_find_frames() {
        let mut frame = vec![0u8; 417];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x44]);
        let mut data = vec![0x00];
        data.extend(&frame);
        data.extend(&frame);
        let frames = find_mpeg_audio_frames(&data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, 1);
        assert_eq!(frames[1].0, 418);
    }
}
