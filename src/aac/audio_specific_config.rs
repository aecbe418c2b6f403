use crate::bits::reader::BitReader;
use crate::bits::writer::BitWriter;
use crate::errors::{MediaError, MediaResult};
use std::io::Cursor;

/// Sampling frequencies addressed by the 4-bit sampling index
pub const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

pub fn sample_rate_index(sample_rate: u32) -> Option<u8> {
    SAMPLE_RATES
        .iter()
        .position(|r| *r == sample_rate)
        .map(|i| i as u8)
}

/// Decoded AudioSpecificConfig (ISO/IEC 14496-3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub object_type: u8,
    pub sample_rate: u32,
    pub channel_configuration: u8,
}

impl AudioSpecificConfig {
    pub fn new(object_type: u8, sample_rate: u32, channel_configuration: u8) -> Self {
        Self {
            object_type,
            sample_rate,
            channel_configuration,
        }
    }

    pub fn parse(data: &[u8]) -> MediaResult<Self> {
        if data.len() < 2 {
            return Err(MediaError::format("AudioSpecificConfig too short"));
        }
        let mut r = BitReader::new(Cursor::new(data));
        let mut object_type = read_object_type(&mut r);
        let mut sample_rate = read_sample_rate(&mut r);
        let channel_configuration = r.read(4) as u8;
        // Explicit SBR / PS signalling: the core object type follows
        if object_type == 5 || object_type == 29 {
            sample_rate = read_sample_rate(&mut r);
            object_type = read_object_type(&mut r);
        }
        if r.acc_error().is_some() {
            return Err(MediaError::format("truncated AudioSpecificConfig"));
        }
        if sample_rate == 0 {
            return Err(MediaError::format("invalid AAC sampling frequency index"));
        }
        Ok(Self {
            object_type,
            sample_rate,
            channel_configuration,
        })
    }

    /// Serialize to the two-byte form (explicit frequency when not in the table).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        if self.object_type >= 31 {
            w.write(31, 5);
            w.write((self.object_type - 32) as u32, 6);
        } else {
            w.write(self.object_type as u32, 5);
        }
        match sample_rate_index(self.sample_rate) {
            Some(index) => w.write(index as u32, 4),
            None => {
                w.write(0xf, 4);
                w.write(self.sample_rate, 24);
            }
        }
        w.write(self.channel_configuration as u32, 4);
        // GASpecificConfig: 1024-sample frames, no core coder, no extension
        w.write(0, 3);
        w.into_bytes()
    }

    /// Channel count implied by the channel configuration.
    pub fn channels(&self) -> u16 {
        match self.channel_configuration {
            7 => 8,
            c => c as u16,
        }
    }

    pub fn codec_string(&self) -> String {
        format!("mp4a.40.{}", self.object_type)
    }
}

fn read_object_type<R: std::io::Read>(r: &mut BitReader<R>) -> u8 {
    let object_type = r.read(5) as u8;
    if object_type == 31 {
        32 + r.read(6) as u8
    } else {
        object_type
    }
}

fn read_sample_rate<R: std::io::Read>(r: &mut BitReader<R>) -> u32 {
    let index = r.read(4) as usize;
    if index == 0xf {
        r.read(24)
    } else {
        SAMPLE_RATES.get(index).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::AudioSpecificConfig;

    #[test]
    fn test_lc_stereo_44100() {
        let asc = AudioSpecificConfig::parse(&[0x12, 0x10]).unwrap();
        assert_eq!(asc.object_type, 2);
        assert_eq!(asc.sample_rate, 44100);
        assert_eq!(asc.channels(), 2);
        assert_eq!(asc.codec_string(), "mp4a.40.2");
        assert_eq!(asc.to_bytes(), vec![0x12, 0x10]);
    }

    #[test]
    fn test_explicit_sbr_reports_core_type() {
        // HE-AAC: object type 5, 24 kHz core, stereo, 48 kHz extension, core LC
        let asc = AudioSpecificConfig::parse(&[0x2b, 0x11, 0x88, 0x00]).unwrap();
        assert_eq!(asc.object_type, 2);
        assert_eq!(asc.sample_rate, 48000);
    }

    #[test]
    fn test_explicit_frequency_round_trip() {
        let asc = AudioSpecificConfig::new(2, 37_800, 1);
        let parsed = AudioSpecificConfig::parse(&asc.to_bytes()).unwrap();
        assert_eq!(parsed, asc);
    }
}
