use crate::aac::audio_specific_config::{sample_rate_index, AudioSpecificConfig, SAMPLE_RATES};
use crate::errors::{MediaError, MediaResult};

pub const ADTS_HEADER_SIZE: usize = 7;
pub const ADTS_HEADER_SIZE_WITH_CRC: usize = 9;

/// Fixed and variable ADTS header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// true for MPEG-2, false for MPEG-4.
    pub mpeg2: bool,
    pub protection_absent: bool,
    /// Audio object type minus one.
    pub profile: u8,
    pub sampling_index: u8,
    pub channel_configuration: u8,
    /// Header plus payload length in bytes.
    pub frame_length: usize,
    pub buffer_fullness: u16,
    pub raw_data_blocks: u8,
}

impl AdtsHeader {
    /// Parse a header at the start of `data`.
    pub fn parse(data: &[u8]) -> MediaResult<Self> {
        if data.len() < ADTS_HEADER_SIZE {
            return Err(MediaError::format("ADTS header truncated"));
        }
        if data[0] != 0xFF || data[1] & 0xF6 != 0xF0 {
            return Err(MediaError::format("ADTS sync word not found"));
        }
        let header = AdtsHeader {
            mpeg2: data[1] & 0x08 != 0,
            protection_absent: data[1] & 0x01 != 0,
            profile: data[2] >> 6,
            sampling_index: (data[2] >> 2) & 0x0F,
            channel_configuration: ((data[2] & 0x01) << 2) | (data[3] >> 6),
            frame_length: (((data[3] & 0x03) as usize) << 11)
                | ((data[4] as usize) << 3)
                | ((data[5] as usize) >> 5),
            buffer_fullness: (((data[5] & 0x1F) as u16) << 6) | ((data[6] as u16) >> 2),
            raw_data_blocks: data[6] & 0x03,
        };
        if header.sampling_index as usize >= SAMPLE_RATES.len() {
            return Err(MediaError::format("invalid ADTS sampling index"));
        }
        if header.frame_length < header.header_length() {
            return Err(MediaError::format("ADTS frame length shorter than header"));
        }
        Ok(header)
    }

    /// Build an MPEG-4 header without CRC for a payload of `payload_len` bytes.
    pub fn for_payload(asc: &AudioSpecificConfig, payload_len: usize) -> MediaResult<Self> {
        let sampling_index = sample_rate_index(asc.sample_rate).ok_or_else(|| {
            MediaError::format(format!(
                "sample rate {} cannot be expressed in an ADTS header",
                asc.sample_rate
            ))
        })?;
        if asc.object_type == 0 || asc.object_type > 4 {
            return Err(MediaError::format(format!(
                "AAC object type {} cannot be expressed in an ADTS header",
                asc.object_type
            )));
        }
        let frame_length = payload_len + ADTS_HEADER_SIZE;
        if frame_length > 0x1FFF {
            return Err(MediaError::format("AAC frame too large for ADTS"));
        }
        Ok(AdtsHeader {
            mpeg2: false,
            protection_absent: true,
            profile: asc.object_type - 1,
            sampling_index,
            channel_configuration: asc.channel_configuration,
            frame_length,
            buffer_fullness: 0x7FF,
            raw_data_blocks: 0,
        })
    }

    pub fn header_length(&self) -> usize {
        if self.protection_absent {
            ADTS_HEADER_SIZE
        } else {
            ADTS_HEADER_SIZE_WITH_CRC
        }
    }

    pub fn payload_length(&self) -> usize {
        self.frame_length - self.header_length()
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[self.sampling_index as usize]
    }

    pub fn samples_per_frame(&self) -> u32 {
        1024 * (self.raw_data_blocks as u32 + 1)
    }

    /// Frame duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples_per_frame() as f64 / self.sample_rate() as f64
    }

    pub fn audio_specific_config(&self) -> AudioSpecificConfig {
        AudioSpecificConfig::new(
            self.profile + 1,
            self.sample_rate(),
            self.channel_configuration,
        )
    }

    /// Serialize a 7-byte header (CRC is never written).
    pub fn to_bytes(&self) -> [u8; ADTS_HEADER_SIZE] {
        let len = self.frame_length;
        [
            0xFF,
            0xF1 | ((self.mpeg2 as u8) << 3),
            (self.profile << 6)
                | ((self.sampling_index & 0x0F) << 2)
                | ((self.channel_configuration >> 2) & 0x01),
            ((self.channel_configuration & 0x03) << 6) | ((len >> 11) & 0x03) as u8,
            ((len >> 3) & 0xFF) as u8,
            (((len & 0x07) << 5) as u8) | ((self.buffer_fullness >> 6) & 0x1F) as u8,
            (((self.buffer_fullness & 0x3F) << 2) as u8) | (self.raw_data_blocks & 0x03),
        ]
    }
}

/// Split an ADTS frame into its header and raw AAC payload.
pub fn strip_adts_header(frame: &[u8]) -> MediaResult<(AdtsHeader, &[u8])> {
    let header = AdtsHeader::parse(frame)?;
    if frame.len() < header.frame_length {
        return Err(MediaError::format("ADTS frame truncated"));
    }
    Ok((header, &frame[header.header_length()..header.frame_length]))
}

/// Prefix a raw AAC frame with an ADTS header built from `asc`.
pub fn prepend_adts_header(raw: &[u8], asc: &AudioSpecificConfig) -> MediaResult<Vec<u8>> {
    let header = AdtsHeader::for_payload(asc, raw.len())?;
    let mut out = Vec::with_capacity(raw.len() + ADTS_HEADER_SIZE);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(raw);
    Ok(out)
}

/// Locate consecutive ADTS frames in `data`, resynchronizing on garbage.
/// Returns `(offset, header)` pairs for complete frames only.
pub fn find_adts_frames(data: &[u8]) -> Vec<(usize, AdtsHeader)> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos + ADTS_HEADER_SIZE <= data.len() {
        match AdtsHeader::parse(&data[pos..]) {
            Ok(header) if pos + header.frame_length <= data.len() => {
                frames.push((pos, header));
                pos += header.frame_length;
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
    use proptest::prelude::*;

    #[test]
    fn test_header_fields() {
        let asc = AudioSpecificConfig::new(2, 48000, 2);
        let header = AdtsHeader::for_payload(&asc, 100).unwrap();
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..3], &[0xFF, 0xF1, 0x4C]);
        let parsed = AdtsHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.frame_length, 107);
        assert_eq!(parsed.sample_rate(), 48000);
        assert!((parsed.duration() - 1024.0 / 48000.0).abs() < 1e-12);
        assert_eq!(parsed.audio_specific_config(), asc);
    }

    #[test]
    fn test_header_with_crc() {
        let mut frame = vec![0xFF, 0xF0, 0x50, 0x80, 0x01, 0x3F, 0xFC, 0xAB, 0xCD];
        frame.extend_from_slice(&[1, 2]);
        let (header, payload) = strip_adts_header(&frame).unwrap();
        assert!(!header.protection_absent);
        assert_eq!(header.header_length(), 9);
        assert_eq!(payload, &[1, 2]);
    }

    #[test]
    fn test_find_frames_skips_garbage() {
        let asc = AudioSpecificConfig::new(2, 44100, 2);
        let mut data = vec![0x00, 0x12];
        data.extend(prepend_adts_header(&[9; 10], &asc).unwrap());
        data.extend(prepend_adts_header(&[8; 20], &asc).unwrap());
        data.extend_from_slice(&[0xFF, 0xF1]);
        let frames = find_adts_frames(&data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, 2);
        assert_eq!(frames[1].0, 19);
        assert_eq!(frames[1].1.payload_length(), 20);
    }

    #[test]
    fn test_unsupported_object_type() {
        let asc = AudioSpecificConfig::new(5, 44100, 2);
        assert!(prepend_adts_header(&[0; 4], &asc).is_err());
    }

    proptest! {
        #[test]
        fn prop_adts_round_trip(
            payload in prop::collection::vec(any::<u8>(), 1..512),
            object_type in 1u8..=4,
            rate_index in 0usize..12,
            channels in 1u8..=7,
        ) {
            let asc = AudioSpecificConfig::new(object_type, SAMPLE_RATES[rate_index], channels);
            let frame = prepend_adts_header(&payload, &asc).unwrap();
            let (header, raw) = strip_adts_header(&frame).unwrap();
            prop_assert_eq!(raw, payload.as_slice());
            prop_assert_eq!(header.audio_specific_config(), asc);
            let rebuilt = prepend_adts_header(raw, &header.audio_specific_config()).unwrap();
            prop_assert_eq!(rebuilt, frame);
        }
    }
}
