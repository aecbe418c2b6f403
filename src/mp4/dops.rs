//! Opus sample entry configuration (dOps) and its OpusHead equivalent.

use super::r#box::make_box;
use crate::errors::{MediaError, MediaResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusConfig {
    pub channels: u8,
    pub pre_skip: u16,
    pub input_sample_rate: u32,
    pub output_gain: i16,
    pub mapping_family: u8,
    /// Stream count, coupled count and channel mapping when the family is not 0.
    pub mapping_table: Vec<u8>,
}

impl OpusConfig {
    pub fn new(channels: u8, input_sample_rate: u32) -> Self {
        Self {
            channels,
            pre_skip: 312,
            input_sample_rate,
            output_gain: 0,
            mapping_family: 0,
            mapping_table: Vec::new(),
        }
    }

    /// Parse a dOps box payload (big-endian fields).
    pub fn from_dops(dops: &[u8]) -> MediaResult<Self> {
        if dops.len() < 11 {
            return Err(MediaError::format("dOps box too small"));
        }
        Ok(Self {
            channels: dops[1],
            pre_skip: u16::from_be_bytes([dops[2], dops[3]]),
            input_sample_rate: u32::from_be_bytes([dops[4], dops[5], dops[6], dops[7]]),
            output_gain: i16::from_be_bytes([dops[8], dops[9]]),
            mapping_family: dops[10],
            mapping_table: dops[11..].to_vec(),
        })
    }

    /// Parse an OpusHead identification header (little-endian fields).
    pub fn from_opus_head(head: &[u8]) -> MediaResult<Self> {
        if head.len() < 19 || &head[..8] != b"OpusHead" {
            return Err(MediaError::format("invalid OpusHead"));
        }
        Ok(Self {
            channels: head[9],
            pre_skip: u16::from_le_bytes([head[10], head[11]]),
            input_sample_rate: u32::from_le_bytes([head[12], head[13], head[14], head[15]]),
            output_gain: i16::from_le_bytes([head[16], head[17]]),
            mapping_family: head[18],
            mapping_table: head[19..].to_vec(),
        })
    }

    pub fn to_opus_head(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(19 + self.mapping_table.len());
        out.extend_from_slice(b"OpusHead");
        out.push(1);
        out.push(self.channels);
        out.extend_from_slice(&self.pre_skip.to_le_bytes());
        out.extend_from_slice(&self.input_sample_rate.to_le_bytes());
        out.extend_from_slice(&self.output_gain.to_le_bytes());
        out.push(self.mapping_family);
        out.extend_from_slice(&self.mapping_table);
        out
    }

    pub fn to_dops_box(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(11 + self.mapping_table.len());
        payload.push(0);
        payload.push(self.channels);
        payload.extend_from_slice(&self.pre_skip.to_be_bytes());
        payload.extend_from_slice(&self.input_sample_rate.to_be_bytes());
        payload.extend_from_slice(&self.output_gain.to_be_bytes());
        payload.push(self.mapping_family);
        payload.extend_from_slice(&self.mapping_table);
        make_box("dOps", &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dops_to_opus_head() {
        let config = OpusConfig {
            output_gain: -256,
            ..OpusConfig::new(2, 48000)
        };
        let dops = config.to_dops_box();
        let parsed = OpusConfig::from_dops(&dops[8..]).unwrap();
        let head = parsed.to_opus_head();
        assert_eq!(&head[..8], b"OpusHead");
        assert_eq!(head.len(), 19);
        assert_eq!(OpusConfig::from_opus_head(&head).unwrap(), config);
    }
}
