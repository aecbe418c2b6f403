//! A module for parsing and building AVCDecoderConfigurationRecord (avcC) data.
//! Holds the SPS and PPS NAL units for H.264 streams in length-prefixed format.

use crate::avc::nalus::{extract_parameter_sets, NalUnitFormat};
use crate::avc::sps::SpsInfo;
use crate::errors::{MediaError, MediaResult};

/// Represents the parsed AVCDecoderConfigurationRecord (avcC) configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AvccConfig {
    /// configurationVersion
    pub configuration_version: u8,
    /// AVCProfileIndication
    pub profile: u8,
    /// profileCompatibility
    pub compatibility: u8,
    /// AVCLevelIndication
    pub level: u8,
    /// lengthSizeMinusOne
    pub length_size_minus_one: u8,
    /// Sequence Parameter Sets
    pub sps: Vec<Vec<u8>>,
    /// Picture Parameter Sets
    pub pps: Vec<Vec<u8>>,
    /// High profile extension (chroma format, bit depths, SPS extensions), kept verbatim
    pub extension: Vec<u8>,
}

impl AvccConfig {
    /// Parse AVCDecoderConfigurationRecord as defined in ISO/IEC 14496-15.
    ///
    /// data: full contents of the avcC box (excluding header).
    pub fn parse(data: &[u8]) -> MediaResult<Self> {
        let mut pos = 0;
        if data.len() < 7 {
            return Err(MediaError::format("avcC data too short"));
        }
        let configuration_version = data[pos];
        pos += 1;
        let profile = data[pos];
        pos += 1;
        let compatibility = data[pos];
        pos += 1;
        let level = data[pos];
        pos += 1;
        // lengthSizeMinusOne: 6 bits reserved + 2 bits
        let length_size_minus_one = data[pos] & 0x03;
        pos += 1;
        // numOfSequenceParameterSets: 3 bits reserved + 5 bits count
        let num_sps = data[pos] & 0x1F;
        pos += 1;
        let sps = read_parameter_sets(data, &mut pos, num_sps as usize, "SPS")?;
        if pos >= data.len() {
            return Err(MediaError::format("Unexpected EOF while reading PPS count"));
        }
        let num_pps = data[pos];
        pos += 1;
        let pps = read_parameter_sets(data, &mut pos, num_pps as usize, "PPS")?;
        Ok(AvccConfig {
            configuration_version,
            profile,
            compatibility,
            level,
            length_size_minus_one,
            sps,
            pps,
            extension: data[pos..].to_vec(),
        })
    }

    /// Build a record from parameter sets, using 4-byte NAL unit lengths.
    pub fn from_parameter_sets(sps: Vec<Vec<u8>>, pps: Vec<Vec<u8>>) -> MediaResult<Self> {
        let first = sps
            .first()
            .ok_or_else(|| MediaError::format("No SPS available to build avcC"))?;
        if pps.is_empty() {
            return Err(MediaError::format("No PPS available to build avcC"));
        }
        if first.len() < 4 {
            return Err(MediaError::format("SPS too short"));
        }
        let info = SpsInfo::parse(first)?;
        let mut extension = Vec::new();
        if matches!(info.profile_idc, 100 | 110 | 122 | 144) {
            extension.push(0xFC | (info.chroma_format_idc & 0x03));
            extension.push(0xF8 | (info.bit_depth_luma.saturating_sub(8) & 0x07));
            extension.push(0xF8 | (info.bit_depth_chroma.saturating_sub(8) & 0x07));
            extension.push(0);
        }
        Ok(AvccConfig {
            configuration_version: 1,
            profile: first[1],
            compatibility: first[2],
            level: first[3],
            length_size_minus_one: 3,
            sps,
            pps,
            extension,
        })
    }

    /// Build a record from the parameter sets carried in an Annex B key packet.
    pub fn from_annex_b(packet: &[u8]) -> MediaResult<Self> {
        let (sps, pps) = extract_parameter_sets(packet, NalUnitFormat::AnnexB);
        Self::from_parameter_sets(
            sps.into_iter().map(|n| n.data).collect(),
            pps.into_iter().map(|n| n.data).collect(),
        )
    }

    /// Serialize back to avcC payload bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![
            self.configuration_version,
            self.profile,
            self.compatibility,
            self.level,
            0xFC | (self.length_size_minus_one & 0x03),
            0xE0 | (self.sps.len() as u8 & 0x1F),
        ];
        for sps in &self.sps {
            out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
            out.extend_from_slice(sps);
        }
        out.push(self.pps.len() as u8);
        for pps in &self.pps {
            out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
            out.extend_from_slice(pps);
        }
        out.extend_from_slice(&self.extension);
        out
    }

    /// Width of the NAL unit length prefix in bytes.
    pub fn nal_length_size(&self) -> u8 {
        self.length_size_minus_one + 1
    }

    /// RFC 6381 codec string, e.g. `avc1.4d401e`.
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile, self.compatibility, self.level
        )
    }

    /// Get the first SPS for profile/level analysis
    pub fn get_first_sps(&self) -> Option<&[u8]> {
        self.sps.first().map(|sps| sps.as_slice())
    }

    /// Check if configuration is valid
    pub fn is_valid(&self) -> bool {
        !self.sps.is_empty() && !self.pps.is_empty()
    }

    /// Parameter sets as an Annex B prefix for key packets.
    pub fn parameter_sets_annex_b(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for nalu in self.sps.iter().chain(self.pps.iter()) {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nalu);
        }
        out
    }
}

fn read_parameter_sets(
    data: &[u8],
    pos: &mut usize,
    count: usize,
    kind: &str,
) -> MediaResult<Vec<Vec<u8>>> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if *pos + 2 > data.len() {
            return Err(MediaError::format(format!(
                "Unexpected EOF while reading {} length",
                kind
            )));
        }
        let len = u16::from_be_bytes([data[*pos], data[*pos + 1]]) as usize;
        *pos += 2;
        if *pos + len > data.len() {
            return Err(MediaError::format(format!(
                "Unexpected EOF while reading {} data",
                kind
            )));
        }
        sets.push(data[*pos..*pos + len].to_vec());
        *pos += len;
    }
    Ok(sets)
}
