//! HEVCDecoderConfigurationRecord (hvcC) parsing and construction.

use crate::avc::nalus::{NalUnitFormat, NalUnitIter};
use crate::errors::{MediaError, MediaResult};
use crate::hevc::nal_type::HevcNaluType;
use crate::hevc::sps::{HevcSpsInfo, ProfileTierLevel};

/// One array of same-typed parameter sets
#[derive(Debug, Clone, PartialEq)]
pub struct NalArray {
    pub completeness: bool,
    pub nal_type: u8,
    pub nalus: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HvccConfig {
    pub configuration_version: u8,
    pub profile: ProfileTierLevel,
    pub min_spatial_segmentation_idc: u16,
    pub parallelism_type: u8,
    pub chroma_format: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub avg_frame_rate: u16,
    pub constant_frame_rate: u8,
    pub num_temporal_layers: u8,
    pub temporal_id_nested: bool,
    pub length_size_minus_one: u8,
    pub arrays: Vec<NalArray>,
}

impl HvccConfig {
    pub fn parse(data: &[u8]) -> MediaResult<Self> {
        if data.len() < 23 {
            return Err(MediaError::format("hvcC data too short"));
        }
        let mut constraint_flags = [0u8; 6];
        constraint_flags.copy_from_slice(&data[6..12]);
        let profile = ProfileTierLevel {
            profile_space: data[1] >> 6,
            tier: data[1] & 0x20 != 0,
            profile_idc: data[1] & 0x1f,
            compatibility_flags: u32::from_be_bytes([data[2], data[3], data[4], data[5]]),
            constraint_flags,
            level_idc: data[12],
        };
        let num_arrays = data[22] as usize;
        let mut pos = 23;
        let mut arrays = Vec::with_capacity(num_arrays);
        for _ in 0..num_arrays {
            if pos + 3 > data.len() {
                return Err(MediaError::format("Unexpected EOF while reading hvcC array"));
            }
            let completeness = data[pos] & 0x80 != 0;
            let nal_type = data[pos] & 0x3f;
            let count = u16::from_be_bytes([data[pos + 1], data[pos + 2]]) as usize;
            pos += 3;
            let mut nalus = Vec::with_capacity(count);
            for _ in 0..count {
                if pos + 2 > data.len() {
                    return Err(MediaError::format("Unexpected EOF while reading hvcC NAL length"));
                }
                let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
                pos += 2;
                if pos + len > data.len() {
                    return Err(MediaError::format("Unexpected EOF while reading hvcC NAL unit"));
                }
                nalus.push(data[pos..pos + len].to_vec());
                pos += len;
            }
            arrays.push(NalArray {
                completeness,
                nal_type,
                nalus,
            });
        }
        Ok(HvccConfig {
            configuration_version: data[0],
            profile,
            min_spatial_segmentation_idc: u16::from_be_bytes([data[13], data[14]]) & 0x0fff,
            parallelism_type: data[15] & 0x03,
            chroma_format: data[16] & 0x03,
            bit_depth_luma_minus8: data[17] & 0x07,
            bit_depth_chroma_minus8: data[18] & 0x07,
            avg_frame_rate: u16::from_be_bytes([data[19], data[20]]),
            constant_frame_rate: data[21] >> 6,
            num_temporal_layers: (data[21] >> 3) & 0x07,
            temporal_id_nested: data[21] & 0x04 != 0,
            length_size_minus_one: data[21] & 0x03,
            arrays,
        })
    }

    /// Build a record from VPS, SPS and PPS NAL units.
    pub fn from_parameter_sets(
        vps: Vec<Vec<u8>>,
        sps: Vec<Vec<u8>>,
        pps: Vec<Vec<u8>>,
    ) -> MediaResult<Self> {
        let first_sps = sps
            .first()
            .ok_or_else(|| MediaError::format("No SPS available to build hvcC"))?;
        if vps.is_empty() || pps.is_empty() {
            return Err(MediaError::format("hvcC requires VPS, SPS and PPS"));
        }
        let info = HevcSpsInfo::parse(first_sps)?;
        let arrays = [(32u8, vps), (33, sps), (34, pps)]
            .into_iter()
            .map(|(nal_type, nalus)| NalArray {
                completeness: true,
                nal_type,
                nalus,
            })
            .collect();
        Ok(HvccConfig {
            configuration_version: 1,
            profile: info.profile,
            min_spatial_segmentation_idc: 0,
            parallelism_type: 0,
            chroma_format: info.chroma_format_idc,
            bit_depth_luma_minus8: info.bit_depth_luma - 8,
            bit_depth_chroma_minus8: info.bit_depth_chroma - 8,
            avg_frame_rate: 0,
            constant_frame_rate: 0,
            num_temporal_layers: info.max_sub_layers,
            temporal_id_nested: info.temporal_id_nesting,
            length_size_minus_one: 3,
            arrays,
        })
    }

    /// Build a record from the parameter sets carried in an Annex B key packet.
    pub fn from_annex_b(packet: &[u8]) -> MediaResult<Self> {
        let mut vps = Vec::new();
        let mut sps = Vec::new();
        let mut pps = Vec::new();
        for loc in NalUnitIter::new(packet, NalUnitFormat::AnnexB) {
            let nalu = loc.slice(packet);
            match HevcNaluType::from_header_byte(nalu[0]) {
                HevcNaluType::VPS => vps.push(nalu.to_vec()),
                HevcNaluType::SPS => sps.push(nalu.to_vec()),
                HevcNaluType::PPS => pps.push(nalu.to_vec()),
                _ => {}
            }
        }
        Self::from_parameter_sets(vps, sps, pps)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let p = &self.profile;
        let mut out = Vec::with_capacity(64);
        out.push(self.configuration_version);
        out.push((p.profile_space << 6) | ((p.tier as u8) << 5) | (p.profile_idc & 0x1f));
        out.extend_from_slice(&p.compatibility_flags.to_be_bytes());
        out.extend_from_slice(&p.constraint_flags);
        out.push(p.level_idc);
        out.extend_from_slice(&(0xF000 | self.min_spatial_segmentation_idc).to_be_bytes());
        out.push(0xFC | self.parallelism_type);
        out.push(0xFC | self.chroma_format);
        out.push(0xF8 | self.bit_depth_luma_minus8);
        out.push(0xF8 | self.bit_depth_chroma_minus8);
        out.extend_from_slice(&self.avg_frame_rate.to_be_bytes());
        out.push(
            (self.constant_frame_rate << 6)
                | ((self.num_temporal_layers & 0x07) << 3)
                | ((self.temporal_id_nested as u8) << 2)
                | (self.length_size_minus_one & 0x03),
        );
        out.push(self.arrays.len() as u8);
        for array in &self.arrays {
            out.push(((array.completeness as u8) << 7) | (array.nal_type & 0x3f));
            out.extend_from_slice(&(array.nalus.len() as u16).to_be_bytes());
            for nalu in &array.nalus {
                out.extend_from_slice(&(nalu.len() as u16).to_be_bytes());
                out.extend_from_slice(nalu);
            }
        }
        out
    }

    pub fn nal_length_size(&self) -> u8 {
        self.length_size_minus_one + 1
    }

    /// RFC 6381 codec string, e.g. `hvc1.1.6.L93.B0`.
    pub fn codec_string(&self) -> String {
        let p = &self.profile;
        let space = match p.profile_space {
            1 => "A",
            2 => "B",
            3 => "C",
            _ => "",
        };
        let mut s = format!(
            "hvc1.{}{}.{:X}.{}{}",
            space,
            p.profile_idc,
            p.compatibility_flags.reverse_bits(),
            if p.tier { 'H' } else { 'L' },
            p.level_idc
        );
        let used = p
            .constraint_flags
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |i| i + 1);
        for b in &p.constraint_flags[..used] {
            s.push_str(&format!(".{:X}", b));
        }
        s
    }

    /// Parameter sets as an Annex B prefix for key packets.
    pub fn parameter_sets_annex_b(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for nalu in self.arrays.iter().flat_map(|a| a.nalus.iter()) {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nalu);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::HvccConfig;
    use crate::hevc::sps::tests::main_profile_sps;

    const VPS: [u8; 4] = [0x40, 0x01, 0x0c, 0x01];
    const PPS: [u8; 4] = [0x44, 0x01, 0xc1, 0x72];

    #[test]
    fn test_build_parse_and_codec_string() {
        let config =
            HvccConfig::from_parameter_sets(vec![VPS.to_vec()], vec![main_profile_sps()], vec![PPS.to_vec()])
                .unwrap();
        assert_eq!(config.codec_string(), "hvc1.1.6.L93.B0");
        let bytes = config.to_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[22], 3);
        let parsed = HvccConfig::parse(&bytes).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.nal_length_size(), 4);
    }

    #[test]
    fn test_from_annex_b_requires_all_parameter_sets() {
        let mut packet = vec![0, 0, 0, 1];
        packet.extend_from_slice(&VPS);
        packet.extend_from_slice(&[0, 0, 0, 1]);
        packet.extend_from_slice(&main_profile_sps());
        assert!(HvccConfig::from_annex_b(&packet).is_err());
        packet.extend_from_slice(&[0, 0, 0, 1]);
        packet.extend_from_slice(&PPS);
        packet.extend_from_slice(&[0, 0, 1, 0x26, 0x01, 0xaf]);
        let config = HvccConfig::from_annex_b(&packet).unwrap();
        assert_eq!(config.arrays.len(), 3);
        assert!(config.parameter_sets_annex_b().ends_with(&PPS));
    }
}
