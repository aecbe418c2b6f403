use crate::avc::nalus::nal_to_rbsp;
use crate::bits::reader::BitReader;
use crate::errors::{MediaError, MediaResult};
use std::io::Cursor;

/// general_profile_tier_level fields shared by the SPS and hvcC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileTierLevel {
    pub profile_space: u8,
    pub tier: bool,
    pub profile_idc: u8,
    pub compatibility_flags: u32,
    pub constraint_flags: [u8; 6],
    pub level_idc: u8,
}

/// Fields of an H.265 sequence parameter set
#[derive(Debug, Clone, PartialEq)]
pub struct HevcSpsInfo {
    pub max_sub_layers: u8,
    pub temporal_id_nesting: bool,
    pub profile: ProfileTierLevel,
    pub chroma_format_idc: u8,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    pub width: u32,
    pub height: u32,
}

impl HevcSpsInfo {
    /// Parse an SPS NAL unit including its two-byte header.
    pub fn parse(nal: &[u8]) -> MediaResult<Self> {
        if nal.len() < 3 {
            return Err(MediaError::format("HEVC SPS too short"));
        }
        let rbsp = nal_to_rbsp(&nal[2..]);
        let mut r = BitReader::new(Cursor::new(rbsp));

        r.read(4); // sps_video_parameter_set_id
        let max_sub_layers_minus1 = r.read(3) as u8;
        let temporal_id_nesting = r.read_flag();
        let profile = read_profile_tier_level(&mut r, max_sub_layers_minus1);

        r.read_ue(); // sps_seq_parameter_set_id
        let chroma_format_idc = r.read_ue() as u8;
        let mut separate_colour_plane = false;
        if chroma_format_idc == 3 {
            separate_colour_plane = r.read_flag();
        }
        let mut width = r.read_ue();
        let mut height = r.read_ue();
        if r.read_flag() {
            let left = r.read_ue();
            let right = r.read_ue();
            let top = r.read_ue();
            let bottom = r.read_ue();
            let chroma = if separate_colour_plane { 0 } else { chroma_format_idc };
            let sub_width = if chroma == 1 || chroma == 2 { 2 } else { 1 };
            let sub_height = if chroma == 1 { 2 } else { 1 };
            width = width.saturating_sub(sub_width * (left + right));
            height = height.saturating_sub(sub_height * (top + bottom));
        }
        let bit_depth_luma = 8 + r.read_ue() as u8;
        let bit_depth_chroma = 8 + r.read_ue() as u8;

        if let Some(err) = r.acc_error() {
            return Err(MediaError::format(format!("truncated HEVC SPS: {}", err)));
        }

        Ok(HevcSpsInfo {
            max_sub_layers: max_sub_layers_minus1 + 1,
            temporal_id_nesting,
            profile,
            chroma_format_idc,
            bit_depth_luma,
            bit_depth_chroma,
            width,
            height,
        })
    }
}

fn read_profile_tier_level<R: std::io::Read>(
    r: &mut BitReader<R>,
    max_sub_layers_minus1: u8,
) -> ProfileTierLevel {
    let profile_space = r.read(2) as u8;
    let tier = r.read_flag();
    let profile_idc = r.read(5) as u8;
    let compatibility_flags = r.read(32);
    let mut constraint_flags = [0u8; 6];
    for b in constraint_flags.iter_mut() {
        *b = r.read(8) as u8;
    }
    let level_idc = r.read(8) as u8;

    let mut profile_present = [false; 8];
    let mut level_present = [false; 8];
    for i in 0..max_sub_layers_minus1 as usize {
        profile_present[i] = r.read_flag();
        level_present[i] = r.read_flag();
    }
    if max_sub_layers_minus1 > 0 {
        for _ in max_sub_layers_minus1..8 {
            r.read(2);
        }
    }
    for i in 0..max_sub_layers_minus1 as usize {
        if profile_present[i] {
            r.skip(88);
        }
        if level_present[i] {
            r.read(8);
        }
    }

    ProfileTierLevel {
        profile_space,
        tier,
        profile_idc,
        compatibility_flags,
        constraint_flags,
        level_idc,
    }
}
