use crate::avc::nalus::nal_to_rbsp;
use crate::bits::reader::BitReader;
use crate::errors::{MediaError, MediaResult};
use crate::track::ColorSpace;
use std::io::Cursor;

/// Fields of an H.264 sequence parameter set needed for decoder configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub chroma_format_idc: u8,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    pub width: u32,
    pub height: u32,
    pub color_space: Option<ColorSpace>,
}

impl SpsInfo {
    /// Parse an SPS NAL unit, header byte included.
    pub fn parse(nal: &[u8]) -> MediaResult<Self> {
        if nal.len() < 4 {
            return Err(MediaError::format("SPS too short"));
        }
        let rbsp = nal_to_rbsp(&nal[1..]);
        let mut r = BitReader::new(Cursor::new(rbsp));

        let profile_idc = r.read(8) as u8;
        let constraint_flags = r.read(8) as u8;
        let level_idc = r.read(8) as u8;
        r.read_ue(); // seq_parameter_set_id

        let mut chroma_format_idc = 1u8;
        let mut separate_colour_plane = false;
        let mut bit_depth_luma = 8u8;
        let mut bit_depth_chroma = 8u8;
        if matches!(
            profile_idc,
            100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
        ) {
            chroma_format_idc = r.read_ue() as u8;
            if chroma_format_idc == 3 {
                separate_colour_plane = r.read_flag();
            }
            bit_depth_luma = 8 + r.read_ue() as u8;
            bit_depth_chroma = 8 + r.read_ue() as u8;
            r.read_flag(); // qpprime_y_zero_transform_bypass_flag
            if r.read_flag() {
                let lists = if chroma_format_idc != 3 { 8 } else { 12 };
                for i in 0..lists {
                    if r.read_flag() {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 });
                    }
                }
            }
        }

        r.read_ue(); // log2_max_frame_num_minus4
        match r.read_ue() {
            0 => {
                r.read_ue(); // log2_max_pic_order_cnt_lsb_minus4
            }
            1 => {
                r.read_flag(); // delta_pic_order_always_zero_flag
                r.read_se(); // offset_for_non_ref_pic
                r.read_se(); // offset_for_top_to_bottom_field
                let cycle = r.read_ue();
                for _ in 0..cycle {
                    r.read_se();
                }
            }
            _ => {}
        }
        r.read_ue(); // max_num_ref_frames
        r.read_flag(); // gaps_in_frame_num_value_allowed_flag

        let width_in_mbs = r.read_ue() + 1;
        let height_in_map_units = r.read_ue() + 1;
        let frame_mbs_only = r.read_flag();
        if !frame_mbs_only {
            r.read_flag(); // mb_adaptive_frame_field_flag
        }
        r.read_flag(); // direct_8x8_inference_flag

        let mut crop = [0u32; 4];
        if r.read_flag() {
            for c in crop.iter_mut() {
                *c = r.read_ue();
            }
        }

        let mut color_space = None;
        if r.read_flag() {
            color_space = parse_vui_color(&mut r);
        }

        if let Some(err) = r.acc_error() {
            return Err(MediaError::format(format!("truncated SPS: {}", err)));
        }

        let chroma_array_type = if separate_colour_plane {
            0
        } else {
            chroma_format_idc
        };
        let frame_height_factor = 2 - frame_mbs_only as u32;
        let (crop_unit_x, crop_unit_y) = if chroma_array_type == 0 {
            (1, frame_height_factor)
        } else {
            let sub_width = if chroma_format_idc == 3 { 1 } else { 2 };
            let sub_height = if chroma_format_idc == 1 { 2 } else { 1 };
            (sub_width, sub_height * frame_height_factor)
        };

        let width = (width_in_mbs * 16).saturating_sub(crop_unit_x * (crop[0] + crop[1]));
        let height = (frame_height_factor * height_in_map_units * 16)
            .saturating_sub(crop_unit_y * (crop[2] + crop[3]));

        Ok(SpsInfo {
            profile_idc,
            constraint_flags,
            level_idc,
            chroma_format_idc,
            bit_depth_luma,
            bit_depth_chroma,
            width,
            height,
            color_space,
        })
    }
}

fn skip_scaling_list<R: std::io::Read>(r: &mut BitReader<R>, size: usize) {
    let mut last = 8i32;
    let mut next = 8i32;
    for _ in 0..size {
        if next != 0 {
            let delta = r.read_se();
            next = (last + delta + 256) % 256;
        }
        if next != 0 {
            last = next;
        }
    }
}

fn parse_vui_color<R: std::io::Read>(r: &mut BitReader<R>) -> Option<ColorSpace> {
    if r.read_flag() {
        // aspect_ratio_info_present_flag
        if r.read(8) == 255 {
            r.read(16);
            r.read(16);
        }
    }
    if r.read_flag() {
        r.read_flag(); // overscan_appropriate_flag
    }
    if !r.read_flag() {
        return None;
    }
    r.read(3); // video_format
    let full_range = r.read_flag();
    if r.read_flag() {
        let primaries = r.read(8) as u8;
        let transfer = r.read(8) as u8;
        let matrix = r.read(8) as u8;
        Some(ColorSpace::from_code_points(
            primaries, transfer, matrix, full_range,
        ))
    } else {
        Some(ColorSpace {
            full_range: Some(full_range),
            ..ColorSpace::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::SpsInfo;
    use crate::avc::nalus::rbsp_to_nal;
    use crate::bits::writer::BitWriter;

    #[test]
    fn test_parse_main_profile_sps_with_cropping() {
        let sps = [
            0x67, 0x4d, 0x40, 0x1e, 0xec, 0xc0, 0x50, 0x17, 0xfc, 0xb8, 0x0b, 0x50, 0x10, 0x10,
            0x14, 0x00, 0x00, 0x03, 0x01, 0xf4, 0x00, 0x00, 0x5d, 0xa8, 0x3c, 0x58, 0xb6, 0x68,
        ];
        let info = SpsInfo::parse(&sps).unwrap();
        assert_eq!(info.profile_idc, 77);
        assert_eq!(info.level_idc, 30);
        assert_eq!(info.width, 640);
        assert_eq!(info.height, 360);
        let color = info.color_space.unwrap();
        assert_eq!(color.primaries.as_deref(), Some("bt709"));
        assert_eq!(color.full_range, Some(false));
    }

    #[test]
    fn test_parse_high_profile_sps() {
        let mut w = BitWriter::new();
        w.write(100, 8);
        w.write(0, 8);
        w.write(40, 8);
        w.write_ue(0); // sps id
        w.write_ue(1); // chroma_format_idc
        w.write_ue(2); // bit_depth_luma_minus8
        w.write_ue(2); // bit_depth_chroma_minus8
        w.write_flag(false);
        w.write_flag(false); // no scaling matrix
        w.write_ue(0);
        w.write_ue(2); // poc type 2
        w.write_ue(1);
        w.write_flag(false);
        w.write_ue(119); // 1920 / 16 - 1
        w.write_ue(67); // 1088 / 16 - 1
        w.write_flag(true);
        w.write_flag(true);
        w.write_flag(true); // cropping
        w.write_ue(0);
        w.write_ue(0);
        w.write_ue(0);
        w.write_ue(4);
        w.write_flag(false); // no VUI
        w.write_trailing_bits();
        let mut nal = vec![0x67];
        nal.extend(rbsp_to_nal(&w.into_bytes()));

        let info = SpsInfo::parse(&nal).unwrap();
        assert_eq!(info.profile_idc, 100);
        assert_eq!(info.bit_depth_luma, 10);
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert_eq!(info.color_space, None);
    }
}
