use super::mvhd::UNITY_MATRIX;
use super::r#box::make_full_box;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackHeader {
    pub track_id: u32,
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation derived from the transformation matrix.
    pub rotation: u16,
}

/// Parse a tkhd box payload
pub fn parse_tkhd(tkhd: &[u8]) -> Option<TrackHeader> {
    let version = *tkhd.first()?;
    let (id_pos, matrix_pos) = if version == 1 { (20, 52) } else { (12, 40) };
    let size_pos = matrix_pos + 36;
    if tkhd.len() < size_pos + 8 {
        return None;
    }
    let be32 = |pos: usize| u32::from_be_bytes([tkhd[pos], tkhd[pos + 1], tkhd[pos + 2], tkhd[pos + 3]]);
    let a = be32(matrix_pos) as i32;
    let b = be32(matrix_pos + 4) as i32;
    let rotation = match (a.signum(), b.signum()) {
        (0, 1) => 90,
        (-1, 0) => 180,
        (0, -1) => 270,
        _ => 0,
    };
    Some(TrackHeader {
        track_id: be32(id_pos),
        enabled: tkhd[3] & 0x01 != 0,
        width: be32(size_pos) >> 16,
        height: be32(size_pos + 4) >> 16,
        rotation,
    })
}

fn rotation_matrix(rotation: u16) -> [u32; 9] {
    let one = 0x0001_0000u32;
    let minus_one = (-0x0001_0000i32) as u32;
    let mut matrix = UNITY_MATRIX;
    let (a, b, c, d) = match rotation {
        90 => (0, one, minus_one, 0),
        180 => (minus_one, 0, 0, minus_one),
        270 => (0, minus_one, one, 0),
        _ => (one, 0, 0, one),
    };
    matrix[0] = a;
    matrix[1] = b;
    matrix[3] = c;
    matrix[4] = d;
    matrix
}

pub fn build_tkhd(header: &TrackHeader, duration: u64, is_audio: bool) -> Vec<u8> {
    let mut payload = Vec::with_capacity(92);
    payload.extend_from_slice(&[0u8; 16]);
    payload.extend_from_slice(&header.track_id.to_be_bytes());
    payload.extend_from_slice(&[0u8; 4]);
    payload.extend_from_slice(&duration.to_be_bytes());
    payload.extend_from_slice(&[0u8; 8]);
    payload.extend_from_slice(&0u16.to_be_bytes()); // layer
    payload.extend_from_slice(&0u16.to_be_bytes()); // alternate group
    payload.extend_from_slice(&(if is_audio { 0x0100u16 } else { 0 }).to_be_bytes());
    payload.extend_from_slice(&[0, 0]);
    for value in rotation_matrix(header.rotation) {
        payload.extend_from_slice(&value.to_be_bytes());
    }
    payload.extend_from_slice(&(header.width << 16).to_be_bytes());
    payload.extend_from_slice(&(header.height << 16).to_be_bytes());
    // enabled, in movie, in preview
    make_full_box("tkhd", 1, 0x000003, &payload)
}
