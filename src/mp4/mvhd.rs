use super::r#box::make_full_box;

/// Extract (timescale, duration) from an mvhd box payload
pub fn parse_mvhd(mvhd: &[u8]) -> Option<(u32, u64)> {
    match mvhd.first()? {
        0 if mvhd.len() >= 20 => {
            let timescale = u32::from_be_bytes([mvhd[12], mvhd[13], mvhd[14], mvhd[15]]);
            let duration = u32::from_be_bytes([mvhd[16], mvhd[17], mvhd[18], mvhd[19]]) as u64;
            Some((timescale, duration))
        }
        1 if mvhd.len() >= 32 => {
            let timescale = u32::from_be_bytes([mvhd[20], mvhd[21], mvhd[22], mvhd[23]]);
            let duration = u64::from_be_bytes([
                mvhd[24], mvhd[25], mvhd[26], mvhd[27], mvhd[28], mvhd[29], mvhd[30], mvhd[31],
            ]);
            Some((timescale, duration))
        }
        _ => None,
    }
}

/// Duration in seconds from an mvhd box payload
pub fn extract_duration_from_mvhd(mvhd: &[u8]) -> Option<f64> {
    let (timescale, duration) = parse_mvhd(mvhd)?;
    (timescale > 0).then(|| duration as f64 / timescale as f64)
}

/// Unity transformation matrix shared by mvhd and tkhd.
pub const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

pub fn build_mvhd(timescale: u32, duration: u64, next_track_id: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(108);
    payload.extend_from_slice(&[0u8; 16]);
    payload.extend_from_slice(&timescale.to_be_bytes());
    payload.extend_from_slice(&duration.to_be_bytes());
    payload.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate 1.0
    payload.extend_from_slice(&0x0100u16.to_be_bytes()); // volume 1.0
    payload.extend_from_slice(&[0u8; 10]);
    for value in UNITY_MATRIX {
        payload.extend_from_slice(&value.to_be_bytes());
    }
    payload.extend_from_slice(&[0u8; 24]); // pre_defined
    payload.extend_from_slice(&next_track_id.to_be_bytes());
    make_full_box("mvhd", 1, 0, &payload)
}
