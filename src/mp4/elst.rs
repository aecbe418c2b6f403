use super::r#box::{find_path, full_box, make_full_box};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditListEntry {
    /// In movie timescale units.
    pub segment_duration: u64,
    /// In media timescale units, -1 for an empty edit.
    pub media_time: i64,
}

/// Parse the edit list of a trak, if any
pub fn parse_elst(trak: &[u8]) -> Vec<EditListEntry> {
    let Some((version, _, body)) = find_path(trak, &["edts", "elst"]).and_then(full_box) else {
        return Vec::new();
    };
    if body.len() < 4 {
        return Vec::new();
    }
    let entry_count = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
    let entry_size = if version == 1 { 20 } else { 12 };
    body[4..]
        .chunks_exact(entry_size)
        .take(entry_count)
        .map(|e| {
            if version == 1 {
                EditListEntry {
                    segment_duration: u64::from_be_bytes([e[0], e[1], e[2], e[3], e[4], e[5], e[6], e[7]]),
                    media_time: i64::from_be_bytes([e[8], e[9], e[10], e[11], e[12], e[13], e[14], e[15]]),
                }
            } else {
                EditListEntry {
                    segment_duration: u32::from_be_bytes([e[0], e[1], e[2], e[3]]) as u64,
                    media_time: i32::from_be_bytes([e[4], e[5], e[6], e[7]]) as i64,
                }
            }
        })
        .collect()
}

/// Presentation shift in seconds: leading empty edits delay, the first
/// media edit's start time advances.
pub fn presentation_offset(entries: &[EditListEntry], movie_timescale: u32, media_timescale: u32) -> f64 {
    let mut offset = 0.0;
    for entry in entries {
        if entry.media_time == -1 {
            if movie_timescale > 0 {
                offset += entry.segment_duration as f64 / movie_timescale as f64;
            }
        } else {
            offset -= entry.media_time as f64 / media_timescale as f64;
            break;
        }
    }
    offset
}

pub fn build_edts(entries: &[EditListEntry]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + entries.len() * 20);
    payload.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for entry in entries {
        payload.extend_from_slice(&entry.segment_duration.to_be_bytes());
        payload.extend_from_slice(&entry.media_time.to_be_bytes());
        payload.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate 1.0
    }
    super::r#box::make_box("edts", &make_full_box("elst", 1, 0, &payload))
}
