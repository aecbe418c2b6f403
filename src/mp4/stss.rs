use super::r#box::{find_box, make_full_box};

/// Parse stss (sync samples), 1-based sample numbers. `None` when every sample is a sync sample.
pub fn parse_stss(stbl: &[u8]) -> Option<Vec<u32>> {
    let stss = find_box(stbl, "stss")?;

    if stss.len() < 8 {
        return None;
    }

    let entry_count = u32::from_be_bytes([stss[4], stss[5], stss[6], stss[7]]) as usize;
    Some(
        stss[8..]
            .chunks_exact(4)
            .take(entry_count)
            .map(|e| u32::from_be_bytes([e[0], e[1], e[2], e[3]]))
            .collect(),
    )
}

pub fn build_stss(sync_samples: &[u32]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + sync_samples.len() * 4);
    payload.extend_from_slice(&(sync_samples.len() as u32).to_be_bytes());
    for sample in sync_samples {
        payload.extend_from_slice(&sample.to_be_bytes());
    }
    make_full_box("stss", 0, 0, &payload)
}
