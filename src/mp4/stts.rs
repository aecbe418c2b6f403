use super::r#box::{make_full_box, require_box};
use crate::errors::{MediaError, MediaResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// Parse the stts (decoding time to sample) box of an stbl
pub fn parse_stts(stbl: &[u8]) -> MediaResult<Vec<SttsEntry>> {
    let stts = require_box(stbl, "stts", "stbl")?;

    if stts.len() < 8 {
        return Err(MediaError::format(
            "stts box too small: expected at least 8 bytes",
        ));
    }

    let entry_count = u32::from_be_bytes([stts[4], stts[5], stts[6], stts[7]]) as usize;

    // Verify that the box has enough space for all entries
    let required_size = 8 + entry_count * 8;
    if required_size > stts.len() {
        return Err(MediaError::format(format!(
            "stts box too small for {} entries: expected {} bytes, got {}",
            entry_count,
            required_size,
            stts.len()
        )));
    }

    Ok(stts[8..required_size]
        .chunks_exact(8)
        .map(|e| SttsEntry {
            sample_count: u32::from_be_bytes([e[0], e[1], e[2], e[3]]),
            sample_delta: u32::from_be_bytes([e[4], e[5], e[6], e[7]]),
        })
        .collect())
}

/// Decode timestamps in timescale units, one per sample
pub fn build_decode_times(entries: &[SttsEntry]) -> Vec<u64> {
    let mut times = Vec::new();
    let mut time = 0u64;
    for entry in entries {
        for _ in 0..entry.sample_count {
            times.push(time);
            time += entry.sample_delta as u64;
        }
    }
    times
}

/// Run-length encode per-sample deltas.
pub fn compress_deltas(deltas: &[u32]) -> Vec<SttsEntry> {
    let mut entries: Vec<SttsEntry> = Vec::new();
    for &delta in deltas {
        match entries.last_mut() {
            Some(last) if last.sample_delta == delta => last.sample_count += 1,
            _ => entries.push(SttsEntry {
                sample_count: 1,
                sample_delta: delta,
            }),
        }
    }
    entries
}

pub fn build_stts(entries: &[SttsEntry]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + entries.len() * 8);
    payload.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for entry in entries {
        payload.extend_from_slice(&entry.sample_count.to_be_bytes());
        payload.extend_from_slice(&entry.sample_delta.to_be_bytes());
    }
    make_full_box("stts", 0, 0, &payload)
}
