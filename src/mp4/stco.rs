use super::r#box::{find_box, make_full_box};
use crate::errors::{MediaError, MediaResult};

/// Parse stco (chunk offset) or co64 box
pub fn parse_stco_or_co64(stbl: &[u8]) -> MediaResult<Vec<u64>> {
    // Try stco first (32-bit offsets)
    if let Some(stco) = find_box(stbl, "stco") {
        if stco.len() < 8 {
            return Err(MediaError::format(
                "stco box too small: expected at least 8 bytes",
            ));
        }
        let entry_count = u32::from_be_bytes([stco[4], stco[5], stco[6], stco[7]]) as usize;
        return Ok(stco[8..]
            .chunks_exact(4)
            .take(entry_count)
            .map(|e| u32::from_be_bytes([e[0], e[1], e[2], e[3]]) as u64)
            .collect());
    }

    // Try co64 (64-bit offsets)
    if let Some(co64) = find_box(stbl, "co64") {
        if co64.len() < 8 {
            return Err(MediaError::format(
                "co64 box too small: expected at least 8 bytes",
            ));
        }
        let entry_count = u32::from_be_bytes([co64[4], co64[5], co64[6], co64[7]]) as usize;
        return Ok(co64[8..]
            .chunks_exact(8)
            .take(entry_count)
            .map(|e| u64::from_be_bytes([e[0], e[1], e[2], e[3], e[4], e[5], e[6], e[7]]))
            .collect());
    }

    Err(MediaError::format(
        "No chunk offset box found: missing both stco and co64",
    ))
}

/// stco when every offset fits in 32 bits, co64 otherwise.
pub fn build_chunk_offsets(offsets: &[u64]) -> Vec<u8> {
    let large = offsets.iter().any(|o| *o > u32::MAX as u64);
    let mut payload = Vec::with_capacity(4 + offsets.len() * 8);
    payload.extend_from_slice(&(offsets.len() as u32).to_be_bytes());
    for &offset in offsets {
        if large {
            payload.extend_from_slice(&offset.to_be_bytes());
        } else {
            payload.extend_from_slice(&(offset as u32).to_be_bytes());
        }
    }
    make_full_box(if large { "co64" } else { "stco" }, 0, 0, &payload)
}
