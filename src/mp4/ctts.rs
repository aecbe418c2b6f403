use super::r#box::{find_box, full_box, make_full_box};
use crate::errors::{MediaError, MediaResult};

/// Per-sample composition offsets from an optional ctts box (version 1 offsets are signed)
pub fn parse_ctts(stbl: &[u8], sample_count: usize) -> MediaResult<Option<Vec<i64>>> {
    let Some(ctts) = find_box(stbl, "ctts") else {
        return Ok(None);
    };
    let (version, _, body) =
        full_box(ctts).ok_or_else(|| MediaError::format("ctts box too small"))?;
    if body.len() < 4 {
        return Err(MediaError::format("ctts box too small"));
    }
    let entry_count = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
    if 4 + entry_count * 8 > body.len() {
        return Err(MediaError::format(format!(
            "ctts box too small for {} entries",
            entry_count
        )));
    }
    let mut offsets = Vec::with_capacity(sample_count);
    for e in body[4..4 + entry_count * 8].chunks_exact(8) {
        let count = u32::from_be_bytes([e[0], e[1], e[2], e[3]]);
        let raw = [e[4], e[5], e[6], e[7]];
        let offset = if version == 0 {
            u32::from_be_bytes(raw) as i64
        } else {
            i32::from_be_bytes(raw) as i64
        };
        for _ in 0..count {
            offsets.push(offset);
        }
    }
    // pad short tables with the last offset
    let fill = offsets.last().copied().unwrap_or(0);
    offsets.resize(sample_count, fill);
    Ok(Some(offsets))
}

/// Version 1 ctts from per-sample offsets, run-length encoded.
pub fn build_ctts(offsets: &[i32]) -> Vec<u8> {
    let mut runs: Vec<(u32, i32)> = Vec::new();
    for &offset in offsets {
        match runs.last_mut() {
            Some((count, last)) if *last == offset => *count += 1,
            _ => runs.push((1, offset)),
        }
    }
    let mut payload = Vec::with_capacity(4 + runs.len() * 8);
    payload.extend_from_slice(&(runs.len() as u32).to_be_bytes());
    for (count, offset) in runs {
        payload.extend_from_slice(&count.to_be_bytes());
        payload.extend_from_slice(&offset.to_be_bytes());
    }
    make_full_box("ctts", 1, 0, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_offsets() {
        let stbl = build_ctts(&[1024, -512, -512, 0]);
        let offsets = parse_ctts(&stbl, 4).unwrap().unwrap();
        assert_eq!(offsets, vec![1024, -512, -512, 0]);
        assert_eq!(parse_ctts(&[], 4).unwrap(), None);
    }
}
