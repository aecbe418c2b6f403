use super::r#box::{find_box, make_full_box, require_box};
use crate::errors::{MediaError, MediaResult};

/// Parse stsz (sample size) box, or stz2 when stsz is absent
pub fn parse_stsz(stbl: &[u8]) -> MediaResult<Vec<u32>> {
    if find_box(stbl, "stsz").is_none() {
        if let Some(stz2) = find_box(stbl, "stz2") {
            return parse_stz2(stz2);
        }
    }
    let stsz = require_box(stbl, "stsz", "stbl")?;

    if stsz.len() < 12 {
        return Err(MediaError::format(
            "stsz box too small: expected at least 12 bytes",
        ));
    }

    let sample_size = u32::from_be_bytes([stsz[4], stsz[5], stsz[6], stsz[7]]);
    let sample_count = u32::from_be_bytes([stsz[8], stsz[9], stsz[10], stsz[11]]) as usize;

    if sample_size != 0 {
        // All samples have the same size
        return Ok(vec![sample_size; sample_count]);
    }

    let required_size = 12 + sample_count * 4;
    if required_size > stsz.len() {
        return Err(MediaError::format(format!(
            "stsz box too small for {} samples: expected {} bytes, got {}",
            sample_count,
            required_size,
            stsz.len()
        )));
    }

    Ok(stsz[12..required_size]
        .chunks_exact(4)
        .map(|e| u32::from_be_bytes([e[0], e[1], e[2], e[3]]))
        .collect())
}

fn parse_stz2(stz2: &[u8]) -> MediaResult<Vec<u32>> {
    if stz2.len() < 12 {
        return Err(MediaError::format("stz2 box too small"));
    }
    let field_size = stz2[7] as usize;
    let sample_count = u32::from_be_bytes([stz2[8], stz2[9], stz2[10], stz2[11]]) as usize;
    let body = &stz2[12..];
    let sizes: Vec<u32> = match field_size {
        4 => body
            .iter()
            .flat_map(|b| [(b >> 4) as u32, (b & 0x0F) as u32])
            .take(sample_count)
            .collect(),
        8 => body.iter().take(sample_count).map(|b| *b as u32).collect(),
        16 => body
            .chunks_exact(2)
            .take(sample_count)
            .map(|e| u16::from_be_bytes([e[0], e[1]]) as u32)
            .collect(),
        _ => return Err(MediaError::format(format!("invalid stz2 field size {}", field_size))),
    };
    if sizes.len() < sample_count {
        return Err(MediaError::format("stz2 box too small for its sample count"));
    }
    Ok(sizes)
}

pub fn build_stsz(sizes: &[u32]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + sizes.len() * 4);
    let uniform = sizes.first().copied().filter(|s| sizes.iter().all(|x| x == s));
    match uniform {
        Some(size) => {
            payload.extend_from_slice(&size.to_be_bytes());
            payload.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
        }
        None => {
            payload.extend_from_slice(&0u32.to_be_bytes());
            payload.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
            for size in sizes {
                payload.extend_from_slice(&size.to_be_bytes());
            }
        }
    }
    make_full_box("stsz", 0, 0, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::r#box::make_full_box;

    #[test]
    fn test_uniform_and_variable_sizes() {
        assert_eq!(parse_stsz(&build_stsz(&[10, 10, 10])).unwrap(), vec![10, 10, 10]);
        assert_eq!(build_stsz(&[10, 10, 10]).len(), 20);
        assert_eq!(parse_stsz(&build_stsz(&[3, 700, 5])).unwrap(), vec![3, 700, 5]);
    }

    #[test]
    fn test_compact_sizes() {
        let stz2 = make_full_box("stz2", 0, 0, &[0, 0, 0, 4, 0, 0, 0, 3, 0x12, 0x30]);
        assert_eq!(parse_stsz(&stz2).unwrap(), vec![1, 2, 3]);
    }
}
