//! SimpleBlock and Block payloads, including the three lacing schemes.
//!
//! ```text
//! [track number: vint] [timestamp: i16, relative to the cluster] [flags: u8] [lacing header] [frames]
//! ```

use super::ebml::{read_vint, write_size, UNKNOWN_SIZE};
use super::elements::SIMPLE_BLOCK;
use crate::errors::{MediaError, MediaResult};

const FLAG_KEY: u8 = 0x80;
const LACING_MASK: u8 = 0x06;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lacing {
    None,
    Xiph,
    Fixed,
    Ebml,
}

/// A parsed block with the byte ranges of its frames
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub track_number: u64,
    pub relative_timestamp: i16,
    /// SimpleBlock key flag. Blocks inside a BlockGroup use ReferenceBlock instead.
    pub key_flag: bool,
    /// `(offset, length)` of each frame within the block payload.
    pub frames: Vec<(usize, usize)>,
}

pub fn parse_block(data: &[u8]) -> MediaResult<Block> {
    let truncated = || MediaError::format("truncated Matroska block");
    let mut pos = 0;
    let track_number = read_vint(data, &mut pos)
        .filter(|n| *n != UNKNOWN_SIZE)
        .ok_or_else(truncated)?;
    let header = data.get(pos..pos + 3).ok_or_else(truncated)?;
    let relative_timestamp = i16::from_be_bytes([header[0], header[1]]);
    let flags = header[2];
    pos += 3;

    let lacing = match (flags & LACING_MASK) >> 1 {
        0 => Lacing::None,
        1 => Lacing::Xiph,
        2 => Lacing::Fixed,
        _ => Lacing::Ebml,
    };
    let frames = match lacing {
        Lacing::None => vec![(pos, data.len() - pos)],
        _ => parse_laced_frames(data, pos, lacing)?,
    };

    Ok(Block {
        track_number,
        relative_timestamp,
        key_flag: flags & FLAG_KEY != 0,
        frames,
    })
}

fn parse_laced_frames(data: &[u8], mut pos: usize, lacing: Lacing) -> MediaResult<Vec<(usize, usize)>> {
    let invalid = || MediaError::format("invalid Matroska lacing header");
    let count = *data.get(pos).ok_or_else(invalid)? as usize + 1;
    pos += 1;

    let mut sizes: Vec<usize> = Vec::with_capacity(count);
    match lacing {
        Lacing::Xiph => {
            for _ in 0..count - 1 {
                let mut size = 0usize;
                loop {
                    let b = *data.get(pos).ok_or_else(invalid)?;
                    pos += 1;
                    size += b as usize;
                    if b != 0xFF {
                        break;
                    }
                }
                sizes.push(size);
            }
        }
        Lacing::Ebml => {
            let first = read_vint(data, &mut pos).ok_or_else(invalid)?;
            let mut size = first as i64;
            sizes.push(first as usize);
            for _ in 1..count - 1 {
                let start = pos;
                let raw = read_vint(data, &mut pos).ok_or_else(invalid)? as i64;
                let width = (pos - start) as u32;
                let bias = (1i64 << (7 * width - 1)) - 1;
                size += raw - bias;
                if size < 0 {
                    return Err(invalid());
                }
                sizes.push(size as usize);
            }
        }
        Lacing::Fixed | Lacing::None => {
            let remaining = data.len().saturating_sub(pos);
            if remaining % count != 0 {
                return Err(invalid());
            }
            sizes = vec![remaining / count; count - 1];
        }
    }

    let listed: usize = sizes.iter().sum();
    let remaining = data.len().checked_sub(pos).ok_or_else(invalid)?;
    if listed > remaining {
        return Err(invalid());
    }
    sizes.push(remaining - listed);

    let mut frames = Vec::with_capacity(count);
    for size in sizes {
        frames.push((pos, size));
        pos += size;
    }
    Ok(frames)
}

/// Serialize a complete SimpleBlock element holding one frame.
pub fn build_simple_block(track_number: u64, relative_timestamp: i16, is_key: bool, frame: &[u8]) -> Vec<u8> {
    let body = block_body(track_number, relative_timestamp, if is_key { FLAG_KEY } else { 0 }, frame);
    let mut out = Vec::with_capacity(body.len() + 12);
    super::ebml::write_id(&mut out, SIMPLE_BLOCK);
    write_size(&mut out, body.len() as u64);
    out.extend_from_slice(&body);
    out
}

/// Payload of a Block element (no lacing).
pub fn block_body(track_number: u64, relative_timestamp: i16, flags: u8, frame: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(frame.len() + 12);
    write_size(&mut body, track_number);
    body.extend_from_slice(&relative_timestamp.to_be_bytes());
    body.push(flags);
    body.extend_from_slice(frame);
    body
}
