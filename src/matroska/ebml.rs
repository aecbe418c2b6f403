//! EBML variable-size integers, element headers and typed values.
//!
//! IDs keep their length marker bit, sizes strip it. A size with every data
//! bit set means "unknown" and is reported as [`UNKNOWN_SIZE`].

use super::elements::{DOC_TYPE, EBML_HEADER};
use crate::errors::{MediaError, MediaResult};
use crate::streams::SourceReader;

pub const UNKNOWN_SIZE: u64 = u64::MAX;

/// Longest element header: 4 byte ID and 8 byte size.
pub const MAX_HEADER_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub id: u32,
    /// Payload size, [`UNKNOWN_SIZE`] when not stated.
    pub size: u64,
    pub header_size: usize,
}

impl ElementHeader {
    pub fn is_unknown_size(&self) -> bool {
        self.size == UNKNOWN_SIZE
    }

    /// Total element length, `None` for unknown sizes.
    pub fn total_size(&self) -> Option<u64> {
        (!self.is_unknown_size()).then(|| self.header_size as u64 + self.size)
    }
}

/// Width in bytes of a vint from its first byte.
pub fn vint_width(first: u8) -> Option<usize> {
    match first.leading_zeros() {
        n @ 0..=7 => Some(n as usize + 1),
        _ => None,
    }
}

/// Read a size-style vint (marker stripped).
pub fn read_vint(data: &[u8], pos: &mut usize) -> Option<u64> {
    let first = *data.get(*pos)?;
    let width = vint_width(first)?;
    let bytes = data.get(*pos..*pos + width)?;
    let mut value = (first & (0xFFu16 >> width) as u8) as u64;
    for b in &bytes[1..] {
        value = (value << 8) | *b as u64;
    }
    *pos += width;
    let all_ones = (1u64 << (7 * width)) - 1;
    Some(if value == all_ones { UNKNOWN_SIZE } else { value })
}

/// Read an element ID (marker kept), at most 4 bytes.
pub fn read_id(data: &[u8], pos: &mut usize) -> Option<u32> {
    let first = *data.get(*pos)?;
    let width = vint_width(first).filter(|w| *w <= 4)?;
    let bytes = data.get(*pos..*pos + width)?;
    *pos += width;
    Some(bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
}

pub fn parse_element_header(data: &[u8], pos: &mut usize) -> Option<ElementHeader> {
    let start = *pos;
    let id = read_id(data, pos)?;
    let size = match read_vint(data, pos) {
        Some(size) => size,
        None => {
            *pos = start;
            return None;
        }
    };
    Some(ElementHeader {
        id,
        size,
        header_size: *pos - start,
    })
}

/// Read the header of the element starting at `offset`, `None` at end of data.
pub async fn read_element_header_at(
    reader: &SourceReader,
    offset: u64,
) -> MediaResult<Option<ElementHeader>> {
    let head = reader.read(offset, offset + MAX_HEADER_SIZE as u64).await?;
    if head.is_empty() {
        return Ok(None);
    }
    let mut pos = 0;
    match parse_element_header(&head, &mut pos) {
        Some(header) => Ok(Some(header)),
        None if head.len() < 2 => Ok(None),
        None => Err(MediaError::format(format!(
            "invalid EBML element header at offset {}",
            offset
        ))),
    }
}

/// Child element of a master element
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Child<'a> {
    pub id: u32,
    /// Offset of the element header within the parent payload.
    pub offset: usize,
    pub payload_offset: usize,
    pub data: &'a [u8],
}

/// Children of a master element payload. An unknown-size child runs to the
/// end of `data`; a child overrunning `data` ends the walk.
pub fn children(data: &[u8]) -> Vec<Child<'_>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let offset = pos;
        let Some(header) = parse_element_header(data, &mut pos) else {
            break;
        };
        let end = match header.total_size() {
            None => data.len(),
            Some(total) => match offset.checked_add(total as usize) {
                Some(end) if end <= data.len() => end,
                _ => break,
            },
        };
        out.push(Child {
            id: header.id,
            offset,
            payload_offset: pos,
            data: &data[pos..end],
        });
        pos = end;
    }
    out
}

pub fn find_child(data: &[u8], id: u32) -> Option<&[u8]> {
    children(data).into_iter().find(|c| c.id == id).map(|c| c.data)
}

pub fn read_uint(data: &[u8]) -> u64 {
    data.iter().take(8).fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

pub fn read_sint(data: &[u8]) -> i64 {
    if data.is_empty() {
        return 0;
    }
    let len = data.len().min(8);
    let unsigned = read_uint(&data[..len]);
    let shift = 64 - 8 * len as u32;
    ((unsigned << shift) as i64) >> shift
}

pub fn read_float(data: &[u8]) -> Option<f64> {
    match data.len() {
        0 => Some(0.0),
        4 => Some(f32::from_be_bytes([data[0], data[1], data[2], data[3]]) as f64),
        8 => Some(f64::from_be_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
        ])),
        _ => None,
    }
}

/// String value with trailing NUL padding removed.
pub fn read_string(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

pub fn uint_child(data: &[u8], id: u32) -> Option<u64> {
    find_child(data, id).map(read_uint)
}

pub fn float_child(data: &[u8], id: u32) -> Option<f64> {
    find_child(data, id).and_then(read_float)
}

pub fn string_child(data: &[u8], id: u32) -> Option<String> {
    find_child(data, id).map(read_string)
}

/// DocType of an EBML header at the start of `head`, which may be truncated.
pub fn read_doc_type(head: &[u8]) -> Option<String> {
    let mut pos = 0;
    let header = parse_element_header(head, &mut pos)?;
    if header.id != EBML_HEADER {
        return None;
    }
    let end = header
        .total_size()
        .map_or(head.len(), |total| (total as usize).min(head.len()));
    string_child(&head[pos..end], DOC_TYPE)
}

pub fn write_id(out: &mut Vec<u8>, id: u32) {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().position(|b| *b != 0).unwrap_or(3);
    out.extend_from_slice(&bytes[skip..]);
}

/// Smallest vint width able to hold `size`.
pub fn size_width(size: u64) -> usize {
    (1..=8).find(|w| size < (1u64 << (7 * w)) - 1).unwrap_or(8)
}

pub fn write_size(out: &mut Vec<u8>, size: u64) {
    write_size_with_width(out, size, size_width(size));
}

/// Size vint padded to `width` bytes, so it can be patched in place.
pub fn write_size_with_width(out: &mut Vec<u8>, size: u64, width: usize) {
    let marked = size | (1u64 << (7 * width));
    out.extend_from_slice(&marked.to_be_bytes()[8 - width..]);
}

/// 8 byte "unknown size" vint.
pub const UNKNOWN_SIZE_VINT: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

pub fn make_element(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + MAX_HEADER_SIZE);
    write_id(&mut out, id);
    write_size(&mut out, payload.len() as u64);
    out.extend_from_slice(payload);
    out
}

pub fn make_master(id: u32, children: &[Vec<u8>]) -> Vec<u8> {
    make_element(id, &children.concat())
}

pub fn make_uint(id: u32, value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    make_element(id, &bytes[skip..])
}

pub fn make_float(id: u32, value: f64) -> Vec<u8> {
    make_element(id, &value.to_be_bytes())
}

pub fn make_string(id: u32, value: &str) -> Vec<u8> {
    make_element(id, value.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matroska::elements::{EBML_VERSION, SEGMENT};

    #[test]
    fn test_vint_sizes() {
        let mut pos = 0;
        assert_eq!(read_vint(&[0x85], &mut pos), Some(5));
        pos = 0;
        assert_eq!(read_vint(&[0x40, 0x03], &mut pos), Some(3));
        assert_eq!(pos, 2);
        pos = 0;
        assert_eq!(read_vint(&[0xFF], &mut pos), Some(UNKNOWN_SIZE));
        pos = 0;
        assert_eq!(read_vint(&UNKNOWN_SIZE_VINT, &mut pos), Some(UNKNOWN_SIZE));
        pos = 0;
        assert_eq!(read_vint(&[0x00, 0x01], &mut pos), None);
        pos = 0;
        assert_eq!(read_vint(&[0x40], &mut pos), None);
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_ids_keep_marker() {
        let mut pos = 0;
        assert_eq!(read_id(&[0x18, 0x53, 0x80, 0x67], &mut pos), Some(SEGMENT));
        let mut out = Vec::new();
        write_id(&mut out, EBML_VERSION);
        assert_eq!(out, vec![0x42, 0x86]);
    }

    #[test]
    fn test_size_widths() {
        // 127 is the one byte unknown marker and needs two bytes
        assert_eq!(size_width(126), 1);
        assert_eq!(size_width(127), 2);
        let mut out = Vec::new();
        write_size_with_width(&mut out, 5, 8);
        assert_eq!(out, vec![0x01, 0, 0, 0, 0, 0, 0, 5]);
        let mut pos = 0;
        assert_eq!(read_vint(&out, &mut pos), Some(5));
    }

    #[test]
    fn test_signed_and_float_values() {
        assert_eq!(read_sint(&[0xFF, 0xFE]), -2);
        assert_eq!(read_sint(&[0x7F]), 127);
        assert_eq!(read_float(&42.0f32.to_be_bytes()), Some(42.0));
        assert_eq!(read_float(&[0, 0, 0]), None);
        assert_eq!(read_string(b"hi\0\0"), "hi");
    }

    #[test]
    fn test_doc_type_from_truncated_head() {
        let header = make_master(
            EBML_HEADER,
            &[make_uint(EBML_VERSION, 1), make_string(DOC_TYPE, "webm")],
        );
        assert_eq!(read_doc_type(&header).as_deref(), Some("webm"));
        let mut padded = header.clone();
        padded.extend_from_slice(&[0; 32]);
        assert_eq!(read_doc_type(&padded).as_deref(), Some("webm"));
        assert_eq!(read_doc_type(&[0x1A, 0x45]), None);
    }

    #[test]
    fn test_children_with_unknown_size_tail() {
        let mut data = make_uint(0xE7, 1000);
        data.extend_from_slice(&[0xA3, 0xFF, 1, 2, 3]);
        let kids = children(&data);
        assert_eq!(kids.len(), 2);
        assert_eq!(read_uint(kids[0].data), 1000);
        assert_eq!(kids[1].data, &[1, 2, 3]);
    }
}
