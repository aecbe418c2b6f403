use crate::bits::reader::{read_u32, read_u32_be, read_u64, read_u64_be};
use crate::errors::{MediaError, MediaResult};
use crate::streams::SourceReader;
use std::io::{Cursor, Read};

/// Box header information
#[derive(Debug, Clone, PartialEq)]
pub struct BoxHeader {
    pub name: String,
    pub name_bytes: [u8; 4],
    /// Total size including the header. 0 means "extends to end of file".
    pub size: u64,
    pub header_size: u64,
}

impl BoxHeader {
    pub fn payload_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size)
    }
}

/// Read a box header from an io source
pub fn read_box_header<R: Read>(r: &mut R) -> MediaResult<BoxHeader> {
    let size32 = read_u32_be(r)
        .map_err(|e| MediaError::format(format!("Failed to read box size: {}", e)))?;
    let mut name_buf = [0u8; 4];
    r.read_exact(&mut name_buf)
        .map_err(|e| MediaError::format(format!("Failed to read box name: {}", e)))?;
    let mut size = size32 as u64;
    let mut header_size = 8u64;
    if size32 == 1 {
        size = read_u64_be(r)
            .map_err(|e| MediaError::format(format!("Failed to read extended box size: {}", e)))?;
        header_size = 16;
    }
    Ok(BoxHeader {
        name: String::from_utf8_lossy(&name_buf).into_owned(),
        name_bytes: name_buf,
        size,
        header_size,
    })
}

/// Read the header of the box starting at `offset`, `None` at end of data.
pub async fn read_box_header_at(
    reader: &SourceReader,
    offset: u64,
) -> MediaResult<Option<BoxHeader>> {
    let head = reader.read(offset, offset + 16).await?;
    if head.len() < 8 {
        return Ok(None);
    }
    let header = read_box_header(&mut Cursor::new(head))?;
    if header.size != 0 && header.size < header.header_size {
        return Err(MediaError::format(format!(
            "invalid size {} for box {} at offset {}",
            header.size, header.name, offset
        )));
    }
    Ok(Some(header))
}

/// Parse a box header from a byte slice advancing the cursor
pub fn parse_box_header(data: &[u8], pos: &mut usize) -> Option<(String, u64)> {
    if *pos + 8 > data.len() {
        return None;
    }
    let size = read_u32(data, pos)? as u64;
    let name = &data[*pos..*pos + 4];
    *pos += 4;
    let mut real_size = size;
    if size == 1 {
        if *pos + 8 > data.len() {
            return None;
        }
        real_size = read_u64(data, pos)?;
    }
    Some((std::str::from_utf8(name).ok()?.to_string(), real_size))
}

/// Iterate the child boxes of `data` as `(name, start, payload_start, end)`.
pub fn child_boxes(data: &[u8]) -> Vec<(String, usize, usize, usize)> {
    let mut boxes = Vec::new();
    let mut pos = 0usize;
    while pos + 8 <= data.len() {
        let start = pos;
        let Some((name, size)) = parse_box_header(data, &mut pos) else {
            break;
        };
        let end = if size == 0 {
            data.len()
        } else {
            start.saturating_add(size as usize)
        };
        if end < pos || end > data.len() {
            break;
        }
        boxes.push((name, start, pos, end));
        pos = end;
    }
    boxes
}

/// Find a box and return the contained slice
pub fn find_box<'a>(data: &'a [u8], name: &str) -> Option<&'a [u8]> {
    let (_, start, end) = find_box_range(data, name)?;
    Some(&data[start..end])
}

/// Find a box and return the start and end indices of its payload
pub fn find_box_range(data: &[u8], name: &str) -> Option<(usize, usize, usize)> {
    child_boxes(data)
        .into_iter()
        .find(|(n, ..)| n == name)
        .map(|(_, start, payload, end)| (start, payload, end))
}

/// Payloads of every child box called `name`.
pub fn find_boxes<'a>(data: &'a [u8], name: &str) -> Vec<&'a [u8]> {
    child_boxes(data)
        .into_iter()
        .filter(|(n, ..)| n == name)
        .map(|(_, _, payload, end)| &data[payload..end])
        .collect()
}

/// Follow a path of nested boxes, e.g. `["mdia", "minf", "stbl"]`.
pub fn find_path<'a>(data: &'a [u8], path: &[&str]) -> Option<&'a [u8]> {
    path.iter().try_fold(data, |current, name| find_box(current, name))
}

/// Like [`find_box`] but a missing box is a format error.
pub fn require_box<'a>(data: &'a [u8], name: &str, parent: &str) -> MediaResult<&'a [u8]> {
    find_box(data, name)
        .ok_or_else(|| MediaError::format(format!("{} box not found in {} box", name, parent)))
}

/// Split a full box payload into version, flags and body.
pub fn full_box(payload: &[u8]) -> Option<(u8, u32, &[u8])> {
    if payload.len() < 4 {
        return None;
    }
    let flags = u32::from_be_bytes([0, payload[1], payload[2], payload[3]]);
    Some((payload[0], flags, &payload[4..]))
}

/// Write a box header to a vector
pub fn write_box_header(output: &mut Vec<u8>, name: &str, size: u32) {
    output.extend_from_slice(&size.to_be_bytes());
    output.extend_from_slice(name.as_bytes());
}

pub fn make_box(name: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    write_box_header(&mut out, name, (payload.len() + 8) as u32);
    out.extend_from_slice(payload);
    out
}

pub fn make_full_box(name: &str, version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + 4);
    body.push(version);
    body.extend_from_slice(&flags.to_be_bytes()[1..]);
    body.extend_from_slice(payload);
    make_box(name, &body)
}

/// Concatenate child boxes into a container box.
pub fn make_container(name: &str, children: &[Vec<u8>]) -> Vec<u8> {
    make_box(name, &children.concat())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_nested_path() {
        let stbl = make_box("stbl", &make_full_box("stss", 0, 0, &[0, 0, 0, 0]));
        let minf = make_container("minf", &[make_box("vmhd", &[0; 8]), stbl]);
        let mdia = make_container("mdia", &[minf]);
        let stss = find_path(&mdia, &["mdia", "minf", "stbl", "stss"]).unwrap();
        assert_eq!(full_box(stss).unwrap().0, 0);
        assert!(find_path(&mdia, &["mdia", "minf", "stco"]).is_none());
    }

    #[test]
    fn test_find_boxes_and_truncation() {
        let data = [make_box("trak", &[1]), make_box("trak", &[2]), make_box("udta", &[])].concat();
        let traks = find_boxes(&data, "trak");
        assert_eq!(traks, vec![&[1u8][..], &[2u8][..]]);
        // a box claiming more bytes than available ends the walk
        let mut broken = make_box("free", &[0; 4]);
        broken[3] = 0x40;
        assert!(child_boxes(&broken).is_empty());
    }

    #[test]
    fn test_extended_size_header() {
        let mut data = vec![0, 0, 0, 1];
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&24u64.to_be_bytes());
        data.extend_from_slice(&[7; 8]);
        let header = read_box_header(&mut Cursor::new(&data)).unwrap();
        assert_eq!(header.name, "mdat");
        assert_eq!(header.header_size, 16);
        assert_eq!(header.payload_size(), 8);
        assert_eq!(find_box(&data, "mdat").unwrap(), &[7; 8]);
    }
}
