//! MPEG-4 elementary stream descriptors (esds).

use super::r#box::make_full_box;
use crate::errors::{MediaError, MediaResult};

pub const OBJECT_TYPE_AAC: u8 = 0x40;
pub const OBJECT_TYPE_MP3: u8 = 0x6B;
pub const OBJECT_TYPE_MPEG2_AUDIO: u8 = 0x69;

const ES_DESCRIPTOR: u8 = 0x03;
const DECODER_CONFIG_DESCRIPTOR: u8 = 0x04;
const DECODER_SPECIFIC_INFO: u8 = 0x05;
const SL_CONFIG_DESCRIPTOR: u8 = 0x06;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsDescriptor {
    pub object_type_indication: u8,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,
    /// DecoderSpecificInfo, the AudioSpecificConfig for AAC.
    pub decoder_specific_info: Option<Vec<u8>>,
}

fn read_descriptor_header(data: &[u8], pos: &mut usize) -> Option<(u8, usize)> {
    let tag = *data.get(*pos)?;
    *pos += 1;
    let mut len = 0usize;
    for _ in 0..4 {
        let b = *data.get(*pos)?;
        *pos += 1;
        len = (len << 7) | (b & 0x7F) as usize;
        if b & 0x80 == 0 {
            break;
        }
    }
    Some((tag, len))
}

/// Parse an esds box payload (after version and flags)
pub fn parse_esds(esds: &[u8]) -> MediaResult<EsDescriptor> {
    let data = esds
        .get(4..)
        .ok_or_else(|| MediaError::format("esds box too small"))?;
    let mut pos = 0usize;
    let (tag, _) = read_descriptor_header(data, &mut pos)
        .ok_or_else(|| MediaError::format("truncated ES descriptor"))?;
    if tag != ES_DESCRIPTOR {
        return Err(MediaError::format(format!("expected ES descriptor, found tag {:#x}", tag)));
    }
    let flags = *data
        .get(pos + 2)
        .ok_or_else(|| MediaError::format("truncated ES descriptor"))?;
    pos += 3;
    if flags & 0x80 != 0 {
        pos += 2; // dependsOn_ES_ID
    }
    if flags & 0x40 != 0 {
        pos += 1 + *data.get(pos).unwrap_or(&0) as usize; // URL
    }
    if flags & 0x20 != 0 {
        pos += 2; // OCR_ES_Id
    }

    let (tag, len) = read_descriptor_header(data, &mut pos)
        .ok_or_else(|| MediaError::format("missing decoder config descriptor"))?;
    if tag != DECODER_CONFIG_DESCRIPTOR || pos + 13 > data.len() {
        return Err(MediaError::format("invalid decoder config descriptor"));
    }
    let end = (pos + len).min(data.len());
    let dcd = &data[pos..end];
    let mut descriptor = EsDescriptor {
        object_type_indication: dcd[0],
        max_bitrate: u32::from_be_bytes([dcd[5], dcd[6], dcd[7], dcd[8]]),
        avg_bitrate: u32::from_be_bytes([dcd[9], dcd[10], dcd[11], dcd[12]]),
        decoder_specific_info: None,
    };
    let mut inner = 13usize;
    if let Some((tag, len)) = read_descriptor_header(dcd, &mut inner) {
        if tag == DECODER_SPECIFIC_INFO && inner + len <= dcd.len() {
            descriptor.decoder_specific_info = Some(dcd[inner..inner + len].to_vec());
        }
    }
    Ok(descriptor)
}

fn write_descriptor(out: &mut Vec<u8>, tag: u8, body: &[u8]) {
    out.push(tag);
    let len = body.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        out.extend_from_slice(&[
            0x80 | ((len >> 21) & 0x7F) as u8,
            0x80 | ((len >> 14) & 0x7F) as u8,
            0x80 | ((len >> 7) & 0x7F) as u8,
            (len & 0x7F) as u8,
        ]);
    }
    out.extend_from_slice(body);
}

pub fn build_esds(descriptor: &EsDescriptor) -> Vec<u8> {
    let mut dcd = vec![descriptor.object_type_indication, 0x15, 0, 0, 0];
    dcd.extend_from_slice(&descriptor.max_bitrate.to_be_bytes());
    dcd.extend_from_slice(&descriptor.avg_bitrate.to_be_bytes());
    if let Some(dsi) = &descriptor.decoder_specific_info {
        write_descriptor(&mut dcd, DECODER_SPECIFIC_INFO, dsi);
    }

    let mut es = vec![0, 1, 0]; // ES_ID 1, no flags
    write_descriptor(&mut es, DECODER_CONFIG_DESCRIPTOR, &dcd);
    write_descriptor(&mut es, SL_CONFIG_DESCRIPTOR, &[0x02]);

    let mut payload = Vec::with_capacity(es.len() + 8);
    write_descriptor(&mut payload, ES_DESCRIPTOR, &es);
    make_full_box("esds", 0, 0, &payload)
}
