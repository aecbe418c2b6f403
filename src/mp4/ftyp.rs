use super::r#box::make_box;
use crate::demux::ContainerFormat;

/// Container format implied by an ftyp major brand
pub fn format_for_brand(major_brand: &[u8]) -> ContainerFormat {
    match major_brand {
        b"qt  " => ContainerFormat::Mov,
        brand if brand.starts_with(b"3g") => ContainerFormat::ThreeGp,
        _ => ContainerFormat::Mp4,
    }
}

/// Major brand of an ftyp payload
pub fn parse_major_brand(ftyp: &[u8]) -> Option<[u8; 4]> {
    let mut brand = [0u8; 4];
    brand.copy_from_slice(ftyp.get(..4)?);
    Some(brand)
}

pub fn build_ftyp(major_brand: &[u8; 4], minor_version: u32, compatible: &[&[u8; 4]]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + compatible.len() * 4);
    payload.extend_from_slice(major_brand);
    payload.extend_from_slice(&minor_version.to_be_bytes());
    for brand in compatible {
        payload.extend_from_slice(*brand);
    }
    make_box("ftyp", &payload)
}
