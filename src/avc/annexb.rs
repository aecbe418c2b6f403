use crate::avc::nalus::{NalUnitFormat, NalUnitIter};
use crate::errors::{MediaError, MediaResult};

/// Convert an Annex B packet to length-prefixed NAL units of `width` bytes.
pub fn annex_b_to_length_prefixed(stream: &[u8], width: u8) -> MediaResult<Vec<u8>> {
    let mut out = Vec::with_capacity(stream.len() + 4);
    for loc in NalUnitIter::new(stream, NalUnitFormat::AnnexB) {
        write_length(&mut out, loc.length, width)?;
        out.extend_from_slice(loc.slice(stream));
    }
    Ok(out)
}

/// Replace length prefixes of `width` bytes with 4-byte start codes.
pub fn length_prefixed_to_annex_b(sample: &[u8], width: u8) -> MediaResult<Vec<u8>> {
    let mut out = Vec::with_capacity(sample.len() + 8);
    let mut iter = NalUnitIter::new(sample, NalUnitFormat::LengthPrefixed(width));
    for loc in iter.by_ref() {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(loc.slice(sample));
    }
    if iter.malformed() {
        return Err(MediaError::format(format!(
            "malformed {}-byte length-prefixed NAL unit packet",
            width
        )));
    }
    Ok(out)
}

/// Serialize NAL units with the given framing.
pub fn write_nal_units<'a, I>(nalus: I, format: NalUnitFormat) -> MediaResult<Vec<u8>>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut out = Vec::new();
    for nalu in nalus {
        match format {
            NalUnitFormat::AnnexB => out.extend_from_slice(&[0, 0, 0, 1]),
            NalUnitFormat::LengthPrefixed(width) => write_length(&mut out, nalu.len(), width)?,
        }
        out.extend_from_slice(nalu);
    }
    Ok(out)
}

fn write_length(out: &mut Vec<u8>, length: usize, width: u8) -> MediaResult<()> {
    if width == 0 || width > 4 || (width < 4 && length >= 1usize << (8 * width as u32)) {
        return Err(MediaError::format(format!(
            "NAL unit of {} bytes does not fit a {}-byte length prefix",
            length, width
        )));
    }
    let bytes = (length as u32).to_be_bytes();
    out.extend_from_slice(&bytes[4 - width as usize..]);
    Ok(())
}

/// Unified format converter that handles multiple conversion scenarios
pub struct FormatConverter;

impl FormatConverter {
    /// Convert between NAL unit framings. Identical framings return a copy.
    pub fn convert(data: &[u8], from: NalUnitFormat, to: NalUnitFormat) -> MediaResult<Vec<u8>> {
        match (from, to) {
            (a, b) if a == b => Ok(data.to_vec()),
            (NalUnitFormat::AnnexB, NalUnitFormat::LengthPrefixed(width)) => {
                annex_b_to_length_prefixed(data, width)
            }
            (NalUnitFormat::LengthPrefixed(width), NalUnitFormat::AnnexB) => {
                length_prefixed_to_annex_b(data, width)
            }
            (NalUnitFormat::LengthPrefixed(from_width), to) => {
                let mut iter = NalUnitIter::new(data, NalUnitFormat::LengthPrefixed(from_width));
                let out = write_nal_units(iter.by_ref().map(|loc| loc.slice(data)), to)?;
                if iter.malformed() {
                    return Err(MediaError::format("malformed length-prefixed NAL unit packet"));
                }
                Ok(out)
            }
            (NalUnitFormat::AnnexB, NalUnitFormat::AnnexB) => Ok(data.to_vec()),
        }
    }
}
