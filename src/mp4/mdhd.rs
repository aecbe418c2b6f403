use super::r#box::make_full_box;
use crate::errors::{MediaError, MediaResult};

#[derive(Debug, Clone, PartialEq)]
pub struct MediaHeader {
    pub timescale: u32,
    pub duration: u64,
    /// ISO 639-2/T code, `und` when unset.
    pub language: String,
}

/// Parse mdhd box payload to get timescale, duration and language
pub fn parse_mdhd(mdhd: &[u8]) -> MediaResult<MediaHeader> {
    if mdhd.len() < 24 {
        return Err(MediaError::format("mdhd box too small"));
    }

    let version = mdhd[0];
    let (timescale, duration, lang_pos) = if version == 1 {
        // Version 1: 64-bit values
        if mdhd.len() < 36 {
            return Err(MediaError::format("mdhd v1 box too small"));
        }
        let timescale = u32::from_be_bytes([mdhd[20], mdhd[21], mdhd[22], mdhd[23]]);
        let duration = u64::from_be_bytes([
            mdhd[24], mdhd[25], mdhd[26], mdhd[27], mdhd[28], mdhd[29], mdhd[30], mdhd[31],
        ]);
        (timescale, duration, 32)
    } else {
        // Version 0: 32-bit values
        let timescale = u32::from_be_bytes([mdhd[12], mdhd[13], mdhd[14], mdhd[15]]);
        let duration = u32::from_be_bytes([mdhd[16], mdhd[17], mdhd[18], mdhd[19]]) as u64;
        (timescale, duration, 20)
    };
    if timescale == 0 {
        return Err(MediaError::format("mdhd timescale is zero"));
    }

    let lang_code = u16::from_be_bytes([mdhd[lang_pos], mdhd[lang_pos + 1]]);
    Ok(MediaHeader {
        timescale,
        duration,
        language: decode_language(lang_code),
    })
}

/// Decode packed language code - each character is stored in 5 bits
fn decode_language(lang_code: u16) -> String {
    let chars = [
        ((lang_code >> 10) & 0x1F) as u8 + 0x60,
        ((lang_code >> 5) & 0x1F) as u8 + 0x60,
        (lang_code & 0x1F) as u8 + 0x60,
    ];
    if chars.iter().all(|c| c.is_ascii_lowercase()) {
        chars.iter().map(|c| *c as char).collect()
    } else {
        "und".to_string()
    }
}

fn encode_language(language: &str) -> u16 {
    let bytes = language.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(|c| c.is_ascii_lowercase()) {
        return encode_language("und");
    }
    bytes
        .iter()
        .fold(0u16, |acc, c| (acc << 5) | (*c - 0x60) as u16)
}

pub fn build_mdhd(timescale: u32, duration: u64, language: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(32);
    payload.extend_from_slice(&[0u8; 16]); // creation and modification time
    payload.extend_from_slice(&timescale.to_be_bytes());
    payload.extend_from_slice(&duration.to_be_bytes());
    payload.extend_from_slice(&encode_language(language).to_be_bytes());
    payload.extend_from_slice(&[0, 0]);
    make_full_box("mdhd", 1, 0, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version0_language() {
        let payload = [
            0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x03, 0xE8, 0, 0, 0x0B, 0xB8, 0x15, 0xC7, 0, 0,
        ];
        let header = parse_mdhd(&payload).unwrap();
        assert_eq!(header.timescale, 1000);
        assert_eq!(header.duration, 3000);
        assert_eq!(header.language, "eng");
    }

    #[test]
    fn test_build_version1() {
        let mdhd = build_mdhd(90000, 1 << 40, "fra");
        let header = parse_mdhd(&mdhd[8..]).unwrap();
        assert_eq!(header.duration, 1 << 40);
        assert_eq!(header.language, "fra");
        assert_eq!(parse_mdhd(&build_mdhd(1, 0, "")[8..]).unwrap().language, "und");
    }
}
