/// HEVC NAL unit types relevant to framing and key detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HevcNaluType {
    /// Slice segment, `irap` for types 16..=23 (BLA, IDR, CRA).
    Slice { irap: bool },
    VPS,
    SPS,
    PPS,
    AUD,
    Other(u8),
}

impl HevcNaluType {
    pub fn from_header_byte(b: u8) -> Self {
        match (b >> 1) & 0x3f {
            v @ 0..=31 => HevcNaluType::Slice {
                irap: (16..=23).contains(&v),
            },
            32 => HevcNaluType::VPS,
            33 => HevcNaluType::SPS,
            34 => HevcNaluType::PPS,
            35 => HevcNaluType::AUD,
            v => HevcNaluType::Other(v),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            HevcNaluType::Slice { irap: true } => 19,
            HevcNaluType::Slice { irap: false } => 1,
            HevcNaluType::VPS => 32,
            HevcNaluType::SPS => 33,
            HevcNaluType::PPS => 34,
            HevcNaluType::AUD => 35,
            HevcNaluType::Other(v) => *v,
        }
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, HevcNaluType::VPS | HevcNaluType::SPS | HevcNaluType::PPS)
    }
}

#[cfg(test)]
mod tests {
    use super::HevcNaluType;

    #[test]
    fn test_hevc_header_byte() {
        assert_eq!(HevcNaluType::from_header_byte(0x40), HevcNaluType::VPS);
        assert_eq!(HevcNaluType::from_header_byte(0x42), HevcNaluType::SPS);
        assert_eq!(HevcNaluType::from_header_byte(0x44), HevcNaluType::PPS);
        assert_eq!(
            HevcNaluType::from_header_byte(0x26),
            HevcNaluType::Slice { irap: true }
        );
        assert_eq!(
            HevcNaluType::from_header_byte(0x02),
            HevcNaluType::Slice { irap: false }
        );
    }
}
