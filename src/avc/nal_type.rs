/// AVC NAL unit types the engine tells apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    NonIDR,
    IDR,
    SEI,
    SPS,
    PPS,
    AUD,
    Other(u8),
}

impl NaluType {
    pub fn from_header_byte(b: u8) -> Self {
        match b & 0x1f {
            1 => NaluType::NonIDR,
            5 => NaluType::IDR,
            6 => NaluType::SEI,
            7 => NaluType::SPS,
            8 => NaluType::PPS,
            9 => NaluType::AUD,
            v => NaluType::Other(v),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            NaluType::NonIDR => 1,
            NaluType::IDR => 5,
            NaluType::SEI => 6,
            NaluType::SPS => 7,
            NaluType::PPS => 8,
            NaluType::AUD => 9,
            NaluType::Other(v) => *v,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, NaluType::NonIDR | NaluType::IDR)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::SPS | NaluType::PPS)
    }
}

impl std::fmt::Display for NaluType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NaluType::Other(v) => write!(f, "type{}", v),
            known => write!(f, "{:?}({})", known, known.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::NaluType;

    #[test]
    fn test_avc_header_byte() {
        assert_eq!(NaluType::from_header_byte(0x67), NaluType::SPS);
        assert_eq!(NaluType::from_header_byte(0x65), NaluType::IDR);
        assert_eq!(NaluType::from_header_byte(0x41), NaluType::NonIDR);
        assert_eq!(NaluType::from_header_byte(0x0c), NaluType::Other(12));
        assert_eq!(NaluType::IDR.to_string(), "IDR(5)");
        assert_eq!(NaluType::Other(12).to_string(), "type12");
        assert!(NaluType::PPS.is_parameter_set());
    }
}
