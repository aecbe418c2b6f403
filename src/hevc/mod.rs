pub mod hvcc;
pub mod nal_type;
pub mod sps;

pub use hvcc::HvccConfig;
pub use nal_type::HevcNaluType;
pub use sps::HevcSpsInfo;

use crate::avc::nalus::{NalUnitFormat, NalUnitIter};

/// Return true if the packet contains an IRAP slice (IDR, CRA or BLA).
pub fn is_irap_packet(data: &[u8], format: NalUnitFormat) -> bool {
    NalUnitIter::new(data, format).any(|loc| {
        matches!(
            HevcNaluType::from_header_byte(data[loc.offset]),
            HevcNaluType::Slice { irap: true }
        )
    })
}
