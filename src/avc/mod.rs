pub mod annexb;
pub mod avcc;
pub mod nal_type;
pub mod nalus;
pub mod sps;

pub use annexb::{annex_b_to_length_prefixed, length_prefixed_to_annex_b, FormatConverter};
pub use avcc::AvccConfig;
pub use nal_type::NaluType;
pub use nalus::{
    extract_nalus, extract_parameter_sets, is_idr_packet, NalUnitFormat, NalUnitIter,
    NalUnitLocation, Nalu,
};
pub use sps::SpsInfo;
