pub mod r#box;
pub use r#box::{find_box, find_box_range, find_path};
pub mod ctts;
pub mod demuxer;
pub use demuxer::Mp4Demuxer;
pub mod dops;
pub mod elst;
pub mod esds;
pub mod ftyp;
pub mod hdlr;
pub mod mdhd;
pub use mdhd::parse_mdhd;
pub mod moov;
pub mod moov_finder; // Header-only top level walk to locate moov
pub use moov_finder::{read_moov_payload, scan_top_level, TopLevelBoxes};
pub mod muxer;
pub use muxer::Mp4Muxer;
pub mod mvhd;
pub mod stco;
pub use stco::parse_stco_or_co64;
pub mod stsc;
pub use stsc::{parse_stsc, SampleToChunkEntry};
pub mod stsd;
pub mod stss;
pub mod stsz;
pub use stsz::parse_stsz;
pub mod stts;
pub use stts::{parse_stts, SttsEntry};
pub mod tkhd;
pub mod trak;

#[cfg(test)]
mod stsd_test;
