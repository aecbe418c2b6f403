//! Raw ADTS audio streams: back-to-back ADTS frames, optionally behind an ID3v2 tag.

pub mod demuxer;
pub mod muxer;

pub use demuxer::AdtsDemuxer;
pub use muxer::AdtsMuxer;
