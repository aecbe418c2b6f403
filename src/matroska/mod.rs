//! Matroska and WebM.

pub mod block;
pub mod cluster_index;
pub mod demuxer;
pub mod ebml;
pub mod elements;
pub mod muxer;
pub mod tracks;

pub use demuxer::MatroskaDemuxer;
pub use muxer::MatroskaMuxer;
