//! MPEG-2 transport streams (ISO/IEC 13818-1).

pub mod demuxer;
pub mod muxer;
pub mod packet;
pub mod pes;
pub mod psi;
pub mod scanner;

pub use demuxer::TsDemuxer;
pub use muxer::TsMuxer;

pub const TS_PACKET_SIZE: usize = 188;
pub const SYNC_BYTE: u8 = 0x47;
pub const PAT_PID: u16 = 0x0000;
