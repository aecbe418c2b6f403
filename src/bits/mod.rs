pub mod reader;
pub mod writer;

pub use reader::{mask, BitReader};
pub use writer::BitWriter;
