pub mod byte_source;
pub mod file_source;
pub mod http_source;
pub mod source_reader;
pub mod target;

#[cfg(test)]
mod http_source_test;

pub use byte_source::{ByteSource, MemorySource};
pub use file_source::FileSource;
pub use http_source::HttpSource;
pub use source_reader::SourceReader;
pub use target::{BufferTarget, FileTarget, StreamTarget, Target, TargetMode};

#[cfg(test)]
pub use byte_source::MockByteSource;
