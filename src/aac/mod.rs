pub mod adts;
pub mod audio_specific_config;

pub use adts::{find_adts_frames, prepend_adts_header, strip_adts_header, AdtsHeader};
pub use audio_specific_config::{sample_rate_index, AudioSpecificConfig, SAMPLE_RATES};
