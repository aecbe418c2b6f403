use super::writer::Writer;
use super::Muxer;
use crate::avc::NalUnitFormat;
use crate::codec::Codec;
use crate::demux::ContainerFormat;
use crate::errors::{MediaError, MediaResult};
use crate::streams::{Target, TargetMode};
use crate::track::TrackType;

/// Where the MP4 moov box is placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FastStart {
    /// Packets are buffered and moov is written before mdat. Works on any target.
    #[default]
    InMemory,
    /// mdat is streamed first and moov appended at the end; needs a random-access target.
    Off,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Mp4Options {
    pub fast_start: FastStart,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatroskaOptions {
    /// A new cluster starts at the next key frame once this many seconds are buffered.
    pub min_cluster_duration: f64,
}

impl Default for MatroskaOptions {
    fn default() -> Self {
        Self {
            min_cluster_duration: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MpegTsOptions {
    pub pmt_pid: u16,
    /// First elementary stream PID; tracks count up from here, video first.
    pub pid_base: u16,
}

impl Default for MpegTsOptions {
    fn default() -> Self {
        Self {
            pmt_pid: 0x1000,
            pid_base: 0x100,
        }
    }
}

/// Inclusive track count bounds of a format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackLimits {
    pub video: (usize, usize),
    pub audio: (usize, usize),
    pub subtitle: (usize, usize),
    pub total: (usize, usize),
}

impl TrackLimits {
    pub fn for_type(&self, track_type: TrackType) -> (usize, usize) {
        match track_type {
            TrackType::Video => self.video,
            TrackType::Audio => self.audio,
            TrackType::Subtitle => self.subtitle,
        }
    }
}

const UNLIMITED: usize = usize::MAX;

/// Containers the engine can write
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Mp4(Mp4Options),
    Matroska(MatroskaOptions),
    WebM(MatroskaOptions),
    MpegTs(MpegTsOptions),
    Adts,
}

impl OutputFormat {
    pub fn mp4() -> Self {
        OutputFormat::Mp4(Mp4Options::default())
    }

    pub fn matroska() -> Self {
        OutputFormat::Matroska(MatroskaOptions::default())
    }

    pub fn webm() -> Self {
        OutputFormat::WebM(MatroskaOptions::default())
    }

    pub fn mpeg_ts() -> Self {
        OutputFormat::MpegTs(MpegTsOptions::default())
    }

    pub fn container_format(&self) -> ContainerFormat {
        match self {
            OutputFormat::Mp4(_) => ContainerFormat::Mp4,
            OutputFormat::Matroska(_) => ContainerFormat::Matroska,
            OutputFormat::WebM(_) => ContainerFormat::WebM,
            OutputFormat::MpegTs(_) => ContainerFormat::MpegTs,
            OutputFormat::Adts => ContainerFormat::Adts,
        }
    }

    pub fn supported_codecs(&self) -> &'static [Codec] {
        match self {
            OutputFormat::Mp4(_) => &[
                Codec::Avc,
                Codec::Hevc,
                Codec::Vp9,
                Codec::Av1,
                Codec::Aac,
                Codec::Mp3,
                Codec::Opus,
            ],
            OutputFormat::Matroska(_) => &[
                Codec::Avc,
                Codec::Hevc,
                Codec::Vp8,
                Codec::Vp9,
                Codec::Av1,
                Codec::Aac,
                Codec::Mp3,
                Codec::Opus,
                Codec::Vorbis,
                Codec::Ac3,
                Codec::Eac3,
                Codec::WebVtt,
            ],
            OutputFormat::WebM(_) => &[
                Codec::Vp8,
                Codec::Vp9,
                Codec::Av1,
                Codec::Opus,
                Codec::Vorbis,
                Codec::WebVtt,
            ],
            OutputFormat::MpegTs(_) => &[
                Codec::Avc,
                Codec::Hevc,
                Codec::Aac,
                Codec::Mp3,
                Codec::Ac3,
                Codec::Eac3,
            ],
            OutputFormat::Adts => &[Codec::Aac],
        }
    }

    pub fn supports(&self, codec: Codec) -> bool {
        self.supported_codecs().contains(&codec)
    }

    pub fn track_limits(&self) -> TrackLimits {
        match self {
            OutputFormat::Mp4(_) => TrackLimits {
                video: (0, UNLIMITED),
                audio: (0, UNLIMITED),
                subtitle: (0, 0),
                total: (1, UNLIMITED),
            },
            OutputFormat::Matroska(_) | OutputFormat::WebM(_) => TrackLimits {
                video: (0, UNLIMITED),
                audio: (0, UNLIMITED),
                subtitle: (0, UNLIMITED),
                total: (1, UNLIMITED),
            },
            OutputFormat::MpegTs(_) => TrackLimits {
                video: (0, 16),
                audio: (0, 32),
                subtitle: (0, 0),
                total: (1, 48),
            },
            OutputFormat::Adts => TrackLimits {
                video: (0, 0),
                audio: (1, 1),
                subtitle: (0, 0),
                total: (1, 1),
            },
        }
    }

    /// NAL unit framing the format stores AVC and HEVC in.
    pub fn nal_format(&self) -> NalUnitFormat {
        match self {
            OutputFormat::MpegTs(_) => NalUnitFormat::AnnexB,
            _ => NalUnitFormat::LengthPrefixed(4),
        }
    }

    /// Whether AAC is stored as ADTS frames rather than raw with an AudioSpecificConfig.
    pub fn uses_adts(&self) -> bool {
        matches!(self, OutputFormat::MpegTs(_) | OutputFormat::Adts)
    }

    pub fn base_mime_type(&self, has_video: bool) -> &'static str {
        self.container_format().base_mime_type(has_video)
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4(_) => "mp4",
            OutputFormat::Matroska(_) => "mkv",
            OutputFormat::WebM(_) => "webm",
            OutputFormat::MpegTs(_) => "ts",
            OutputFormat::Adts => "aac",
        }
    }

    /// Create the muxer writing to `target`, validating the target mode.
    pub fn create_muxer(&self, target: Box<dyn Target>) -> MediaResult<Box<dyn Muxer>> {
        let writer = Writer::new(target);
        let muxer: Box<dyn Muxer> = match *self {
            OutputFormat::Mp4(options) => {
                if options.fast_start == FastStart::Off && writer.mode() != TargetMode::RandomAccess {
                    return Err(MediaError::configuration(
                        "MP4 output without fast start requires a random-access target",
                    ));
                }
                Box::new(crate::mp4::Mp4Muxer::new(writer, options))
            }
            OutputFormat::Matroska(options) => {
                Box::new(crate::matroska::MatroskaMuxer::new(writer, options, false))
            }
            OutputFormat::WebM(options) => {
                Box::new(crate::matroska::MatroskaMuxer::new(writer, options, true))
            }
            OutputFormat::MpegTs(options) => Box::new(crate::mpegts::TsMuxer::new(writer, options)),
            OutputFormat::Adts => Box::new(crate::adts::AdtsMuxer::new(writer)),
        };
        Ok(muxer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{BufferTarget, StreamTarget};

    #[test]
    fn test_codec_tables() {
        assert!(OutputFormat::webm().supports(Codec::Vp9));
        assert!(!OutputFormat::webm().supports(Codec::Avc));
        assert!(!OutputFormat::mp4().supports(Codec::WebVtt));
        assert!(OutputFormat::mpeg_ts().supports(Codec::Eac3));
        assert_eq!(OutputFormat::mpeg_ts().track_limits().total, (1, 48));
        assert_eq!(OutputFormat::Adts.track_limits().for_type(TrackType::Audio), (1, 1));
    }

    #[test]
    fn test_bitstream_conventions() {
        assert_eq!(OutputFormat::mpeg_ts().nal_format(), NalUnitFormat::AnnexB);
        assert_eq!(OutputFormat::mp4().nal_format(), NalUnitFormat::LengthPrefixed(4));
        assert!(OutputFormat::Adts.uses_adts());
        assert!(!OutputFormat::matroska().uses_adts());
    }

    #[test]
    fn test_mp4_without_fast_start_needs_random_access() {
        let format = OutputFormat::Mp4(Mp4Options {
            fast_start: FastStart::Off,
        });
        let sequential = Box::new(StreamTarget::new(Vec::<u8>::new()));
        assert!(matches!(
            format.create_muxer(sequential),
            Err(MediaError::Configuration(_))
        ));
        assert!(format.create_muxer(Box::new(BufferTarget::new())).is_ok());
    }
}
