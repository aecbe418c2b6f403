use crate::codec::Codec;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Video,
    Audio,
    Subtitle,
}

impl TrackType {
    pub fn name(&self) -> &'static str {
        match self {
            TrackType::Video => "video",
            TrackType::Audio => "audio",
            TrackType::Subtitle => "subtitle",
        }
    }
}

/// A track discovered by a demuxer or declared on an output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub id: u32,
    pub track_type: TrackType,
    /// `None` when the container's codec identifier is not recognized.
    pub codec: Option<Codec>,
    /// Codec identifier as written in the container (`avc1`, `V_VP9`, stream type `0x1b`).
    pub internal_codec_id: String,
    /// Ticks per second of the container's native timestamps for this track.
    pub time_resolution: u32,
    /// ISO 639-2 code, `und` when absent.
    pub language: String,
    pub video: Option<VideoTrackInfo>,
    pub audio: Option<AudioTrackInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoTrackInfo {
    pub display_width: u32,
    pub display_height: u32,
    /// Clockwise rotation in degrees: 0, 90, 180 or 270.
    pub rotation: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioTrackInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ColorSpace {
    pub primaries: Option<String>,
    pub transfer: Option<String>,
    pub matrix: Option<String>,
    pub full_range: Option<bool>,
}

impl ColorSpace {
    /// Map ISO/IEC 23091-2 code points to their common names.
    pub fn from_code_points(primaries: u8, transfer: u8, matrix: u8, full_range: bool) -> Self {
        let primaries = match primaries {
            1 => Some("bt709"),
            5 => Some("bt470bg"),
            6 => Some("smpte170m"),
            9 => Some("bt2020"),
            12 => Some("smpte432"),
            _ => None,
        };
        let transfer = match transfer {
            1 => Some("bt709"),
            6 => Some("smpte170m"),
            8 => Some("linear"),
            13 => Some("iec61966-2-1"),
            16 => Some("pq"),
            18 => Some("hlg"),
            _ => None,
        };
        let matrix = match matrix {
            0 => Some("rgb"),
            1 => Some("bt709"),
            5 => Some("bt470bg"),
            6 => Some("smpte170m"),
            9 => Some("bt2020-ncl"),
            _ => None,
        };
        Self {
            primaries: primaries.map(str::to_string),
            transfer: transfer.map(str::to_string),
            matrix: matrix.map(str::to_string),
            full_range: Some(full_range),
        }
    }
}

/// Parameters a decoder needs before the first packet
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DecoderConfig {
    Video(VideoDecoderConfig),
    Audio(AudioDecoderConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoDecoderConfig {
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    pub color_space: Option<ColorSpace>,
    /// Out-of-band codec parameters (avcC, hvcC, av1C); absent for Annex B streams.
    #[serde(serialize_with = "serialize_description")]
    pub description: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioDecoderConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub number_of_channels: u16,
    /// AudioSpecificConfig, OpusHead or Vorbis headers; absent for ADTS and other framed audio.
    #[serde(serialize_with = "serialize_description")]
    pub description: Option<Vec<u8>>,
}

fn serialize_description<S: Serializer>(
    description: &Option<Vec<u8>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match description {
        Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
        None => serializer.serialize_none(),
    }
}

impl DecoderConfig {
    pub fn codec(&self) -> &str {
        match self {
            DecoderConfig::Video(v) => &v.codec,
            DecoderConfig::Audio(a) => &a.codec,
        }
    }

    pub fn description(&self) -> Option<&[u8]> {
        match self {
            DecoderConfig::Video(v) => v.description.as_deref(),
            DecoderConfig::Audio(a) => a.description.as_deref(),
        }
    }

    pub fn track_type(&self) -> TrackType {
        match self {
            DecoderConfig::Video(_) => TrackType::Video,
            DecoderConfig::Audio(_) => TrackType::Audio,
        }
    }

    /// Copy of this config with the description replaced.
    pub fn with_description(&self, description: Option<Vec<u8>>) -> Self {
        match self {
            DecoderConfig::Video(v) => DecoderConfig::Video(VideoDecoderConfig {
                description,
                ..v.clone()
            }),
            DecoderConfig::Audio(a) => DecoderConfig::Audio(AudioDecoderConfig {
                description,
                ..a.clone()
            }),
        }
    }

    pub fn as_video(&self) -> Option<&VideoDecoderConfig> {
        match self {
            DecoderConfig::Video(v) => Some(v),
            DecoderConfig::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioDecoderConfig> {
        match self {
            DecoderConfig::Audio(a) => Some(a),
            DecoderConfig::Video(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_space_names() {
        let cs = ColorSpace::from_code_points(1, 1, 1, false);
        assert_eq!(cs.primaries.as_deref(), Some("bt709"));
        assert_eq!(cs.full_range, Some(false));
        let cs = ColorSpace::from_code_points(9, 16, 9, true);
        assert_eq!(cs.transfer.as_deref(), Some("pq"));
        assert_eq!(cs.matrix.as_deref(), Some("bt2020-ncl"));
        assert_eq!(ColorSpace::from_code_points(2, 2, 2, false).primaries, None);
    }

    #[test]
    fn test_with_description_keeps_other_fields() {
        let config = DecoderConfig::Audio(AudioDecoderConfig {
            codec: "mp4a.40.2".to_string(),
            sample_rate: 48_000,
            number_of_channels: 2,
            description: Some(vec![0x11, 0x90]),
        });
        let stripped = config.with_description(None);
        assert_eq!(stripped.description(), None);
        assert_eq!(stripped.codec(), "mp4a.40.2");
        assert_eq!(stripped.as_audio().unwrap().sample_rate, 48_000);
    }
}
