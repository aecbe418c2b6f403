use crate::track::TrackType;
use serde::Serialize;

/// Codecs the engine can carry between containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Avc,
    Hevc,
    Vp8,
    Vp9,
    Av1,
    Aac,
    Mp3,
    Opus,
    Vorbis,
    Ac3,
    Eac3,
    WebVtt,
}

impl Codec {
    pub const VIDEO: [Codec; 5] = [Codec::Avc, Codec::Hevc, Codec::Vp8, Codec::Vp9, Codec::Av1];
    pub const AUDIO: [Codec; 6] = [
        Codec::Aac,
        Codec::Mp3,
        Codec::Opus,
        Codec::Vorbis,
        Codec::Ac3,
        Codec::Eac3,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Avc => "avc",
            Codec::Hevc => "hevc",
            Codec::Vp8 => "vp8",
            Codec::Vp9 => "vp9",
            Codec::Av1 => "av1",
            Codec::Aac => "aac",
            Codec::Mp3 => "mp3",
            Codec::Opus => "opus",
            Codec::Vorbis => "vorbis",
            Codec::Ac3 => "ac3",
            Codec::Eac3 => "eac3",
            Codec::WebVtt => "webvtt",
        }
    }

    pub fn track_type(&self) -> TrackType {
        match self {
            Codec::Avc | Codec::Hevc | Codec::Vp8 | Codec::Vp9 | Codec::Av1 => TrackType::Video,
            Codec::WebVtt => TrackType::Subtitle,
            _ => TrackType::Audio,
        }
    }

    /// AVC and HEVC carry NAL units whose framing differs between containers.
    pub fn uses_nal_units(&self) -> bool {
        matches!(self, Codec::Avc | Codec::Hevc)
    }

    /// Identify the codec from an RFC 6381 style codec string.
    pub fn from_codec_string(codec: &str) -> Option<Codec> {
        let lower = codec.trim().to_ascii_lowercase();
        let prefix = lower.split('.').next().unwrap_or("");
        match prefix {
            "avc1" | "avc3" => Some(Codec::Avc),
            "hvc1" | "hev1" => Some(Codec::Hevc),
            "vp8" => Some(Codec::Vp8),
            "vp09" | "vp9" => Some(Codec::Vp9),
            "av01" => Some(Codec::Av1),
            "mp3" => Some(Codec::Mp3),
            "opus" => Some(Codec::Opus),
            "vorbis" => Some(Codec::Vorbis),
            "ac-3" => Some(Codec::Ac3),
            "ec-3" => Some(Codec::Eac3),
            "wvtt" | "webvtt" => Some(Codec::WebVtt),
            "mp4a" => match lower.split('.').nth(1) {
                Some("6b") | Some("69") => Some(Codec::Mp3),
                Some("a5") => Some(Codec::Ac3),
                Some("a6") => Some(Codec::Eac3),
                Some("40") => match lower.split('.').nth(2) {
                    Some("34") => Some(Codec::Mp3),
                    _ => Some(Codec::Aac),
                },
                _ => None,
            },
            _ => None,
        }
    }

    /// Codec string used when no codec-specific parameters are known.
    pub fn default_codec_string(&self) -> &'static str {
        match self {
            Codec::Avc => "avc1.42001f",
            Codec::Hevc => "hvc1.1.6.L93.B0",
            Codec::Vp8 => "vp8",
            Codec::Vp9 => "vp09.00.10.08",
            Codec::Av1 => "av01.0.04M.08",
            Codec::Aac => "mp4a.40.2",
            Codec::Mp3 => "mp3",
            Codec::Opus => "opus",
            Codec::Vorbis => "vorbis",
            Codec::Ac3 => "ac-3",
            Codec::Eac3 => "ec-3",
            Codec::WebVtt => "wvtt",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Compose a mime type such as `video/mp4; codecs="avc1.64001f, mp4a.40.2"`.
pub fn compose_mime_type(base: &str, codec_strings: &[String]) -> String {
    if codec_strings.is_empty() {
        return base.to_string();
    }
    format!("{}; codecs=\"{}\"", base, codec_strings.join(", "))
}

/// Build `vp09.PP.LL.DD` from VP9 profile, level and bit depth.
pub fn vp9_codec_string(profile: u8, level: u8, bit_depth: u8) -> String {
    format!("vp09.{:02}.{:02}.{:02}", profile, level, bit_depth)
}

/// Build an AV1 codec string from the fields of an av1C record.
pub fn av1_codec_string(av1c: &[u8]) -> Option<String> {
    if av1c.len() < 4 || av1c[0] & 0x80 == 0 {
        return None;
    }
    let profile = av1c[1] >> 5;
    let level = av1c[1] & 0x1f;
    let tier = if av1c[2] & 0x80 != 0 { 'H' } else { 'M' };
    let high_bitdepth = av1c[2] & 0x40 != 0;
    let twelve_bit = av1c[2] & 0x20 != 0;
    let bit_depth = match (high_bitdepth, twelve_bit) {
        (true, true) => 12,
        (true, false) => 10,
        _ => 8,
    };
    Some(format!("av01.{}.{:02}{}.{:02}", profile, level, tier, bit_depth))
}

/// Build a minimal av1C record (no config OBUs) from an `av01.P.LLT.DD` codec string.
pub fn av1c_from_codec_string(codec: &str) -> Option<Vec<u8>> {
    let mut parts = codec.split('.');
    if parts.next()? != "av01" {
        return None;
    }
    let profile: u8 = parts.next()?.parse().ok()?;
    let level_tier = parts.next()?;
    if level_tier.len() < 3 {
        return None;
    }
    let level: u8 = level_tier[..2].parse().ok()?;
    let tier = level_tier.ends_with('H');
    let bit_depth: u8 = parts.next().and_then(|d| d.parse().ok()).unwrap_or(8);
    let mut flags = (tier as u8) << 7;
    if bit_depth > 8 {
        flags |= 0x40;
    }
    if bit_depth == 12 {
        flags |= 0x20;
    }
    // 4:2:0 chroma subsampling
    flags |= 0x0c;
    Some(vec![0x81, (profile << 5) | (level & 0x1f), flags, 0x00])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_from_string() {
        assert_eq!(Codec::from_codec_string("avc1.64001f"), Some(Codec::Avc));
        assert_eq!(Codec::from_codec_string("hev1.1.6.L93.B0"), Some(Codec::Hevc));
        assert_eq!(Codec::from_codec_string("mp4a.40.2"), Some(Codec::Aac));
        assert_eq!(Codec::from_codec_string("mp4a.40.34"), Some(Codec::Mp3));
        assert_eq!(Codec::from_codec_string("mp4a.6B"), Some(Codec::Mp3));
        assert_eq!(Codec::from_codec_string("vp09.00.10.08"), Some(Codec::Vp9));
        assert_eq!(Codec::from_codec_string("theora"), None);
    }

    #[test]
    fn test_compose_mime_type() {
        let mime = compose_mime_type(
            "video/mp4",
            &["avc1.4d401e".to_string(), "mp4a.40.2".to_string()],
        );
        assert_eq!(mime, "video/mp4; codecs=\"avc1.4d401e, mp4a.40.2\"");
        assert_eq!(compose_mime_type("video/mp2t", &[]), "video/mp2t");
    }

    #[test]
    fn test_av1_codec_string_from_record() {
        let av1c = av1c_from_codec_string("av01.0.08M.10").unwrap();
        assert_eq!(av1_codec_string(&av1c).as_deref(), Some("av01.0.08M.10"));
        assert_eq!(vp9_codec_string(0, 10, 8), "vp09.00.10.08");
    }
}
