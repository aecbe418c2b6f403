use super::ebml::{
    children, find_child, float_child, make_element, make_float, make_master, make_string,
    make_uint, string_child, uint_child,
};
use super::elements::*;
use crate::aac::AudioSpecificConfig;
use crate::codec::Codec;
use crate::decoder_config;
use crate::errors::{MediaError, MediaResult};
use crate::mp4::dops::OpusConfig;
use crate::mux::OutputTrack;
use crate::track::{AudioTrackInfo, ColorSpace, DecoderConfig, Track, TrackType, VideoTrackInfo};
use log::{debug, warn};

const MATROSKA_TIME_RESOLUTION: u32 = 1000;
const OPUS_SEEK_PRE_ROLL_NS: u64 = 80_000_000;

/// A Matroska TrackEntry resolved into engine types
#[derive(Debug, Clone)]
pub struct TrackEntry {
    pub track: Track,
    pub decoder_config: Option<DecoderConfig>,
    /// Frame duration in seconds from DefaultDuration.
    pub default_duration: Option<f64>,
}

pub fn codec_for_id(codec_id: &str) -> Option<Codec> {
    match codec_id {
        "V_MPEG4/ISO/AVC" => Some(Codec::Avc),
        "V_MPEGH/ISO/HEVC" => Some(Codec::Hevc),
        "V_VP8" => Some(Codec::Vp8),
        "V_VP9" => Some(Codec::Vp9),
        "V_AV1" => Some(Codec::Av1),
        "A_OPUS" => Some(Codec::Opus),
        "A_VORBIS" => Some(Codec::Vorbis),
        "A_MPEG/L3" => Some(Codec::Mp3),
        "A_AC3" => Some(Codec::Ac3),
        "A_EAC3" => Some(Codec::Eac3),
        "S_TEXT/WEBVTT" | "D_WEBVTT/SUBTITLES" => Some(Codec::WebVtt),
        id if id.starts_with("A_AAC") => Some(Codec::Aac),
        _ => None,
    }
}

pub fn codec_id_for(codec: Codec) -> &'static str {
    match codec {
        Codec::Avc => "V_MPEG4/ISO/AVC",
        Codec::Hevc => "V_MPEGH/ISO/HEVC",
        Codec::Vp8 => "V_VP8",
        Codec::Vp9 => "V_VP9",
        Codec::Av1 => "V_AV1",
        Codec::Aac => "A_AAC",
        Codec::Mp3 => "A_MPEG/L3",
        Codec::Opus => "A_OPUS",
        Codec::Vorbis => "A_VORBIS",
        Codec::Ac3 => "A_AC3",
        Codec::Eac3 => "A_EAC3",
        Codec::WebVtt => "S_TEXT/WEBVTT",
    }
}

fn track_type_for(code: u64) -> Option<TrackType> {
    match code {
        1 => Some(TrackType::Video),
        2 => Some(TrackType::Audio),
        17 => Some(TrackType::Subtitle),
        _ => None,
    }
}

fn track_type_code(track_type: TrackType) -> u64 {
    match track_type {
        TrackType::Video => 1,
        TrackType::Audio => 2,
        TrackType::Subtitle => 17,
    }
}

/// Clockwise rotation from a ProjectionPoseRoll angle.
fn rotation_from_roll(roll: f64) -> u16 {
    let degrees = (-roll).rem_euclid(360.0);
    ((degrees / 90.0).round() as u16 % 4) * 90
}

fn parse_colour(video: &[u8]) -> Option<ColorSpace> {
    let colour = find_child(video, COLOUR)?;
    let code = |id| uint_child(colour, id).unwrap_or(2) as u8;
    Some(ColorSpace::from_code_points(
        code(PRIMARIES),
        code(TRANSFER_CHARACTERISTICS),
        code(MATRIX_COEFFICIENTS),
        uint_child(colour, RANGE) == Some(2),
    ))
}

fn video_config(
    codec: Codec,
    private: Option<&[u8]>,
    width: u32,
    height: u32,
    color_space: Option<ColorSpace>,
) -> MediaResult<Option<DecoderConfig>> {
    let mut config = match codec {
        Codec::Avc => match private {
            Some(avcc) => decoder_config::avc_from_avcc(avcc, width, height)?,
            None => return Ok(None),
        },
        Codec::Hevc => match private {
            Some(hvcc) => decoder_config::hevc_from_hvcc(hvcc, width, height)?,
            None => return Ok(None),
        },
        Codec::Vp8 => decoder_config::vp8(width, height),
        Codec::Vp9 => decoder_config::vp9_from_vpcc(None, width, height),
        Codec::Av1 => decoder_config::av1_from_av1c(private.filter(|p| p.len() >= 4), width, height),
        _ => return Ok(None),
    };
    if let (DecoderConfig::Video(video), Some(color)) = (&mut config, color_space) {
        if video.color_space.is_none() {
            video.color_space = Some(color);
        }
    }
    Ok(Some(config))
}

fn audio_config(
    codec: Codec,
    private: Option<&[u8]>,
    sample_rate: u32,
    channels: u16,
) -> MediaResult<Option<DecoderConfig>> {
    let config = match codec {
        Codec::Aac => match private {
            Some(asc) => decoder_config::aac_from_asc(asc)?,
            None => {
                let asc = AudioSpecificConfig::new(2, sample_rate, channels as u8);
                decoder_config::audio(asc.codec_string(), sample_rate, channels, Some(asc.to_bytes()))
            }
        },
        Codec::Opus => match private {
            Some(head) => decoder_config::opus_from_head(head)?,
            None => decoder_config::audio("opus".to_string(), 48000, channels, None),
        },
        Codec::Vorbis => decoder_config::audio(
            "vorbis".to_string(),
            sample_rate,
            channels,
            private.map(<[u8]>::to_vec),
        ),
        Codec::Mp3 | Codec::Ac3 | Codec::Eac3 => decoder_config::audio(
            codec.default_codec_string().to_string(),
            sample_rate,
            channels,
            None,
        ),
        _ => return Ok(None),
    };
    Ok(Some(config))
}

/// Parse a TrackEntry payload. Entries without a usable type are skipped.
pub fn parse_track_entry(entry: &[u8], timestamp_scale: u64) -> MediaResult<Option<TrackEntry>> {
    let number = uint_child(entry, TRACK_NUMBER)
        .filter(|n| *n > 0 && *n <= u32::MAX as u64)
        .ok_or_else(|| MediaError::format("TrackEntry without a valid TrackNumber"))? as u32;
    let Some(track_type) = uint_child(entry, TRACK_TYPE).and_then(track_type_for) else {
        debug!("skipping Matroska track {} of unsupported type", number);
        return Ok(None);
    };
    if find_child(entry, CONTENT_ENCODINGS).is_some() {
        warn!("Matroska track {} uses content encoding, payloads are passed through as stored", number);
    }

    let codec_id = string_child(entry, CODEC_ID).unwrap_or_default();
    let codec = codec_for_id(&codec_id).filter(|c| c.track_type() == track_type);
    let private = find_child(entry, CODEC_PRIVATE).filter(|p| !p.is_empty());
    let language = string_child(entry, LANGUAGE).unwrap_or_else(|| "eng".to_string());
    let default_duration = uint_child(entry, DEFAULT_DURATION)
        .filter(|d| *d > 0)
        .map(|d| d as f64 / 1e9);

    let mut video = None;
    let mut audio = None;
    let mut decoder_config = None;
    match track_type {
        TrackType::Video => {
            let settings = find_child(entry, VIDEO).unwrap_or(&[]);
            let width = uint_child(settings, PIXEL_WIDTH).unwrap_or(0) as u32;
            let height = uint_child(settings, PIXEL_HEIGHT).unwrap_or(0) as u32;
            let rotation = find_child(settings, PROJECTION)
                .and_then(|p| float_child(p, PROJECTION_POSE_ROLL))
                .map_or(0, rotation_from_roll);
            video = Some(VideoTrackInfo {
                display_width: uint_child(settings, DISPLAY_WIDTH).map_or(width, |w| w as u32),
                display_height: uint_child(settings, DISPLAY_HEIGHT).map_or(height, |h| h as u32),
                rotation,
            });
            if let Some(codec) = codec {
                decoder_config = video_config(codec, private, width, height, parse_colour(settings))?;
            }
        }
        TrackType::Audio => {
            let settings = find_child(entry, AUDIO).unwrap_or(&[]);
            let sample_rate = float_child(settings, SAMPLING_FREQUENCY).unwrap_or(8000.0) as u32;
            let channels = uint_child(settings, CHANNELS).unwrap_or(1) as u16;
            audio = Some(AudioTrackInfo {
                sample_rate,
                channels,
            });
            if let Some(codec) = codec {
                decoder_config = audio_config(codec, private, sample_rate, channels)?;
            }
        }
        TrackType::Subtitle => {}
    }

    let time_resolution = if timestamp_scale > 0 {
        (1e9 / timestamp_scale as f64).round() as u32
    } else {
        MATROSKA_TIME_RESOLUTION
    };
    Ok(Some(TrackEntry {
        track: Track {
            id: number,
            track_type,
            codec,
            internal_codec_id: codec_id,
            time_resolution,
            language,
            video,
            audio,
        },
        decoder_config,
        default_duration,
    }))
}

pub fn parse_tracks(tracks: &[u8], timestamp_scale: u64) -> MediaResult<Vec<TrackEntry>> {
    let mut out: Vec<TrackEntry> = Vec::new();
    for child in children(tracks).into_iter().filter(|c| c.id == TRACK_ENTRY) {
        let Some(entry) = parse_track_entry(child.data, timestamp_scale)? else {
            continue;
        };
        if out.iter().any(|e| e.track.id == entry.track.id) {
            warn!("duplicate Matroska track number {}, ignoring", entry.track.id);
            continue;
        }
        out.push(entry);
    }
    Ok(out)
}

/// CodecPrivate written for a track, if the codec needs one.
fn codec_private(codec: Codec, config: Option<&DecoderConfig>) -> MediaResult<Option<Vec<u8>>> {
    let description = config.and_then(|c| c.description()).map(<[u8]>::to_vec);
    let private = match codec {
        Codec::Avc | Codec::Hevc | Codec::Vorbis => Some(description.ok_or_else(|| {
            MediaError::configuration(format!(
                "{} track requires a decoder config with a description",
                codec
            ))
        })?),
        Codec::Aac => description.or_else(|| {
            config.and_then(DecoderConfig::as_audio).map(|audio| {
                AudioSpecificConfig::new(2, audio.sample_rate, audio.number_of_channels as u8).to_bytes()
            })
        }),
        Codec::Opus => description.or_else(|| {
            config.and_then(DecoderConfig::as_audio).map(|audio| {
                OpusConfig::new(audio.number_of_channels as u8, audio.sample_rate).to_opus_head()
            })
        }),
        Codec::Av1 => description,
        _ => None,
    };
    Ok(private)
}

/// Serialize a TrackEntry element.
pub fn build_track_entry(track: &OutputTrack, config: Option<&DecoderConfig>) -> MediaResult<Vec<u8>> {
    let mut fields = vec![
        make_uint(TRACK_NUMBER, track.id as u64),
        make_uint(TRACK_UID, track.id as u64),
        make_uint(TRACK_TYPE, track_type_code(track.track_type())),
        make_uint(FLAG_LACING, 0),
        make_string(LANGUAGE, &track.language),
        make_string(CODEC_ID, codec_id_for(track.codec)),
    ];
    if let Some(private) = codec_private(track.codec, config)? {
        fields.push(make_element(CODEC_PRIVATE, &private));
    }
    if track.codec == Codec::Opus {
        fields.push(make_uint(SEEK_PRE_ROLL, OPUS_SEEK_PRE_ROLL_NS));
    }
    match config {
        Some(DecoderConfig::Video(video)) => {
            let mut settings = vec![
                make_uint(PIXEL_WIDTH, video.coded_width as u64),
                make_uint(PIXEL_HEIGHT, video.coded_height as u64),
            ];
            if track.rotation != 0 {
                settings.push(make_master(
                    PROJECTION,
                    &[make_float(PROJECTION_POSE_ROLL, -(track.rotation as f64))],
                ));
            }
            fields.push(make_master(VIDEO, &settings));
        }
        Some(DecoderConfig::Audio(audio)) => {
            fields.push(make_master(
                AUDIO,
                &[
                    make_float(SAMPLING_FREQUENCY, audio.sample_rate as f64),
                    make_uint(CHANNELS, audio.number_of_channels as u64),
                ],
            ));
        }
        None => {}
    }
    Ok(make_master(TRACK_ENTRY, &fields))
}
