use super::dops::OpusConfig;
use super::esds::{build_esds, parse_esds, EsDescriptor, OBJECT_TYPE_AAC, OBJECT_TYPE_MP3, OBJECT_TYPE_MPEG2_AUDIO};
use super::r#box::{child_boxes, find_box, make_box, make_full_box, require_box};
use crate::aac::AudioSpecificConfig;
use crate::codec::{av1c_from_codec_string, Codec};
use crate::decoder_config;
use crate::errors::{MediaError, MediaResult};
use crate::track::{DecoderConfig, TrackType};
use log::warn;

/// Bytes between the entry header and the child boxes of a visual entry.
const VISUAL_ENTRY_SIZE: usize = 78;
/// Same for a version 0 audio entry; QuickTime v1 and v2 extend it.
const AUDIO_ENTRY_SIZE: usize = 28;

/// The first sample description of a track
#[derive(Debug, Clone, PartialEq)]
pub struct SampleEntry {
    pub fourcc: String,
    pub codec: Option<Codec>,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub decoder_config: Option<DecoderConfig>,
}

/// Parse the stsd box of a sample table
pub fn parse_stsd(stbl: &[u8], track_type: TrackType) -> MediaResult<SampleEntry> {
    let stsd = require_box(stbl, "stsd", "stbl")?;
    if stsd.len() < 8 {
        return Err(MediaError::format("stsd box too small"));
    }
    let entries = child_boxes(&stsd[8..]);
    let (fourcc, _, payload_start, end) = entries
        .first()
        .ok_or_else(|| MediaError::format("stsd box has no sample entry"))?;
    let entry = &stsd[8 + payload_start..8 + end];

    match track_type {
        TrackType::Video => parse_visual_entry(fourcc, entry),
        TrackType::Audio => parse_audio_entry(fourcc, entry),
        TrackType::Subtitle => Ok(SampleEntry {
            fourcc: fourcc.clone(),
            codec: (fourcc == "wvtt").then_some(Codec::WebVtt),
            width: 0,
            height: 0,
            sample_rate: 0,
            channels: 0,
            decoder_config: None,
        }),
    }
}

fn parse_visual_entry(fourcc: &str, entry: &[u8]) -> MediaResult<SampleEntry> {
    if entry.len() < VISUAL_ENTRY_SIZE {
        return Err(MediaError::format(format!("{} sample entry too small", fourcc)));
    }
    let width = u16::from_be_bytes([entry[24], entry[25]]) as u32;
    let height = u16::from_be_bytes([entry[26], entry[27]]) as u32;
    let children = &entry[VISUAL_ENTRY_SIZE..];

    let (codec, decoder_config) = match fourcc {
        "avc1" | "avc3" => {
            let config = match find_box(children, "avcC") {
                Some(avcc) => Some(decoder_config::avc_from_avcc(avcc, width, height)?),
                None => {
                    warn!("{} sample entry without avcC", fourcc);
                    None
                }
            };
            (Some(Codec::Avc), config)
        }
        "hvc1" | "hev1" => {
            let config = match find_box(children, "hvcC") {
                Some(hvcc) => Some(decoder_config::hevc_from_hvcc(hvcc, width, height)?),
                None => {
                    warn!("{} sample entry without hvcC", fourcc);
                    None
                }
            };
            (Some(Codec::Hevc), config)
        }
        "vp09" => (
            Some(Codec::Vp9),
            Some(decoder_config::vp9_from_vpcc(find_box(children, "vpcC"), width, height)),
        ),
        "vp08" => (Some(Codec::Vp8), Some(decoder_config::vp8(width, height))),
        "av01" => (
            Some(Codec::Av1),
            Some(decoder_config::av1_from_av1c(find_box(children, "av1C"), width, height)),
        ),
        _ => (None, None),
    };

    Ok(SampleEntry {
        fourcc: fourcc.to_string(),
        codec,
        width,
        height,
        sample_rate: 0,
        channels: 0,
        decoder_config,
    })
}

fn parse_audio_entry(fourcc: &str, entry: &[u8]) -> MediaResult<SampleEntry> {
    if entry.len() < AUDIO_ENTRY_SIZE {
        return Err(MediaError::format(format!("{} sample entry too small", fourcc)));
    }
    let version = u16::from_be_bytes([entry[8], entry[9]]);
    let mut channels = u16::from_be_bytes([entry[16], entry[17]]);
    let mut sample_rate = u32::from_be_bytes([entry[24], entry[25], entry[26], entry[27]]) >> 16;
    let children_start = match version {
        1 => AUDIO_ENTRY_SIZE + 16,
        2 => {
            if entry.len() >= AUDIO_ENTRY_SIZE + 36 {
                let rate = &entry[AUDIO_ENTRY_SIZE + 4..AUDIO_ENTRY_SIZE + 12];
                let mut bits = [0u8; 8];
                bits.copy_from_slice(rate);
                sample_rate = f64::from_bits(u64::from_be_bytes(bits)).round() as u32;
                channels = u32::from_be_bytes([
                    entry[AUDIO_ENTRY_SIZE + 12],
                    entry[AUDIO_ENTRY_SIZE + 13],
                    entry[AUDIO_ENTRY_SIZE + 14],
                    entry[AUDIO_ENTRY_SIZE + 15],
                ]) as u16;
            }
            AUDIO_ENTRY_SIZE + 36
        }
        _ => AUDIO_ENTRY_SIZE,
    };
    let children = entry.get(children_start..).unwrap_or(&[]);

    let (codec, decoder_config) = match fourcc {
        "mp4a" => {
            // QuickTime nests the esds inside a wave box
            let esds = find_box(children, "esds")
                .or_else(|| find_box(children, "wave").and_then(|wave| find_box(wave, "esds")));
            match esds {
                Some(esds) => esds_config(&parse_esds(esds)?, sample_rate, channels)?,
                None => {
                    warn!("mp4a sample entry without esds");
                    (Some(Codec::Aac), None)
                }
            }
        }
        "Opus" => {
            let dops = require_box(children, "dOps", "Opus")?;
            let head = OpusConfig::from_dops(dops)?.to_opus_head();
            (Some(Codec::Opus), Some(decoder_config::opus_from_head(&head)?))
        }
        ".mp3" => (
            Some(Codec::Mp3),
            Some(decoder_config::audio("mp3".to_string(), sample_rate, channels, None)),
        ),
        "ac-3" | "ec-3" => {
            let codec = if fourcc == "ac-3" { Codec::Ac3 } else { Codec::Eac3 };
            (
                Some(codec),
                Some(decoder_config::audio(fourcc.to_string(), sample_rate, channels, None)),
            )
        }
        _ => (None, None),
    };

    if let Some(DecoderConfig::Audio(audio)) = &decoder_config {
        sample_rate = audio.sample_rate;
        channels = audio.number_of_channels;
    }

    Ok(SampleEntry {
        fourcc: fourcc.to_string(),
        codec,
        width: 0,
        height: 0,
        sample_rate,
        channels,
        decoder_config,
    })
}

fn esds_config(
    esds: &EsDescriptor,
    sample_rate: u32,
    channels: u16,
) -> MediaResult<(Option<Codec>, Option<DecoderConfig>)> {
    match esds.object_type_indication {
        OBJECT_TYPE_MP3 | OBJECT_TYPE_MPEG2_AUDIO => Ok((
            Some(Codec::Mp3),
            Some(decoder_config::audio("mp3".to_string(), sample_rate, channels, None)),
        )),
        OBJECT_TYPE_AAC | 0x66..=0x68 => {
            let asc = esds
                .decoder_specific_info
                .as_deref()
                .ok_or_else(|| MediaError::format("AAC esds without AudioSpecificConfig"))?;
            Ok((Some(Codec::Aac), Some(decoder_config::aac_from_asc(asc)?)))
        }
        other => {
            warn!("unsupported esds object type 0x{:02x}", other);
            Ok((None, None))
        }
    }
}

fn visual_entry(fourcc: &str, width: u32, height: u32, config_box: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(VISUAL_ENTRY_SIZE + config_box.len());
    payload.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
    payload.extend_from_slice(&[0u8; 16]);
    payload.extend_from_slice(&(width as u16).to_be_bytes());
    payload.extend_from_slice(&(height as u16).to_be_bytes());
    payload.extend_from_slice(&0x0048_0000u32.to_be_bytes());
    payload.extend_from_slice(&0x0048_0000u32.to_be_bytes());
    payload.extend_from_slice(&[0u8; 4]);
    payload.extend_from_slice(&1u16.to_be_bytes());
    payload.extend_from_slice(&[0u8; 32]);
    payload.extend_from_slice(&0x0018u16.to_be_bytes());
    payload.extend_from_slice(&0xFFFFu16.to_be_bytes());
    payload.extend_from_slice(config_box);
    make_box(fourcc, &payload)
}

fn audio_entry(fourcc: &str, sample_rate: u32, channels: u16, config_box: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(AUDIO_ENTRY_SIZE + config_box.len());
    payload.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
    payload.extend_from_slice(&[0u8; 8]);
    payload.extend_from_slice(&channels.to_be_bytes());
    payload.extend_from_slice(&16u16.to_be_bytes());
    payload.extend_from_slice(&[0u8; 4]);
    let rate = if sample_rate > 0xFFFF { 0 } else { sample_rate << 16 };
    payload.extend_from_slice(&rate.to_be_bytes());
    payload.extend_from_slice(config_box);
    make_box(fourcc, &payload)
}

/// Parse `vp09.PP.LL.DD` into a vpcC box, BT.709 limited range otherwise unset.
fn build_vpcc(codec: &str) -> Vec<u8> {
    let fields: Vec<u8> = codec
        .split('.')
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();
    let profile = fields.first().copied().unwrap_or(0);
    let level = fields.get(1).copied().unwrap_or(10);
    let bit_depth = fields.get(2).copied().unwrap_or(8);
    // 4:2:0 colocated chroma
    let payload = [profile, level, (bit_depth << 4) | (1 << 1), 1, 1, 1, 0, 0];
    make_full_box("vpcC", 1, 0, &payload)
}

/// Build an stsd box holding one sample entry for `config`.
pub fn build_stsd(codec: Codec, config: &DecoderConfig) -> MediaResult<Vec<u8>> {
    let missing = |what: &str| {
        MediaError::configuration(format!("{} track requires a decoder config with {}", codec, what))
    };
    let entry = match (codec, config) {
        (Codec::Avc, DecoderConfig::Video(video)) => {
            let avcc = video.description.as_deref().ok_or_else(|| missing("an avcC description"))?;
            visual_entry("avc1", video.coded_width, video.coded_height, &make_box("avcC", avcc))
        }
        (Codec::Hevc, DecoderConfig::Video(video)) => {
            let hvcc = video.description.as_deref().ok_or_else(|| missing("an hvcC description"))?;
            visual_entry("hvc1", video.coded_width, video.coded_height, &make_box("hvcC", hvcc))
        }
        (Codec::Vp9, DecoderConfig::Video(video)) => visual_entry(
            "vp09",
            video.coded_width,
            video.coded_height,
            &build_vpcc(&video.codec),
        ),
        (Codec::Av1, DecoderConfig::Video(video)) => {
            let av1c = video
                .description
                .clone()
                .or_else(|| av1c_from_codec_string(&video.codec))
                .ok_or_else(|| missing("an av1C description"))?;
            visual_entry("av01", video.coded_width, video.coded_height, &make_box("av1C", &av1c))
        }
        (Codec::Aac, DecoderConfig::Audio(audio)) => {
            let asc = match &audio.description {
                Some(asc) => asc.clone(),
                None => {
                    let object_type = audio
                        .codec
                        .split('.')
                        .nth(2)
                        .and_then(|t| t.parse().ok())
                        .unwrap_or(2);
                    AudioSpecificConfig::new(object_type, audio.sample_rate, audio.number_of_channels as u8)
                        .to_bytes()
                }
            };
            let esds = build_esds(&EsDescriptor {
                object_type_indication: OBJECT_TYPE_AAC,
                max_bitrate: 0,
                avg_bitrate: 0,
                decoder_specific_info: Some(asc),
            });
            audio_entry("mp4a", audio.sample_rate, audio.number_of_channels, &esds)
        }
        (Codec::Mp3, DecoderConfig::Audio(audio)) => {
            let esds = build_esds(&EsDescriptor {
                object_type_indication: OBJECT_TYPE_MP3,
                max_bitrate: 0,
                avg_bitrate: 0,
                decoder_specific_info: None,
            });
            audio_entry("mp4a", audio.sample_rate, audio.number_of_channels, &esds)
        }
        (Codec::Opus, DecoderConfig::Audio(audio)) => {
            let opus = match &audio.description {
                Some(head) => OpusConfig::from_opus_head(head)?,
                None => OpusConfig::new(audio.number_of_channels as u8, audio.sample_rate),
            };
            audio_entry("Opus", 48000, audio.number_of_channels, &opus.to_dops_box())
        }
        _ => {
            return Err(MediaError::configuration(format!(
                "codec {} cannot be stored in MP4",
                codec
            )))
        }
    };
    let mut payload = vec![0, 0, 0, 0];
    payload.extend_from_slice(&1u32.to_be_bytes());
    payload.extend_from_slice(&entry);
    Ok(make_box("stsd", &payload))
}
