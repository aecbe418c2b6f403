//! Decoder configuration derivation shared by the demuxers.

use crate::aac::{AdtsHeader, AudioSpecificConfig};
use crate::ac3::Ac3FrameInfo;
use crate::avc::{AvccConfig, SpsInfo};
use crate::codec::{av1_codec_string, vp9_codec_string, Codec};
use crate::errors::{MediaError, MediaResult};
use crate::hevc::{HevcSpsInfo, HvccConfig};
use crate::mp4::dops::OpusConfig;
use crate::mpeg_audio::MpegAudioHeader;
use crate::track::{AudioDecoderConfig, ColorSpace, DecoderConfig, VideoDecoderConfig};

fn video(
    codec: String,
    width: u32,
    height: u32,
    color_space: Option<ColorSpace>,
    description: Option<Vec<u8>>,
) -> DecoderConfig {
    DecoderConfig::Video(VideoDecoderConfig {
        codec,
        coded_width: width,
        coded_height: height,
        color_space,
        description,
    })
}

pub fn audio(codec: String, sample_rate: u32, channels: u16, description: Option<Vec<u8>>) -> DecoderConfig {
    DecoderConfig::Audio(AudioDecoderConfig {
        codec,
        sample_rate,
        number_of_channels: channels,
        description,
    })
}

/// Config for length-prefixed AVC described by an avcC record.
pub fn avc_from_avcc(avcc: &[u8], width: u32, height: u32) -> MediaResult<DecoderConfig> {
    let config = AvccConfig::parse(avcc)?;
    let sps = config.get_first_sps().map(SpsInfo::parse).transpose().ok().flatten();
    let (width, height) = sps.as_ref().map_or((width, height), |s| (s.width, s.height));
    Ok(video(
        config.codec_string(),
        width,
        height,
        sps.and_then(|s| s.color_space),
        Some(avcc.to_vec()),
    ))
}

/// Config for Annex B AVC, read from the parameter sets of a key packet.
pub fn avc_from_annex_b(packet: &[u8]) -> MediaResult<DecoderConfig> {
    let config = AvccConfig::from_annex_b(packet)?;
    let sps = config
        .get_first_sps()
        .ok_or_else(|| MediaError::format("no SPS in AVC key packet"))
        .and_then(SpsInfo::parse)?;
    Ok(video(config.codec_string(), sps.width, sps.height, sps.color_space, None))
}

pub fn hevc_from_hvcc(hvcc: &[u8], width: u32, height: u32) -> MediaResult<DecoderConfig> {
    let config = HvccConfig::parse(hvcc)?;
    let sps = config
        .arrays
        .iter()
        .find(|a| a.nal_type == 33)
        .and_then(|a| a.nalus.first())
        .and_then(|nal| HevcSpsInfo::parse(nal).ok());
    let (width, height) = sps.map_or((width, height), |s| (s.width, s.height));
    Ok(video(config.codec_string(), width, height, None, Some(hvcc.to_vec())))
}

pub fn hevc_from_annex_b(packet: &[u8]) -> MediaResult<DecoderConfig> {
    let config = HvccConfig::from_annex_b(packet)?;
    let sps = config
        .arrays
        .iter()
        .find(|a| a.nal_type == 33)
        .and_then(|a| a.nalus.first())
        .ok_or_else(|| MediaError::format("no SPS in HEVC key packet"))?;
    let info = HevcSpsInfo::parse(sps)?;
    Ok(video(config.codec_string(), info.width, info.height, None, None))
}

/// VP9 from a vpcC full box payload; VP9 carries no description.
pub fn vp9_from_vpcc(vpcc: Option<&[u8]>, width: u32, height: u32) -> DecoderConfig {
    match vpcc {
        Some(v) if v.len() >= 12 => {
            let bit_depth = v[6] >> 4;
            let full_range = v[6] & 0x01 != 0;
            let color = ColorSpace::from_code_points(v[7], v[8], v[9], full_range);
            video(vp9_codec_string(v[4], v[5], bit_depth), width, height, Some(color), None)
        }
        _ => video(Codec::Vp9.default_codec_string().to_string(), width, height, None, None),
    }
}

pub fn vp8(width: u32, height: u32) -> DecoderConfig {
    video("vp8".to_string(), width, height, None, None)
}

pub fn av1_from_av1c(av1c: Option<&[u8]>, width: u32, height: u32) -> DecoderConfig {
    let codec = av1c
        .and_then(av1_codec_string)
        .unwrap_or_else(|| Codec::Av1.default_codec_string().to_string());
    video(codec, width, height, None, av1c.map(<[u8]>::to_vec))
}

/// AAC with an out-of-band AudioSpecificConfig.
pub fn aac_from_asc(asc_bytes: &[u8]) -> MediaResult<DecoderConfig> {
    let asc = AudioSpecificConfig::parse(asc_bytes)?;
    Ok(audio(asc.codec_string(), asc.sample_rate, asc.channels(), Some(asc_bytes.to_vec())))
}

/// AAC carried as ADTS frames, self-describing.
pub fn aac_from_adts(frame: &[u8]) -> MediaResult<DecoderConfig> {
    let asc = AdtsHeader::parse(frame)?.audio_specific_config();
    Ok(audio(asc.codec_string(), asc.sample_rate, asc.channels(), None))
}

pub fn mp3_from_frame(frame: &[u8]) -> MediaResult<DecoderConfig> {
    let header = MpegAudioHeader::parse(frame)?;
    Ok(audio("mp3".to_string(), header.sample_rate, header.channels, None))
}

pub fn ac3_from_frame(frame: &[u8]) -> MediaResult<DecoderConfig> {
    let info = Ac3FrameInfo::parse(frame)?;
    Ok(audio(info.codec_string().to_string(), info.sample_rate, info.channels, None))
}

/// Opus described by an OpusHead identification header.
pub fn opus_from_head(head: &[u8]) -> MediaResult<DecoderConfig> {
    let config = OpusConfig::from_opus_head(head)?;
    Ok(audio("opus".to_string(), 48000, config.channels as u16, Some(head.to_vec())))
}
