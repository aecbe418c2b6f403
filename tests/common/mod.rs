#![allow(dead_code)]

use mediamux::aac::{prepend_adts_header, AudioSpecificConfig};
use mediamux::{
    decoder_config, BufferTarget, Codec, EncodedPacket, Input, InputTrack, Output, OutputFormat,
    PacketRetrievalOptions, PacketType, TrackOptions,
};

/// Main profile 640x360 SPS and its PPS.
pub const SPS: [u8; 28] = [
    0x67, 0x4d, 0x40, 0x1e, 0xec, 0xc0, 0x50, 0x17, 0xfc, 0xb8, 0x0b, 0x50, 0x10, 0x10, 0x14, 0x00,
    0x00, 0x03, 0x01, 0xf4, 0x00, 0x00, 0x5d, 0xa8, 0x3c, 0x58, 0xb6, 0x68,
];
pub const PPS: [u8; 5] = [0x68, 0xe9, 0x79, 0xcb, 0x20];

pub const START: f64 = 1.4;
pub const FPS: f64 = 30.0;
pub const VIDEO_FRAMES: usize = 60;
pub const GOP: usize = 15;
pub const AUDIO_FRAMES: usize = 90;
pub const AUDIO_FRAME: f64 = 1024.0 / 48000.0;

/// Annex B access unit. Key frames carry SPS and PPS in band.
pub fn video_frame(index: usize) -> Vec<u8> {
    let fill = 0x80 | (index as u8 & 0x7F);
    let mut data = Vec::new();
    if index % GOP == 0 {
        for nal in [&SPS[..], &PPS[..]] {
            data.extend_from_slice(&[0, 0, 0, 1]);
            data.extend_from_slice(nal);
        }
        data.extend_from_slice(&[0, 0, 0, 1, 0x65, 0x88]);
    } else {
        data.extend_from_slice(&[0, 0, 0, 1, 0x41, 0x9A]);
    }
    data.extend(std::iter::repeat(fill).take(900 + index));
    data
}

pub fn audio_frame(index: usize) -> Vec<u8> {
    let asc = AudioSpecificConfig::new(2, 48000, 2);
    prepend_adts_header(&vec![(index as u8) | 0x01; 120], &asc).unwrap()
}

pub fn video_packet(index: usize) -> EncodedPacket {
    let packet_type = if index % GOP == 0 {
        PacketType::Key
    } else {
        PacketType::Delta
    };
    EncodedPacket::new(
        video_frame(index),
        packet_type,
        START + index as f64 / FPS,
        1.0 / FPS,
    )
}

pub fn audio_packet(index: usize) -> EncodedPacket {
    EncodedPacket::new(
        audio_frame(index),
        PacketType::Key,
        START + index as f64 * AUDIO_FRAME,
        AUDIO_FRAME,
    )
}

/// Two seconds of Annex B AVC and ADTS AAC in a transport stream, starting
/// at 1.4 s. `extra_audio` declares another AAC track that gets no packets.
pub async fn transport_stream(extra_audio: bool) -> Vec<u8> {
    let buffer = BufferTarget::new();
    let mut output = Output::new(OutputFormat::mpeg_ts(), Box::new(buffer.clone())).unwrap();
    let video = output
        .add_video_track(Codec::Avc, TrackOptions::default())
        .unwrap();
    let audio = output
        .add_audio_track(
            Codec::Aac,
            TrackOptions {
                language: "eng".to_string(),
                rotation: 0,
            },
        )
        .unwrap();
    if extra_audio {
        output
            .add_audio_track(Codec::Aac, TrackOptions::default())
            .unwrap();
    }
    output.start().await.unwrap();

    let video_config = decoder_config::avc_from_annex_b(&video_frame(0)).unwrap();
    let audio_config = decoder_config::aac_from_adts(&audio_frame(0)).unwrap();
    let (mut v, mut a) = (0, 0);
    while v < VIDEO_FRAMES || a < AUDIO_FRAMES {
        let video_next = v < VIDEO_FRAMES
            && (a >= AUDIO_FRAMES || video_packet(v).timestamp <= audio_packet(a).timestamp);
        if video_next {
            let config = (v == 0).then(|| video_config.clone());
            output.add_packet(video, video_packet(v), config).await.unwrap();
            v += 1;
        } else {
            let config = (a == 0).then(|| audio_config.clone());
            output.add_packet(audio, audio_packet(a), config).await.unwrap();
            a += 1;
        }
    }
    output.finalize().await.unwrap();
    buffer.bytes().await
}

/// `frames` of Annex B AVC alone in a transport stream.
pub async fn long_video_stream(frames: usize) -> Vec<u8> {
    let buffer = BufferTarget::new();
    let mut output = Output::new(OutputFormat::mpeg_ts(), Box::new(buffer.clone())).unwrap();
    let video = output
        .add_video_track(Codec::Avc, TrackOptions::default())
        .unwrap();
    output.start().await.unwrap();
    let config = decoder_config::avc_from_annex_b(&video_frame(0)).unwrap();
    for i in 0..frames {
        let config = (i == 0).then(|| config.clone());
        output.add_packet(video, video_packet(i), config).await.unwrap();
    }
    output.finalize().await.unwrap();
    buffer.bytes().await
}

/// Display indices of `frames` video frames in decode order, with each
/// P frame sent ahead of the two B frames it follows in display order.
pub fn decode_order(frames: usize) -> Vec<usize> {
    let mut order = vec![0];
    let mut m = 1;
    while m + 2 < frames {
        order.extend([m + 2, m, m + 1]);
        m += 3;
    }
    order.extend(m..frames);
    order
}

/// Video with B-frame reordering in a transport stream.
pub async fn reordered_stream(frames: usize) -> Vec<u8> {
    let buffer = BufferTarget::new();
    let mut output = Output::new(OutputFormat::mpeg_ts(), Box::new(buffer.clone())).unwrap();
    let video = output
        .add_video_track(Codec::Avc, TrackOptions::default())
        .unwrap();
    output.start().await.unwrap();
    let config = decoder_config::avc_from_annex_b(&video_frame(0)).unwrap();
    for (n, i) in decode_order(frames).into_iter().enumerate() {
        let config = (n == 0).then(|| config.clone());
        output.add_packet(video, video_packet(i), config).await.unwrap();
    }
    output.finalize().await.unwrap();
    buffer.bytes().await
}

pub async fn collect(track: &InputTrack, options: PacketRetrievalOptions) -> Vec<EncodedPacket> {
    let mut cursor = track.packet_sink().packets(options);
    let mut packets = Vec::new();
    while let Some(packet) = cursor.next().await.unwrap() {
        packets.push(packet);
    }
    packets
}

pub async fn track_of(input: &Input, codec: Codec) -> InputTrack {
    input
        .tracks()
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.codec() == Some(codec))
        .unwrap()
}
