use super::r#box::make_full_box;
use crate::track::TrackType;

/// Handler type of a track's media
pub fn parse_handler(hdlr: &[u8]) -> Option<[u8; 4]> {
    if hdlr.len() < 12 {
        return None;
    }
    let mut handler = [0u8; 4];
    handler.copy_from_slice(&hdlr[8..12]);
    Some(handler)
}

pub fn track_type_for_handler(handler: &[u8; 4]) -> Option<TrackType> {
    match handler {
        b"vide" => Some(TrackType::Video),
        b"soun" => Some(TrackType::Audio),
        b"sbtl" | b"text" | b"subt" => Some(TrackType::Subtitle),
        _ => None,
    }
}

pub fn build_hdlr(track_type: TrackType) -> Vec<u8> {
    let (handler, name): (&[u8; 4], &str) = match track_type {
        TrackType::Video => (b"vide", "VideoHandler"),
        TrackType::Audio => (b"soun", "SoundHandler"),
        TrackType::Subtitle => (b"text", "TextHandler"),
    };
    let mut payload = Vec::with_capacity(32);
    payload.extend_from_slice(&[0u8; 4]);
    payload.extend_from_slice(handler);
    payload.extend_from_slice(&[0u8; 12]);
    payload.extend_from_slice(name.as_bytes());
    payload.push(0);
    make_full_box("hdlr", 0, 0, &payload)
}
