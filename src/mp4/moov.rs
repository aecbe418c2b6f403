use super::mvhd::{build_mvhd, parse_mvhd};
use super::r#box::{child_boxes, find_box, make_container, require_box};
use super::trak::{parse_trak, TrakInfo};
use crate::errors::{MediaError, MediaResult};
use log::debug;

/// Parsed movie box
#[derive(Debug, Clone)]
pub struct MovieInfo {
    pub timescale: u32,
    pub duration: u64,
    pub traks: Vec<TrakInfo>,
}

impl MovieInfo {
    pub fn duration_seconds(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.duration as f64 / self.timescale as f64
    }
}

/// Parse a moov box payload into its tracks
pub fn parse_moov(moov: &[u8]) -> MediaResult<MovieInfo> {
    if find_box(moov, "mvex").is_some() {
        return Err(MediaError::unsupported("fragmented MP4 files are not supported"));
    }
    let (timescale, duration) = parse_mvhd(require_box(moov, "mvhd", "moov")?)
        .ok_or_else(|| MediaError::format("invalid mvhd box"))?;

    let mut traks = Vec::new();
    for (name, _, payload_start, end) in child_boxes(moov) {
        if name != "trak" {
            continue;
        }
        if let Some(trak) = parse_trak(&moov[payload_start..end], timescale)? {
            debug!(
                "track {}: {} {} with {} samples",
                trak.track.id,
                trak.track.track_type.name(),
                trak.track.internal_codec_id,
                trak.entries.len()
            );
            traks.push(trak);
        }
    }

    Ok(MovieInfo {
        timescale,
        duration,
        traks,
    })
}

/// Serialize a moov box from already built trak boxes.
pub fn build_moov(timescale: u32, duration: u64, next_track_id: u32, traks: &[Vec<u8>]) -> Vec<u8> {
    let mut children = Vec::with_capacity(traks.len() + 1);
    children.push(build_mvhd(timescale, duration, next_track_id));
    children.extend(traks.iter().cloned());
    make_container("moov", &children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::r#box::{make_box, make_full_box};

    #[test]
    fn test_fragmented_movie_is_unsupported() {
        let moov = [
            build_mvhd(1000, 0, 1),
            make_box("mvex", &make_full_box("trex", 0, 0, &[0; 20])),
        ]
        .concat();
        assert!(matches!(parse_moov(&moov), Err(MediaError::Unsupported(_))));
    }

    #[test]
    fn test_empty_movie_has_no_tracks() {
        let moov = build_moov(1000, 2500, 1, &[]);
        let info = parse_moov(find_box(&moov, "moov").unwrap()).unwrap();
        assert!(info.traks.is_empty());
        assert_eq!(info.duration_seconds(), 2.5);
    }

    #[test]
    fn test_missing_mvhd_is_format_error() {
        assert!(matches!(parse_moov(&[]), Err(MediaError::Format(_))));
    }
}
