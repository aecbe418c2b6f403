use super::ftyp::format_for_brand;
use super::moov::parse_moov;
use super::moov_finder::{read_moov_payload, scan_top_level};
use crate::demux::index::VIDEO_REORDER_MARGIN;
use crate::demux::{ContainerFormat, Demuxer, PacketIndex, PacketLookup, ScanBatch};
use crate::errors::MediaResult;
use crate::streams::SourceReader;
use crate::track::{DecoderConfig, Track, TrackType};
use async_trait::async_trait;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// ISO base media file reader. The whole sample table is indexed at open
/// from the moov box; payloads are read on demand.
pub struct Mp4Demuxer {
    format: ContainerFormat,
    tracks: Vec<Track>,
    configs: HashMap<u32, DecoderConfig>,
    index: PacketIndex,
}

impl Mp4Demuxer {
    pub async fn open(reader: Arc<SourceReader>, format: ContainerFormat) -> MediaResult<Self> {
        let layout = scan_top_level(&reader).await?;
        let format = layout
            .major_brand
            .map_or(format, |brand| format_for_brand(&brand));
        let moov = read_moov_payload(&reader, &layout).await?;
        let movie = parse_moov(&moov)?;
        info!(
            "opened {} with {} tracks, {:.3}s",
            format.name(),
            movie.traks.len(),
            movie.duration_seconds()
        );

        let mut index = PacketIndex::new(reader, None);
        let mut tracks: Vec<Track> = Vec::new();
        let mut configs = HashMap::new();
        let mut batch = ScanBatch {
            entries: Vec::new(),
            done: true,
        };
        for trak in movie.traks {
            let id = trak.track.id;
            if tracks.iter().any(|t| t.id == id) {
                warn!("duplicate track id {}, ignoring the later track", id);
                continue;
            }
            let margin = match trak.track.track_type {
                TrackType::Video => VIDEO_REORDER_MARGIN,
                _ => 0.0,
            };
            index = index.with_track(id, margin);
            batch
                .entries
                .extend(trak.entries.into_iter().map(|entry| (id, entry)));
            if let Some(config) = trak.decoder_config {
                configs.insert(id, config);
            }
            tracks.push(trak.track);
        }

        Ok(Self {
            format,
            tracks,
            configs,
            index: index.with_entries(batch),
        })
    }
}

#[async_trait]
impl Demuxer for Mp4Demuxer {
    fn format(&self) -> ContainerFormat {
        self.format
    }

    fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    async fn decoder_config(&self, track_id: u32) -> MediaResult<Option<DecoderConfig>> {
        Ok(self.configs.get(&track_id).cloned())
    }

    fn packets(&self) -> &dyn PacketLookup {
        &self.index
    }
}
