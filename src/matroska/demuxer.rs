use super::cluster_index::{ClusterIndex, TrackTiming};
use super::ebml::{children, float_child, read_element_header_at, string_child, uint_child};
use super::elements::*;
use super::tracks::parse_tracks;
use crate::demux::index::VIDEO_REORDER_MARGIN;
use crate::demux::{ContainerFormat, Demuxer, PacketLookup};
use crate::errors::{MediaError, MediaResult};
use crate::streams::SourceReader;
use crate::track::{DecoderConfig, Track, TrackType};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_TIMESTAMP_SCALE: u64 = 1_000_000;

/// Level 1 metadata elements found before the first cluster or via SeekHead
#[derive(Default)]
struct SegmentLayout {
    seeks: Vec<(u32, u64)>,
    info: Option<Vec<u8>>,
    tracks: Option<Vec<u8>>,
    cues: Option<Vec<u8>>,
    first_cluster: Option<u64>,
}

impl SegmentLayout {
    fn slot(&mut self, id: u32) -> Option<&mut Option<Vec<u8>>> {
        match id {
            INFO => Some(&mut self.info),
            TRACKS => Some(&mut self.tracks),
            CUES => Some(&mut self.cues),
            _ => None,
        }
    }
}

/// Matroska and WebM reader. Metadata is read at open, clusters are parsed
/// on demand by the [`ClusterIndex`].
pub struct MatroskaDemuxer {
    format: ContainerFormat,
    tracks: Vec<Track>,
    configs: HashMap<u32, DecoderConfig>,
    duration: Option<f64>,
    index: ClusterIndex,
}

impl MatroskaDemuxer {
    pub async fn open(reader: Arc<SourceReader>, format: ContainerFormat) -> MediaResult<Self> {
        let source_size = reader.size().await?;
        let ebml = read_element_header_at(&reader, 0)
            .await?
            .filter(|h| h.id == EBML_HEADER)
            .ok_or_else(|| MediaError::format("missing EBML header"))?;
        let ebml_end = ebml
            .total_size()
            .ok_or_else(|| MediaError::format("EBML header with unknown size"))?;
        let header = reader.read(ebml.header_size as u64, ebml_end).await?;
        let format = match string_child(&header, DOC_TYPE).as_deref() {
            Some("webm") => ContainerFormat::WebM,
            Some("matroska") | None => ContainerFormat::Matroska,
            Some(other) => {
                warn!("unexpected EBML doc type {}, reading as {}", other, format);
                format
            }
        };

        let segment = read_element_header_at(&reader, ebml_end)
            .await?
            .filter(|h| h.id == SEGMENT)
            .ok_or_else(|| MediaError::format("missing Matroska Segment"))?;
        let data_start = ebml_end + segment.header_size as u64;
        let declared_end = segment.total_size().map(|total| ebml_end + total);
        let segment_end = match (declared_end, source_size) {
            (Some(end), Some(size)) => end.min(size),
            (Some(end), None) => end,
            (None, Some(size)) => size,
            (None, None) => u64::MAX,
        };

        let mut layout = read_level1(&reader, data_start, segment_end).await?;
        resolve_seeks(&reader, data_start, &mut layout).await?;

        let info = layout.info.take().unwrap_or_default();
        let timestamp_scale = uint_child(&info, TIMESTAMP_SCALE)
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_TIMESTAMP_SCALE);
        let duration = float_child(&info, DURATION).map(|d| d * timestamp_scale as f64 / 1e9);

        let entries = match layout.tracks.take() {
            Some(tracks) => parse_tracks(&tracks, timestamp_scale)?,
            None => {
                warn!("Matroska segment without Tracks");
                Vec::new()
            }
        };

        let mut tracks = Vec::with_capacity(entries.len());
        let mut configs = HashMap::new();
        let mut timing = HashMap::new();
        for entry in entries {
            let id = entry.track.id;
            timing.insert(
                id,
                TrackTiming {
                    default_duration: entry.default_duration,
                    reorder_margin: match entry.track.track_type {
                        TrackType::Video => VIDEO_REORDER_MARGIN,
                        _ => 0.0,
                    },
                },
            );
            if let Some(config) = entry.decoder_config {
                configs.insert(id, config);
            }
            tracks.push(entry.track);
        }

        let cue_points = layout
            .cues
            .as_deref()
            .map(|cues| parse_cues(cues, data_start))
            .unwrap_or_default();
        let first_cluster = layout
            .first_cluster
            .or_else(|| cue_points.iter().map(|(offset, _)| *offset).min());
        debug!(
            "Matroska segment at {}, first cluster {:?}, {} cue points",
            data_start,
            first_cluster,
            cue_points.len()
        );
        info!(
            "opened {} with {} tracks{}",
            format.name(),
            tracks.len(),
            duration.map_or(String::new(), |d| format!(", {:.3}s", d))
        );

        let index = ClusterIndex::new(reader, first_cluster, segment_end, timestamp_scale, timing)
            .with_cue_points(cue_points);
        Ok(Self {
            format,
            tracks,
            configs,
            duration,
            index,
        })
    }

    /// Duration stated in the segment Info, in seconds.
    pub fn duration(&self) -> Option<f64> {
        self.duration
    }
}

/// Walk level 1 elements up to the first cluster.
async fn read_level1(reader: &SourceReader, data_start: u64, segment_end: u64) -> MediaResult<SegmentLayout> {
    let mut layout = SegmentLayout::default();
    let mut pos = data_start;
    while pos < segment_end {
        let Some(header) = read_element_header_at(reader, pos).await? else {
            break;
        };
        if header.id == CLUSTER {
            layout.first_cluster = Some(pos);
            break;
        }
        let Some(total) = header.total_size() else {
            warn!("unknown-size element {:#x} before the first cluster", header.id);
            break;
        };
        let payload_start = pos + header.header_size as u64;
        if header.id == SEEK_HEAD {
            let payload = reader.read(payload_start, pos + total).await?;
            layout.seeks.extend(parse_seek_head(&payload));
        } else if let Some(slot) = layout.slot(header.id) {
            if slot.is_none() {
                *slot = Some(reader.read(payload_start, pos + total).await?);
            }
        }
        pos += total;
    }
    Ok(layout)
}

/// Load Info, Tracks and Cues placed after the clusters.
async fn resolve_seeks(reader: &SourceReader, data_start: u64, layout: &mut SegmentLayout) -> MediaResult<()> {
    let seeks = layout.seeks.clone();
    for (id, position) in seeks {
        let offset = data_start + position;
        if id == CLUSTER {
            if layout.first_cluster.is_none() {
                layout.first_cluster = Some(offset);
            }
            continue;
        }
        if !matches!(layout.slot(id), Some(None)) {
            continue;
        }
        let header = match read_element_header_at(reader, offset).await {
            Ok(Some(header)) if header.id == id => header,
            Ok(_) | Err(MediaError::Format(_)) => {
                warn!("SeekHead entry {:#x} points to {} which does not hold it", id, offset);
                continue;
            }
            Err(e) => return Err(e),
        };
        let Some(total) = header.total_size() else {
            continue;
        };
        let payload = reader.read(offset + header.header_size as u64, offset + total).await?;
        if let Some(slot) = layout.slot(id) {
            *slot = Some(payload);
        }
    }
    Ok(())
}

fn parse_seek_head(data: &[u8]) -> Vec<(u32, u64)> {
    children(data)
        .into_iter()
        .filter(|c| c.id == SEEK)
        .filter_map(|seek| {
            let id = super::ebml::find_child(seek.data, SEEK_ID)?;
            let mut pos = 0;
            let id = super::ebml::read_id(id, &mut pos)?;
            Some((id, uint_child(seek.data, SEEK_POSITION)?))
        })
        .collect()
}

/// `(absolute cluster offset, time in ticks)` for each cue track position.
fn parse_cues(data: &[u8], data_start: u64) -> Vec<(u64, u64)> {
    let mut points = Vec::new();
    for point in children(data).into_iter().filter(|c| c.id == CUE_POINT) {
        let Some(time) = uint_child(point.data, CUE_TIME) else {
            continue;
        };
        for position in children(point.data)
            .into_iter()
            .filter(|c| c.id == CUE_TRACK_POSITIONS)
        {
            if let Some(cluster) = uint_child(position.data, CUE_CLUSTER_POSITION) {
                points.push((data_start + cluster, time));
            }
        }
    }
    points
}

#[async_trait]
impl Demuxer for MatroskaDemuxer {
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
