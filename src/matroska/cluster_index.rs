//! Lazily parsed clusters of a Matroska segment.
//!
//! Clusters are cached by byte offset. Cue points seed the map with
//! timestamps of clusters not parsed yet, so a seek starts walking at the
//! closest known cluster instead of the first one. Sequence numbers are
//! derived from block offsets (`offset << 8 | lace`) and therefore stay
//! stable no matter which query parsed the cluster first.

use super::block::parse_block;
use super::ebml::{children, read_element_header_at, read_uint};
use super::elements::{
    is_top_level, BLOCK, BLOCK_DURATION, BLOCK_GROUP, CLUSTER, REFERENCE_BLOCK, SIMPLE_BLOCK,
    TIMESTAMP,
};
use crate::demux::PacketLookup;
use crate::errors::{MediaError, MediaResult};
use crate::packet::{EncodedPacket, PacketRetrievalOptions, PacketType};
use crate::streams::SourceReader;
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-track timing needed to answer queries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackTiming {
    /// DefaultDuration in seconds.
    pub default_duration: Option<f64>,
    pub reorder_margin: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct BlockEntry {
    track: u32,
    seq: i64,
    pts: f64,
    duration: Option<f64>,
    is_key: bool,
    offset: u64,
    size: u32,
}

#[derive(Debug)]
struct Cluster {
    timestamp: f64,
    /// Offset just past the cluster.
    end: u64,
    blocks: Vec<BlockEntry>,
}

#[derive(Debug)]
enum Checkpoint {
    /// Timestamp from a cue point, the cluster itself is not parsed yet.
    Cue(f64),
    Parsed(Arc<Cluster>),
}

impl Checkpoint {
    fn timestamp(&self) -> f64 {
        match self {
            Checkpoint::Cue(t) => *t,
            Checkpoint::Parsed(cluster) => cluster.timestamp,
        }
    }
}

pub struct ClusterIndex {
    reader: Arc<SourceReader>,
    first_cluster: Option<u64>,
    segment_end: u64,
    /// Seconds per timestamp tick.
    tick: f64,
    tracks: HashMap<u32, TrackTiming>,
    clusters: RwLock<BTreeMap<u64, Checkpoint>>,
}

impl ClusterIndex {
    pub fn new(
        reader: Arc<SourceReader>,
        first_cluster: Option<u64>,
        segment_end: u64,
        timestamp_scale: u64,
        tracks: HashMap<u32, TrackTiming>,
    ) -> Self {
        Self {
            reader,
            first_cluster,
            segment_end,
            tick: timestamp_scale as f64 / 1e9,
            tracks,
            clusters: RwLock::new(BTreeMap::new()),
        }
    }

    /// Seed cluster checkpoints from `(cluster offset, cue time in ticks)` pairs.
    pub fn with_cue_points(mut self, points: impl IntoIterator<Item = (u64, u64)>) -> Self {
        let tick = self.tick;
        let clusters = self.clusters.get_mut();
        for (offset, time) in points {
            let seconds = time as f64 * tick;
            let checkpoint = clusters.entry(offset).or_insert(Checkpoint::Cue(seconds));
            if let Checkpoint::Cue(existing) = checkpoint {
                *existing = existing.min(seconds);
            }
        }
        self
    }

    /// Clusters parsed so far.
    pub async fn parsed_clusters(&self) -> usize {
        self.clusters
            .read()
            .await
            .values()
            .filter(|c| matches!(c, Checkpoint::Parsed(_)))
            .count()
    }

    fn margin(&self, track: u32) -> f64 {
        self.tracks.get(&track).map_or(0.0, |t| t.reorder_margin)
    }

    /// The cluster at or after `offset`, skipping other level 1 elements.
    async fn cluster_at(&self, mut offset: u64) -> MediaResult<Option<(u64, Arc<Cluster>)>> {
        loop {
            if offset >= self.segment_end {
                return Ok(None);
            }
            if let Some(Checkpoint::Parsed(cluster)) = self.clusters.read().await.get(&offset) {
                return Ok(Some((offset, cluster.clone())));
            }
            let header = match read_element_header_at(&self.reader, offset).await {
                Ok(Some(header)) => header,
                Ok(None) => return Ok(None),
                Err(MediaError::Format(e)) => {
                    warn!("stopping at unreadable Matroska element at {}: {}", offset, e);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            if header.id != CLUSTER {
                match header.total_size() {
                    Some(total) => {
                        offset += total;
                        continue;
                    }
                    None => return Ok(None),
                }
            }

            let data_start = offset + header.header_size as u64;
            let end = match header.total_size() {
                Some(total) => offset + total,
                None => self.unknown_size_end(data_start).await?,
            };
            let payload = self.reader.read(data_start, end).await?;
            let cluster = Arc::new(self.parse_cluster(&payload, data_start, end));
            debug!(
                "parsed cluster at {} ({:.3}s, {} blocks)",
                offset,
                cluster.timestamp,
                cluster.blocks.len()
            );

            let mut clusters = self.clusters.write().await;
            if let Some(Checkpoint::Parsed(existing)) = clusters.get(&offset) {
                return Ok(Some((offset, existing.clone())));
            }
            clusters.insert(offset, Checkpoint::Parsed(cluster.clone()));
            return Ok(Some((offset, cluster)));
        }
    }

    /// An unknown-size cluster ends at the next level 1 element.
    async fn unknown_size_end(&self, data_start: u64) -> MediaResult<u64> {
        let mut pos = data_start;
        while pos < self.segment_end {
            let Some(header) = read_element_header_at(&self.reader, pos).await? else {
                break;
            };
            if is_top_level(header.id) {
                break;
            }
            match header.total_size() {
                Some(total) => pos += total,
                None => {
                    return Err(MediaError::format(format!(
                        "unknown-size element {:#x} inside a cluster",
                        header.id
                    )))
                }
            }
        }
        Ok(pos)
    }

    fn parse_cluster(&self, payload: &[u8], data_start: u64, end: u64) -> Cluster {
        let mut timestamp = 0i64;
        let mut blocks = Vec::new();
        for child in children(payload) {
            let element_offset = data_start + child.offset as u64;
            let payload_offset = data_start + child.payload_offset as u64;
            match child.id {
                TIMESTAMP => timestamp = read_uint(child.data) as i64,
                SIMPLE_BLOCK => {
                    self.push_block(&mut blocks, child.data, element_offset, payload_offset, timestamp, None, None)
                }
                BLOCK_GROUP => {
                    let group = children(child.data);
                    let Some(block) = group.iter().find(|c| c.id == BLOCK) else {
                        continue;
                    };
                    let duration = group
                        .iter()
                        .find(|c| c.id == BLOCK_DURATION)
                        .map(|c| read_uint(c.data));
                    let is_key = !group.iter().any(|c| c.id == REFERENCE_BLOCK);
                    self.push_block(
                        &mut blocks,
                        block.data,
                        payload_offset + block.offset as u64,
                        payload_offset + block.payload_offset as u64,
                        timestamp,
                        Some(is_key),
                        duration,
                    );
                }
                _ => {}
            }
        }
        Cluster {
            timestamp: timestamp as f64 * self.tick,
            end,
            blocks,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_block(
        &self,
        blocks: &mut Vec<BlockEntry>,
        data: &[u8],
        element_offset: u64,
        payload_offset: u64,
        cluster_timestamp: i64,
        key_override: Option<bool>,
        duration_ticks: Option<u64>,
    ) {
        let block = match parse_block(data) {
            Ok(block) => block,
            Err(e) => {
                debug!("skipping block at {}: {}", element_offset, e);
                return;
            }
        };
        let Ok(track) = u32::try_from(block.track_number) else {
            return;
        };
        let Some(timing) = self.tracks.get(&track) else {
            return;
        };
        let pts = (cluster_timestamp + block.relative_timestamp as i64) as f64 * self.tick;
        let frame_count = block.frames.len();
        let frame_duration = match (duration_ticks, timing.default_duration) {
            (Some(ticks), _) => Some(ticks as f64 * self.tick / frame_count as f64),
            (None, default) => default,
        };
        let is_key = key_override.unwrap_or(block.key_flag);
        for (lace, (offset, size)) in block.frames.iter().enumerate() {
            blocks.push(BlockEntry {
                track,
                seq: ((element_offset as i64) << 8) | lace as i64,
                pts: pts + frame_duration.map_or(0.0, |d| d * lace as f64),
                duration: frame_duration,
                is_key,
                offset: payload_offset + *offset as u64,
                size: *size as u32,
            });
        }
    }

    async fn start_before(&self, timestamp: f64) -> Option<u64> {
        let clusters = self.clusters.read().await;
        clusters
            .iter()
            .rev()
            .find(|(_, c)| c.timestamp() <= timestamp)
            .map(|(offset, _)| *offset)
            .or(self.first_cluster)
    }

    async fn checkpoint_before(&self, offset: u64) -> Option<u64> {
        let first = self.first_cluster?;
        if offset <= first {
            return None;
        }
        let clusters = self.clusters.read().await;
        Some(
            clusters
                .range(first..offset)
                .next_back()
                .map_or(first, |(o, _)| *o),
        )
    }

    /// Latest (by presentation time, then decode order) block of `track`
    /// presented at or before `timestamp`.
    async fn find_at(
        &self,
        track: u32,
        timestamp: f64,
        key_only: bool,
    ) -> MediaResult<Option<(u64, BlockEntry)>> {
        if timestamp.is_nan() || !self.tracks.contains_key(&track) {
            return Ok(None);
        }
        let margin = self.margin(track);
        let Some(mut start) = self.start_before(timestamp - margin).await else {
            return Ok(None);
        };
        loop {
            let mut best: Option<(u64, BlockEntry)> = None;
            let mut offset = start;
            while let Some((at, cluster)) = self.cluster_at(offset).await? {
                let candidates = cluster
                    .blocks
                    .iter()
                    .filter(|b| b.track == track && b.pts <= timestamp && (!key_only || b.is_key));
                for block in candidates {
                    let better = best
                        .as_ref()
                        .map_or(true, |(_, b)| (block.pts, block.seq) >= (b.pts, b.seq));
                    if better {
                        best = Some((at, block.clone()));
                    }
                }
                if cluster.timestamp > timestamp + margin {
                    break;
                }
                offset = cluster.end;
            }
            if best.is_some() {
                return Ok(best);
            }
            match self.checkpoint_before(start).await {
                Some(previous) => start = previous,
                None => return Ok(None),
            }
        }
    }

    /// First block of `track` after `sequence_number` in decode order.
    async fn find_after(
        &self,
        track: u32,
        sequence_number: i64,
        key_only: bool,
    ) -> MediaResult<Option<(u64, BlockEntry)>> {
        if !self.tracks.contains_key(&track) {
            return Ok(None);
        }
        let start = if sequence_number < 0 {
            self.first_cluster
        } else {
            let block_offset = (sequence_number >> 8) as u64;
            let clusters = self.clusters.read().await;
            clusters
                .range(..=block_offset)
                .next_back()
                .map(|(offset, _)| *offset)
                .or(self.first_cluster)
        };
        let Some(mut offset) = start else {
            return Ok(None);
        };
        while let Some((at, cluster)) = self.cluster_at(offset).await? {
            let next = cluster
                .blocks
                .iter()
                .find(|b| b.track == track && b.seq > sequence_number && (!key_only || b.is_key));
            if let Some(block) = next {
                return Ok(Some((at, block.clone())));
            }
            offset = cluster.end;
        }
        Ok(None)
    }

    /// Stated duration, else the gap to the next presentation timestamp of
    /// the track, else the gap from the previous one. The forward walk ends
    /// at the first cluster past the reorder window without a block of the
    /// track.
    async fn duration_of(&self, cluster_offset: u64, entry: &BlockEntry) -> MediaResult<f64> {
        if let Some(duration) = entry.duration {
            return Ok(duration);
        }
        let margin = self.margin(entry.track);
        let mut next: Option<f64> = None;
        let mut previous: Option<f64> = None;
        let mut offset = cluster_offset;
        while let Some((_, cluster)) = self.cluster_at(offset).await? {
            if next.is_some_and(|n| cluster.timestamp > n + margin) {
                break;
            }
            let mut blocks = cluster.blocks.iter().filter(|b| b.track == entry.track).peekable();
            if next.is_none() && blocks.peek().is_none() && cluster.timestamp > entry.pts + margin {
                break;
            }
            for block in blocks {
                if block.pts > entry.pts {
                    next = Some(next.map_or(block.pts, |n| n.min(block.pts)));
                } else if block.pts < entry.pts && block.seq < entry.seq {
                    previous = Some(previous.map_or(block.pts, |p| p.max(block.pts)));
                }
            }
            offset = cluster.end;
        }
        if next.is_none() && previous.is_none() {
            previous = self.preceding_pts(cluster_offset, entry).await?;
        }
        Ok(match (next, previous) {
            (Some(next), _) => next - entry.pts,
            (None, Some(previous)) => entry.pts - previous,
            (None, None) => 0.0,
        })
    }

    /// Latest presentation time before `entry` in the cluster directly
    /// preceding the one at `cluster_offset`.
    async fn preceding_pts(&self, cluster_offset: u64, entry: &BlockEntry) -> MediaResult<Option<f64>> {
        let Some(mut offset) = self.checkpoint_before(cluster_offset).await else {
            return Ok(None);
        };
        let mut preceding = None;
        while let Some((at, cluster)) = self.cluster_at(offset).await? {
            if at >= cluster_offset {
                break;
            }
            offset = cluster.end;
            preceding = Some(cluster);
        }
        Ok(preceding.and_then(|cluster| {
            cluster
                .blocks
                .iter()
                .filter(|b| b.track == entry.track && b.pts < entry.pts)
                .map(|b| b.pts)
                .reduce(f64::max)
        }))
    }

    async fn load(
        &self,
        found: Option<(u64, BlockEntry)>,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        let Some((cluster_offset, entry)) = found else {
            return Ok(None);
        };
        let duration = self.duration_of(cluster_offset, &entry).await?;
        let data = if options.metadata_only {
            Vec::new()
        } else {
            self.reader.read_exact(entry.offset, entry.size as usize).await?
        };
        Ok(Some(EncodedPacket {
            data,
            packet_type: if entry.is_key {
                PacketType::Key
            } else {
                PacketType::Delta
            },
            timestamp: entry.pts,
            duration,
            sequence_number: entry.seq,
            byte_length: entry.size as usize,
        }))
    }

    /// The first block of a track is reported as key whatever its flags say.
    async fn load_first(
        &self,
        track: u32,
        found: Option<(u64, BlockEntry)>,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        let first = self.find_after(track, -1, false).await?;
        let is_first = matches!((&found, &first), (Some((_, a)), Some((_, b))) if a.seq == b.seq);
        let packet = self.load(found, options).await?;
        Ok(packet.map(|mut p| {
            if is_first {
                p.packet_type = PacketType::Key;
            }
            p
        }))
    }
}

#[async_trait]
impl PacketLookup for ClusterIndex {
    async fn first_packet(
        &self,
        track_id: u32,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        let found = self.find_after(track_id, -1, false).await?;
        self.load_first(track_id, found, options).await
    }

    async fn packet_at(
        &self,
        track_id: u32,
        timestamp: f64,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        let found = self.find_at(track_id, timestamp, false).await?;
        self.load_first(track_id, found, options).await
    }

    async fn next_packet(
        &self,
        track_id: u32,
        sequence_number: i64,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        let found = self.find_after(track_id, sequence_number, false).await?;
        self.load_first(track_id, found, options).await
    }

    async fn key_packet_at(
        &self,
        track_id: u32,
        timestamp: f64,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        let found = match self.find_at(track_id, timestamp, true).await? {
            Some(found) => Some(found),
            // the first block counts as key even without the flag
            None => match self.find_after(track_id, -1, false).await? {
                Some(first) if first.1.pts <= timestamp => Some(first),
                _ => None,
            },
        };
        self.load_first(track_id, found, options).await
    }

    async fn next_key_packet(
        &self,
        track_id: u32,
        sequence_number: i64,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        let found = if sequence_number < 0 {
            self.find_after(track_id, -1, false).await?
        } else {
            self.find_after(track_id, sequence_number, true).await?
        };
        self.load_first(track_id, found, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matroska::block::build_simple_block;
    use crate::matroska::ebml::{make_master, make_uint, write_id, UNKNOWN_SIZE_VINT};
    use crate::streams::MemorySource;

    fn cluster(timestamp: u64, blocks: &[(u64, i16, bool)]) -> Vec<u8> {
        let mut children = vec![make_uint(TIMESTAMP, timestamp)];
        for (track, rel, key) in blocks {
            children.push(build_simple_block(*track, *rel, *key, &[*track as u8, *rel as u8]));
        }
        make_master(CLUSTER, &children)
    }

    fn index_over(data: Vec<u8>, tracks: &[(u32, f64)]) -> ClusterIndex {
        let reader = Arc::new(SourceReader::new(Arc::new(MemorySource::new(data.clone()))));
        let timing = tracks
            .iter()
            .map(|(id, margin)| {
                (
                    *id,
                    TrackTiming {
                        default_duration: None,
                        reorder_margin: *margin,
                    },
                )
            })
            .collect();
        ClusterIndex::new(reader, Some(0), data.len() as u64, 1_000_000, timing)
    }

    fn two_track_clusters() -> (Vec<u8>, Vec<u64>) {
        let mut data = Vec::new();
        let mut offsets = Vec::new();
        for i in 0..4u64 {
            offsets.push(data.len() as u64);
            data.extend(cluster(
                i * 1000,
                &[(1, 0, true), (2, 0, true), (1, 500, false), (2, 500, true)],
            ));
        }
        (data, offsets)
    }

    #[tokio::test]
    async fn test_walk_and_seek_agree() {
        let (data, _) = two_track_clusters();
        let index = index_over(data, &[(1, 0.5), (2, 0.0)]);
        let opts = PacketRetrievalOptions::metadata_only();

        let mut walked = Vec::new();
        let mut packet = index.first_packet(1, opts).await.unwrap();
        while let Some(p) = packet {
            walked.push(p.clone());
            packet = index.next_packet(1, p.sequence_number, opts).await.unwrap();
        }
        assert_eq!(walked.len(), 8);
        for pair in walked.windows(2) {
            assert!(pair[0].sequence_number < pair[1].sequence_number);
            assert_eq!(pair[0].duration, 0.5);
        }
        for p in &walked {
            let found = index.packet_at(1, p.timestamp, opts).await.unwrap().unwrap();
            assert_eq!(found.sequence_number, p.sequence_number);
        }
        assert_eq!(walked.last().unwrap().duration, 0.5);

        assert!(index.packet_at(1, -10.0, opts).await.unwrap().is_none());
        let last = index.packet_at(1, f64::INFINITY, opts).await.unwrap().unwrap();
        assert_eq!(last.timestamp, 3.5);

        let key = index.key_packet_at(1, 2.9, opts).await.unwrap().unwrap();
        assert_eq!(key.timestamp, 2.0);
        let next_key = index.next_key_packet(1, key.sequence_number, opts).await.unwrap().unwrap();
        assert_eq!(next_key.timestamp, 3.0);
    }

    #[tokio::test]
    async fn test_cue_points_skip_earlier_clusters() {
        let (data, offsets) = two_track_clusters();
        let cues: Vec<(u64, u64)> = offsets.iter().enumerate().map(|(i, o)| (*o, i as u64 * 1000)).collect();
        let index = index_over(data, &[(1, 0.0), (2, 0.0)]).with_cue_points(cues);
        let p = index
            .packet_at(2, 3.2, PacketRetrievalOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(p.timestamp, 3.0);
        assert_eq!(p.data, vec![2, 0]);
        assert_eq!(index.parsed_clusters().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_size_cluster_ends_at_next_cluster() {
        let mut data = Vec::new();
        write_id(&mut data, CLUSTER);
        data.extend_from_slice(&UNKNOWN_SIZE_VINT);
        data.extend(make_uint(TIMESTAMP, 0));
        data.extend(build_simple_block(1, 0, true, &[1]));
        data.extend(build_simple_block(1, 40, false, &[2]));
        data.extend(cluster(80, &[(1, 0, false)]));
        let index = index_over(data, &[(1, 0.0)]);

        let opts = PacketRetrievalOptions::default();
        let first = index.first_packet(1, opts).await.unwrap().unwrap();
        assert!(first.is_key());
        assert!((first.duration - 0.04).abs() < 1e-9);
        let second = index.next_packet(1, first.sequence_number, opts).await.unwrap().unwrap();
        assert_eq!(second.data, vec![2]);
        let third = index.next_packet(1, second.sequence_number, opts).await.unwrap().unwrap();
        assert!((third.timestamp - 0.08).abs() < 1e-9);
        assert!(index.next_packet(1, third.sequence_number, opts).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_track_has_no_packets() {
        let (data, _) = two_track_clusters();
        let index = index_over(data, &[(1, 0.0)]);
        let opts = PacketRetrievalOptions::default();
        assert!(index.first_packet(2, opts).await.unwrap().is_none());
        assert!(index.packet_at(1, f64::NAN, opts).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_last_block_alone_in_cluster_takes_previous_gap() {
        let mut data = cluster(0, &[(1, 0, true), (1, 400, false)]);
        data.extend(cluster(800, &[(1, 0, false)]));
        let index = index_over(data, &[(1, 0.0)]);
        let opts = PacketRetrievalOptions::metadata_only();

        let last = index.packet_at(1, f64::INFINITY, opts).await.unwrap().unwrap();
        assert!((last.timestamp - 0.8).abs() < 1e-9);
        assert!((last.duration - 0.4).abs() < 1e-9);
        let second = index.packet_at(1, 0.5, opts).await.unwrap().unwrap();
        let walked = index.next_packet(1, second.sequence_number, opts).await.unwrap().unwrap();
        assert_eq!(walked, last);
    }

    #[tokio::test]
    async fn test_track_ending_early_stops_duration_walk() {
        let mut data = cluster(0, &[(1, 0, true), (2, 0, true), (1, 500, false), (2, 500, true)]);
        for i in 1..10u64 {
            data.extend(cluster(i * 1000, &[(1, 0, true), (1, 500, false)]));
        }
        let index = index_over(data, &[(1, 0.0), (2, 0.0)]);
        let opts = PacketRetrievalOptions::metadata_only();

        let first = index.first_packet(2, opts).await.unwrap().unwrap();
        let last = index.next_packet(2, first.sequence_number, opts).await.unwrap().unwrap();
        assert!((last.timestamp - 0.5).abs() < 1e-9);
        assert!((last.duration - 0.5).abs() < 1e-9);
        assert_eq!(index.parsed_clusters().await, 2);
    }
}
