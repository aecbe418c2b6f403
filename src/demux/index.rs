//! Append-only, timestamp-addressed packet index shared by the MP4, MPEG-TS
//! and ADTS demuxers.
//!
//! Queries run against a consistent snapshot under a read lock. When the
//! snapshot cannot answer yet, one caller at a time drives the format's
//! [`ChunkScanner`] under the scanner mutex and publishes the new entries in
//! a single write. Entries are never rewritten, so a sequence number handed
//! out once keeps addressing the same packet.

use super::PacketLookup;
use crate::errors::{MediaError, MediaResult};
use crate::packet::{EncodedPacket, PacketRetrievalOptions, PacketType};
use crate::streams::SourceReader;
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Presentation reordering tolerated for video when deciding coverage.
pub const VIDEO_REORDER_MARGIN: f64 = 0.5;

/// Where a packet's payload lives in the source
#[derive(Debug, Clone, PartialEq)]
pub enum PacketLocation {
    Contiguous {
        offset: u64,
        size: u32,
    },
    /// A payload split over several byte ranges (MPEG-TS packets). `skip`
    /// bytes of the concatenated ranges precede the payload.
    Scattered {
        pieces: Arc<[(u64, u32)]>,
        skip: u32,
        size: u32,
    },
}

impl PacketLocation {
    pub fn size(&self) -> usize {
        match self {
            PacketLocation::Contiguous { size, .. } => *size as usize,
            PacketLocation::Scattered { size, .. } => *size as usize,
        }
    }

    pub async fn read(&self, reader: &SourceReader) -> MediaResult<Vec<u8>> {
        match self {
            PacketLocation::Contiguous { offset, size } => {
                reader.read_exact(*offset, *size as usize).await
            }
            PacketLocation::Scattered { pieces, skip, size } => {
                let size = *size as usize;
                let mut out = Vec::with_capacity(size);
                let mut to_skip = *skip as u64;
                for &(offset, len) in pieces.iter() {
                    if out.len() >= size {
                        break;
                    }
                    let len = len as u64;
                    if to_skip >= len {
                        to_skip -= len;
                        continue;
                    }
                    let take = (len - to_skip).min((size - out.len()) as u64) as usize;
                    out.extend(reader.read_exact(offset + to_skip, take).await?);
                    to_skip = 0;
                }
                if out.len() < size {
                    return Err(MediaError::format("packet extends past its byte ranges"));
                }
                Ok(out)
            }
        }
    }
}

/// One packet as produced by a scanner, in decode order
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub pts: f64,
    pub dts: f64,
    /// Known only when the container states it.
    pub duration: Option<f64>,
    pub is_key: bool,
    pub location: PacketLocation,
}

/// Entries found by one scanning step
#[derive(Debug, Default)]
pub struct ScanBatch {
    pub entries: Vec<(u32, IndexEntry)>,
    /// No further entries exist.
    pub done: bool,
}

/// Incremental parser that extends an index one chunk at a time
#[async_trait]
pub trait ChunkScanner: Send {
    async fn scan_next(&mut self, reader: &SourceReader) -> MediaResult<ScanBatch>;
}

#[derive(Debug, Default)]
struct TrackIndex {
    entries: Vec<IndexEntry>,
    /// Entry indices sorted by (pts, decode order).
    by_pts: Vec<usize>,
    max_dts: f64,
    reorder_margin: f64,
}

impl TrackIndex {
    fn new(reorder_margin: f64) -> Self {
        Self {
            max_dts: f64::NEG_INFINITY,
            reorder_margin,
            ..Default::default()
        }
    }

    fn push(&mut self, track_id: u32, mut entry: IndexEntry) {
        if self.entries.is_empty() && !entry.is_key {
            debug!(
                "track {}: first packet is not flagged as key, treating it as key",
                track_id
            );
            entry.is_key = true;
        }
        let seq = self.entries.len();
        let entries = &self.entries;
        let rank = self.by_pts.partition_point(|&i| entries[i].pts <= entry.pts);
        self.by_pts.insert(rank, seq);
        self.max_dts = self.max_dts.max(entry.dts);
        self.entries.push(entry);
    }

    fn rank_of(&self, seq: usize) -> usize {
        let pts = self.entries[seq].pts;
        let entries = &self.entries;
        self.by_pts
            .partition_point(|&i| (entries[i].pts, i) < (pts, seq))
    }

    fn covers(&self, timestamp: f64, complete: bool) -> bool {
        complete || self.max_dts > timestamp + self.reorder_margin
    }

    /// Explicit duration, else the gap to the next presentation timestamp.
    fn duration_of(&self, seq: usize, complete: bool) -> Option<f64> {
        let entry = &self.entries[seq];
        if let Some(duration) = entry.duration {
            return Some(duration);
        }
        let rank = self.rank_of(seq);
        if let Some(&next) = self.by_pts.get(rank + 1) {
            // Packets still to come present no earlier than max_dts minus the
            // reorder margin, so none can land before `next` once this holds.
            let next_pts = self.entries[next].pts;
            let settled = complete || self.max_dts >= next_pts + self.reorder_margin;
            return settled.then(|| next_pts - entry.pts);
        }
        if !complete {
            return None;
        }
        match rank.checked_sub(1).map(|prev| self.by_pts[prev]) {
            Some(prev) => {
                let prev = &self.entries[prev];
                Some(prev.duration.unwrap_or(entry.pts - prev.pts))
            }
            None => Some(0.0),
        }
    }
}

#[derive(Debug, Default)]
struct IndexState {
    tracks: HashMap<u32, TrackIndex>,
    complete: bool,
    generation: u64,
}

#[derive(Debug, Clone)]
struct Found {
    seq: usize,
    entry: IndexEntry,
    duration: f64,
}

enum Lookup {
    Found(Found),
    NotFound,
    NeedMore,
}

impl IndexState {
    fn apply(&mut self, batch: ScanBatch) {
        for (track_id, entry) in batch.entries {
            self.tracks
                .entry(track_id)
                .or_insert_with(|| TrackIndex::new(0.0))
                .push(track_id, entry);
        }
        if batch.done {
            self.complete = true;
        }
        self.generation += 1;
    }

    fn found(&self, track: &TrackIndex, seq: usize) -> Lookup {
        match track.duration_of(seq, self.complete) {
            Some(duration) => Lookup::Found(Found {
                seq,
                entry: track.entries[seq].clone(),
                duration,
            }),
            None => Lookup::NeedMore,
        }
    }

    fn missing(&self) -> Lookup {
        if self.complete {
            Lookup::NotFound
        } else {
            Lookup::NeedMore
        }
    }

    fn first(&self, track_id: u32) -> Lookup {
        match self.tracks.get(&track_id) {
            Some(track) if !track.entries.is_empty() => self.found(track, 0),
            _ => self.missing(),
        }
    }

    fn at(&self, track_id: u32, timestamp: f64, key_only: bool) -> Lookup {
        if timestamp.is_nan() {
            return Lookup::NotFound;
        }
        let Some(track) = self.tracks.get(&track_id) else {
            return self.missing();
        };
        if !track.covers(timestamp, self.complete) {
            return Lookup::NeedMore;
        }
        let entries = &track.entries;
        let rank = track.by_pts.partition_point(|&i| entries[i].pts <= timestamp);
        let candidate = track.by_pts[..rank]
            .iter()
            .rev()
            .find(|&&i| !key_only || entries[i].is_key);
        match candidate {
            Some(&seq) => self.found(track, seq),
            None => Lookup::NotFound,
        }
    }

    fn after(&self, track_id: u32, sequence_number: i64, key_only: bool) -> Lookup {
        let Some(track) = self.tracks.get(&track_id) else {
            return self.missing();
        };
        let start = (sequence_number + 1).max(0) as usize;
        let next = track
            .entries
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, e)| !key_only || e.is_key);
        match next {
            Some((seq, _)) => self.found(track, seq),
            None => self.missing(),
        }
    }
}

/// Per-track packet index over one source
pub struct PacketIndex {
    reader: Arc<SourceReader>,
    state: RwLock<IndexState>,
    scanner: Mutex<Option<Box<dyn ChunkScanner>>>,
}

impl PacketIndex {
    /// An empty index. Without a scanner it is complete as soon as it is built.
    pub fn new(reader: Arc<SourceReader>, scanner: Option<Box<dyn ChunkScanner>>) -> Self {
        let complete = scanner.is_none();
        Self {
            reader,
            state: RwLock::new(IndexState {
                complete,
                ..Default::default()
            }),
            scanner: Mutex::new(scanner),
        }
    }

    /// Declare a track and how far its decode order may run ahead of presentation.
    pub fn with_track(mut self, track_id: u32, reorder_margin: f64) -> Self {
        self.state
            .get_mut()
            .tracks
            .entry(track_id)
            .or_insert_with(|| TrackIndex::new(reorder_margin));
        self
    }

    /// Seed with entries parsed while opening.
    pub fn with_entries(mut self, batch: ScanBatch) -> Self {
        let done = batch.done;
        self.state.get_mut().apply(batch);
        if done {
            *self.scanner.get_mut() = None;
        }
        self
    }

    pub async fn is_complete(&self) -> bool {
        self.state.read().await.complete
    }

    /// Packets indexed so far for a track.
    pub async fn indexed_count(&self, track_id: u32) -> usize {
        self.state
            .read()
            .await
            .tracks
            .get(&track_id)
            .map_or(0, |t| t.entries.len())
    }

    async fn resolve<F>(&self, query: F) -> MediaResult<Option<Found>>
    where
        F: Fn(&IndexState) -> Lookup + Send + Sync,
    {
        loop {
            let generation = {
                let state = self.state.read().await;
                match query(&state) {
                    Lookup::Found(found) => return Ok(Some(found)),
                    Lookup::NotFound => return Ok(None),
                    Lookup::NeedMore => state.generation,
                }
            };
            self.extend(generation).await?;
        }
    }

    /// Run one scanning step unless another caller already extended past `seen`.
    async fn extend(&self, seen: u64) -> MediaResult<()> {
        let mut scanner = self.scanner.lock().await;
        if self.state.read().await.generation != seen {
            return Ok(());
        }
        let batch = match scanner.as_mut() {
            Some(scanner) => scanner.scan_next(&self.reader).await?,
            None => ScanBatch {
                entries: Vec::new(),
                done: true,
            },
        };
        if batch.done {
            *scanner = None;
        }
        self.state.write().await.apply(batch);
        Ok(())
    }

    async fn load(
        &self,
        found: Option<Found>,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        let Some(found) = found else {
            return Ok(None);
        };
        let location = &found.entry.location;
        let data = if options.metadata_only {
            Vec::new()
        } else {
            location.read(&self.reader).await?
        };
        Ok(Some(EncodedPacket {
            data,
            packet_type: if found.entry.is_key {
                PacketType::Key
            } else {
                PacketType::Delta
            },
            timestamp: found.entry.pts,
            duration: found.duration,
            sequence_number: found.seq as i64,
            byte_length: location.size(),
        }))
    }
}

#[async_trait]
impl PacketLookup for PacketIndex {
    async fn first_packet(
        &self,
        track_id: u32,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        let found = self.resolve(|s| s.first(track_id)).await?;
        self.load(found, options).await
    }

    async fn packet_at(
        &self,
        track_id: u32,
        timestamp: f64,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        let found = self.resolve(|s| s.at(track_id, timestamp, false)).await?;
        self.load(found, options).await
    }

    async fn next_packet(
        &self,
        track_id: u32,
        sequence_number: i64,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        let found = self
            .resolve(|s| s.after(track_id, sequence_number, false))
            .await?;
        self.load(found, options).await
    }

    async fn key_packet_at(
        &self,
        track_id: u32,
        timestamp: f64,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        let found = self.resolve(|s| s.at(track_id, timestamp, true)).await?;
        self.load(found, options).await
    }

    async fn next_key_packet(
        &self,
        track_id: u32,
        sequence_number: i64,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        let found = self
            .resolve(|s| s.after(track_id, sequence_number, true))
            .await?;
        self.load(found, options).await
    }
}
