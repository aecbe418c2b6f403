use super::r#box::{make_full_box, require_box};
use crate::errors::{MediaError, MediaResult};

#[derive(Debug, Clone, PartialEq)]
pub struct SampleToChunkEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

/// Parse stsc (sample to chunk) box
pub fn parse_stsc(stbl: &[u8]) -> MediaResult<Vec<SampleToChunkEntry>> {
    let stsc = require_box(stbl, "stsc", "stbl")?;

    if stsc.len() < 8 {
        return Err(MediaError::format(
            "stsc box too small: expected at least 8 bytes",
        ));
    }

    let entry_count = u32::from_be_bytes([stsc[4], stsc[5], stsc[6], stsc[7]]) as usize;

    // Verify that the box has enough space for all entries
    let required_size = 8 + entry_count * 12;
    if required_size > stsc.len() {
        return Err(MediaError::format(format!(
            "stsc box too small for {} entries: expected {} bytes, got {}",
            entry_count,
            required_size,
            stsc.len()
        )));
    }

    Ok(stsc[8..required_size]
        .chunks_exact(12)
        .map(|e| SampleToChunkEntry {
            first_chunk: u32::from_be_bytes([e[0], e[1], e[2], e[3]]),
            samples_per_chunk: u32::from_be_bytes([e[4], e[5], e[6], e[7]]),
            sample_description_index: u32::from_be_bytes([e[8], e[9], e[10], e[11]]),
        })
        .collect())
}

/// Number of samples in each of `chunk_count` chunks
pub fn samples_per_chunk(entries: &[SampleToChunkEntry], chunk_count: usize) -> Vec<u32> {
    let mut counts = Vec::with_capacity(chunk_count);
    for (i, entry) in entries.iter().enumerate() {
        let first = entry.first_chunk.max(1) as usize;
        let end = entries
            .get(i + 1)
            .map_or(chunk_count + 1, |next| next.first_chunk as usize)
            .min(chunk_count + 1);
        for _ in first..end {
            counts.push(entry.samples_per_chunk);
        }
    }
    counts.resize(chunk_count, 0);
    counts
}

/// Build stsc from per-chunk sample counts, merging runs.
pub fn build_stsc(chunk_sample_counts: &[u32]) -> Vec<u8> {
    let mut entries: Vec<SampleToChunkEntry> = Vec::new();
    for (i, &count) in chunk_sample_counts.iter().enumerate() {
        if entries.last().map_or(true, |e| e.samples_per_chunk != count) {
            entries.push(SampleToChunkEntry {
                first_chunk: i as u32 + 1,
                samples_per_chunk: count,
                sample_description_index: 1,
            });
        }
    }
    let mut payload = Vec::with_capacity(4 + entries.len() * 12);
    payload.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for entry in &entries {
        payload.extend_from_slice(&entry.first_chunk.to_be_bytes());
        payload.extend_from_slice(&entry.samples_per_chunk.to_be_bytes());
        payload.extend_from_slice(&entry.sample_description_index.to_be_bytes());
    }
    make_full_box("stsc", 0, 0, &payload)
}
