use super::ctts::{build_ctts, parse_ctts};
use super::elst::{build_edts, parse_elst, presentation_offset, EditListEntry};
use super::hdlr::{build_hdlr, parse_handler, track_type_for_handler};
use super::mdhd::{build_mdhd, parse_mdhd};
use super::r#box::{find_box, find_path, make_box, make_container, make_full_box, require_box};
use super::stco::{build_chunk_offsets, parse_stco_or_co64};
use super::stsc::{build_stsc, parse_stsc, samples_per_chunk};
use super::stsd::parse_stsd;
use super::stss::{build_stss, parse_stss};
use super::stsz::{build_stsz, parse_stsz};
use super::stts::{build_decode_times, build_stts, compress_deltas, parse_stts};
use super::tkhd::{build_tkhd, parse_tkhd, TrackHeader};
use crate::demux::{IndexEntry, PacketLocation};
use crate::errors::{MediaError, MediaResult};
use crate::track::{AudioTrackInfo, DecoderConfig, Track, TrackType, VideoTrackInfo};
use log::debug;

/// A track of the movie with its sample table flattened into index entries
#[derive(Debug, Clone)]
pub struct TrakInfo {
    pub track: Track,
    pub decoder_config: Option<DecoderConfig>,
    /// Samples in decode order.
    pub entries: Vec<IndexEntry>,
}

/// Parse a trak box payload. Tracks with an unknown handler yield `None`.
pub fn parse_trak(trak: &[u8], movie_timescale: u32) -> MediaResult<Option<TrakInfo>> {
    let tkhd = require_box(trak, "tkhd", "trak")?;
    let header = parse_tkhd(tkhd).ok_or_else(|| MediaError::format("invalid tkhd box"))?;
    let mdia = require_box(trak, "mdia", "trak")?;

    let handler = find_box(mdia, "hdlr").and_then(parse_handler);
    let Some(track_type) = handler.as_ref().and_then(track_type_for_handler) else {
        debug!(
            "skipping track {} with handler {:?}",
            header.track_id,
            handler.map(|h| String::from_utf8_lossy(&h).into_owned())
        );
        return Ok(None);
    };

    let media = parse_mdhd(require_box(mdia, "mdhd", "mdia")?)?;
    if media.timescale == 0 {
        return Err(MediaError::format(format!(
            "track {} has a zero timescale",
            header.track_id
        )));
    }
    let stbl = find_path(mdia, &["minf", "stbl"])
        .ok_or_else(|| MediaError::format("stbl box not found in mdia box"))?;
    let sample_entry = parse_stsd(stbl, track_type)?;

    let edits = parse_elst(trak);
    let shift = presentation_offset(&edits, movie_timescale, media.timescale);
    let entries = build_index_entries(stbl, media.timescale, shift)?;

    let track = Track {
        id: header.track_id,
        track_type,
        codec: sample_entry.codec,
        internal_codec_id: sample_entry.fourcc.clone(),
        time_resolution: media.timescale,
        language: media.language.clone(),
        video: (track_type == TrackType::Video).then(|| VideoTrackInfo {
            display_width: if header.width > 0 { header.width } else { sample_entry.width },
            display_height: if header.height > 0 { header.height } else { sample_entry.height },
            rotation: header.rotation,
        }),
        audio: (track_type == TrackType::Audio).then(|| AudioTrackInfo {
            sample_rate: sample_entry.sample_rate,
            channels: sample_entry.channels,
        }),
    };

    Ok(Some(TrakInfo {
        track,
        decoder_config: sample_entry.decoder_config,
        entries,
    }))
}

/// Flatten the sample tables of an stbl into index entries in decode order.
///
/// `shift` is the edit list presentation offset in seconds; it applies to
/// both decode and presentation times so their distance is preserved.
pub fn build_index_entries(stbl: &[u8], timescale: u32, shift: f64) -> MediaResult<Vec<IndexEntry>> {
    let sizes = parse_stsz(stbl)?;
    let sample_count = sizes.len();
    if sample_count == 0 {
        return Ok(Vec::new());
    }

    let stts = parse_stts(stbl)?;
    let mut decode_times = build_decode_times(&stts);
    if decode_times.len() < sample_count {
        return Err(MediaError::format(format!(
            "stts describes {} samples, stsz {}",
            decode_times.len(),
            sample_count
        )));
    }
    decode_times.truncate(sample_count);
    let composition = parse_ctts(stbl, sample_count)?;
    let sync = parse_stss(stbl);
    let chunk_offsets = parse_stco_or_co64(stbl)?;
    let chunk_counts = samples_per_chunk(&parse_stsc(stbl)?, chunk_offsets.len());

    let scale = timescale as f64;
    let mut sync_iter = sync.as_ref().map(|s| s.iter().peekable());
    let mut entries = Vec::with_capacity(sample_count);
    let mut sample = 0usize;
    for (chunk_offset, count) in chunk_offsets.iter().zip(chunk_counts) {
        let mut offset = *chunk_offset;
        for _ in 0..count {
            if sample == sample_count {
                break;
            }
            let dts = decode_times[sample];
            let pts = match &composition {
                Some(offsets) => dts as i64 + offsets[sample],
                None => dts as i64,
            };
            // stss numbers samples from 1
            let is_key = match sync_iter.as_mut() {
                None => true,
                Some(iter) => {
                    while iter.next_if(|&&s| (s as usize) < sample + 1).is_some() {}
                    iter.peek().is_some_and(|&&s| s as usize == sample + 1)
                }
            };
            let duration = match composition {
                None => decode_times
                    .get(sample + 1)
                    .map(|next| (next - dts) as f64 / scale)
                    .or_else(|| stts.last().map(|e| e.sample_delta as f64 / scale)),
                Some(_) => None,
            };
            entries.push(IndexEntry {
                pts: pts as f64 / scale + shift,
                dts: dts as f64 / scale + shift,
                duration,
                is_key,
                location: PacketLocation::Contiguous {
                    offset,
                    size: sizes[sample],
                },
            });
            offset += sizes[sample] as u64;
            sample += 1;
        }
    }

    if entries.len() < sample_count {
        debug!(
            "chunk tables cover {} of {} samples",
            entries.len(),
            sample_count
        );
    }
    Ok(entries)
}

/// Sample tables of a track being written
#[derive(Debug, Clone, Default)]
pub struct SampleTables {
    pub sizes: Vec<u32>,
    /// Decode time deltas in media timescale units.
    pub deltas: Vec<u32>,
    /// Composition offsets, only when some sample is reordered.
    pub composition_offsets: Option<Vec<i32>>,
    /// 1-based sync sample numbers, only when not every sample is sync.
    pub sync_samples: Option<Vec<u32>>,
    pub chunk_offsets: Vec<u64>,
    pub chunk_sample_counts: Vec<u32>,
}

/// Everything besides the sample tables needed to write a trak
#[derive(Debug, Clone)]
pub struct TrakLayout<'a> {
    pub header: TrackHeader,
    pub track_type: TrackType,
    pub language: &'a str,
    pub timescale: u32,
    /// Track duration in movie timescale units.
    pub movie_duration: u64,
    pub media_duration: u64,
    pub edits: &'a [EditListEntry],
    pub stsd: Vec<u8>,
}

/// Serialize a complete trak box.
pub fn build_trak(layout: &TrakLayout<'_>, tables: &SampleTables) -> Vec<u8> {
    let mut stbl = vec![
        layout.stsd.clone(),
        build_stts(&compress_deltas(&tables.deltas)),
    ];
    if let Some(offsets) = &tables.composition_offsets {
        stbl.push(build_ctts(offsets));
    }
    if let Some(sync) = &tables.sync_samples {
        stbl.push(build_stss(sync));
    }
    stbl.push(build_stsc(&tables.chunk_sample_counts));
    stbl.push(build_stsz(&tables.sizes));
    stbl.push(build_chunk_offsets(&tables.chunk_offsets));

    let media_header = match layout.track_type {
        TrackType::Video => make_full_box("vmhd", 0, 1, &[0u8; 8]),
        TrackType::Audio => make_full_box("smhd", 0, 0, &[0u8; 4]),
        TrackType::Subtitle => make_full_box("nmhd", 0, 0, &[]),
    };
    let url = make_full_box("url ", 0, 1, &[]);
    let dref = make_full_box("dref", 0, 0, &[&1u32.to_be_bytes()[..], &url].concat());
    let minf = make_container(
        "minf",
        &[media_header, make_box("dinf", &dref), make_container("stbl", &stbl)],
    );
    let mdia = make_container(
        "mdia",
        &[
            build_mdhd(layout.timescale, layout.media_duration, layout.language),
            build_hdlr(layout.track_type),
            minf,
        ],
    );

    let mut children = vec![build_tkhd(
        &layout.header,
        layout.movie_duration,
        layout.track_type == TrackType::Audio,
    )];
    if !layout.edits.is_empty() {
        children.push(build_edts(layout.edits));
    }
    children.push(mdia);
    make_container("trak", &children)
}
