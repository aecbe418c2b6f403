use super::ftyp::parse_major_brand;
use super::r#box::{read_box_header_at, BoxHeader};
use crate::errors::{MediaError, MediaResult};
use crate::streams::SourceReader;
use log::debug;

/// Top-level layout discovered by walking box headers
#[derive(Debug, Clone, Default)]
pub struct TopLevelBoxes {
    pub major_brand: Option<[u8; 4]>,
    /// Offset and header of the moov box.
    pub moov: Option<(u64, BoxHeader)>,
}

/// Walk top-level boxes by header only until the moov box is found.
///
/// Only the ftyp payload is read besides headers, so a trailing moov after a
/// large mdat costs one header read per top-level box.
pub async fn scan_top_level(reader: &SourceReader) -> MediaResult<TopLevelBoxes> {
    let size = reader.size().await?;
    let mut layout = TopLevelBoxes::default();
    let mut offset = 0u64;
    loop {
        if size.is_some_and(|size| offset >= size) {
            break;
        }
        let Some(header) = read_box_header_at(reader, offset).await? else {
            break;
        };
        debug!("top-level box {} at {} ({} bytes)", header.name, offset, header.size);
        match header.name.as_str() {
            "ftyp" => {
                let payload = reader
                    .read(offset + header.header_size, offset + header.header_size + 4)
                    .await?;
                layout.major_brand = parse_major_brand(&payload);
            }
            "moov" => {
                layout.moov = Some((offset, header));
                break;
            }
            _ => {}
        }
        if header.size == 0 {
            // extends to the end of the file
            break;
        }
        offset += header.size;
    }
    Ok(layout)
}

/// Read the payload of the moov box found by [`scan_top_level`].
pub async fn read_moov_payload(reader: &SourceReader, layout: &TopLevelBoxes) -> MediaResult<Vec<u8>> {
    let (offset, header) = layout
        .moov
        .as_ref()
        .ok_or_else(|| MediaError::format("moov box not found"))?;
    let start = offset + header.header_size;
    let payload = match header.size {
        0 => {
            let end = reader.size().await?.unwrap_or(u64::MAX);
            reader.read(start, end).await?
        }
        _ => reader.read_exact(start, header.payload_size() as usize).await?,
    };
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::ftyp::build_ftyp;
    use crate::mp4::r#box::make_box;
    use crate::streams::MemorySource;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_trailing_moov_found_by_headers() {
        let data = [
            build_ftyp(b"isom", 0x200, &[b"isom", b"mp41"]),
            make_box("mdat", &vec![0xAB; 100_000]),
            make_box("moov", &[1, 2, 3, 4]),
        ]
        .concat();
        let reader = SourceReader::with_read_ahead(Arc::new(MemorySource::new(data)), 16);
        let layout = scan_top_level(&reader).await.unwrap();
        assert_eq!(layout.major_brand, Some(*b"isom"));
        let (offset, _) = layout.moov.clone().unwrap();
        assert_eq!(offset, 8 + 16 + 100_008);
        assert_eq!(read_moov_payload(&reader, &layout).await.unwrap(), vec![1, 2, 3, 4]);
        // the mdat payload was skipped
        assert!(reader.bytes_read() < 1_000);
    }

    #[tokio::test]
    async fn test_missing_moov() {
        let data = make_box("free", &[0; 8]);
        let reader = SourceReader::new(Arc::new(MemorySource::new(data)));
        let layout = scan_top_level(&reader).await.unwrap();
        assert!(layout.moov.is_none());
        assert!(read_moov_payload(&reader, &layout).await.is_err());
    }
}
