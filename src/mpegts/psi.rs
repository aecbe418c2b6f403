//! Program specific information: PAT and PMT sections.

use crate::errors::{MediaError, MediaResult};
use log::debug;

pub const TABLE_PAT: u8 = 0x00;
pub const TABLE_PMT: u8 = 0x02;

const CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// MPEG-2 CRC32 (polynomial 0x04C11DB7, no reflection, no final xor).
pub fn crc32_mpeg(data: &[u8]) -> u32 {
    data.iter().fold(0xFFFF_FFFF, |crc, b| {
        CRC_TABLE[((crc >> 24) as u8 ^ b) as usize] ^ (crc << 8)
    })
}

/// A long-form section with its CRC verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section<'a> {
    pub table_id: u8,
    pub table_id_extension: u16,
    pub version: u8,
    /// Bytes between the section header and the CRC.
    pub body: &'a [u8],
}

/// Total length of the section starting at `data[0]`, once three bytes are known.
pub fn section_length(data: &[u8]) -> Option<usize> {
    (data.len() >= 3).then(|| 3 + (((data[1] & 0x0F) as usize) << 8 | data[2] as usize))
}

pub fn parse_section(data: &[u8]) -> MediaResult<Section<'_>> {
    let length = section_length(data)
        .filter(|l| *l >= 12 && *l <= data.len())
        .ok_or_else(|| MediaError::format("truncated PSI section"))?;
    let section = &data[..length];
    if crc32_mpeg(section) != 0 {
        return Err(MediaError::format("PSI section CRC mismatch"));
    }
    Ok(Section {
        table_id: section[0],
        table_id_extension: u16::from_be_bytes([section[3], section[4]]),
        version: (section[5] >> 1) & 0x1F,
        body: &section[8..length - 4],
    })
}

/// `(program number, PMT PID)` pairs, the network PID entry excluded.
pub fn parse_pat(body: &[u8]) -> Vec<(u16, u16)> {
    body.chunks_exact(4)
        .map(|e| {
            (
                u16::from_be_bytes([e[0], e[1]]),
                u16::from_be_bytes([e[2] & 0x1F, e[3]]),
            )
        })
        .filter(|(program, _)| *program != 0)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub tag: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: u8,
    pub pid: u16,
    pub descriptors: Vec<Descriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmt {
    pub pcr_pid: u16,
    pub streams: Vec<PmtStream>,
}

fn parse_descriptors(mut data: &[u8]) -> Vec<Descriptor> {
    let mut out = Vec::new();
    while data.len() >= 2 {
        let length = data[1] as usize;
        let Some(payload) = data.get(2..2 + length) else {
            debug!("truncated descriptor with tag {:#x}", data[0]);
            break;
        };
        out.push(Descriptor {
            tag: data[0],
            data: payload.to_vec(),
        });
        data = &data[2 + length..];
    }
    out
}

pub fn parse_pmt(body: &[u8]) -> MediaResult<Pmt> {
    if body.len() < 4 {
        return Err(MediaError::format("truncated PMT"));
    }
    let pcr_pid = u16::from_be_bytes([body[0] & 0x1F, body[1]]);
    let info_length = (((body[2] & 0x0F) as usize) << 8) | body[3] as usize;
    let mut pos = 4 + info_length;
    let mut streams = Vec::new();
    while pos + 5 <= body.len() {
        let entry = &body[pos..];
        let es_info_length = (((entry[3] & 0x0F) as usize) << 8) | entry[4] as usize;
        let descriptors = entry
            .get(5..5 + es_info_length)
            .map(parse_descriptors)
            .unwrap_or_default();
        streams.push(PmtStream {
            stream_type: entry[0],
            pid: u16::from_be_bytes([entry[1] & 0x1F, entry[2]]),
            descriptors,
        });
        pos += 5 + es_info_length;
    }
    Ok(Pmt { pcr_pid, streams })
}

fn build_section(table_id: u8, table_id_extension: u16, version: u8, body: &[u8]) -> Vec<u8> {
    // syntax indicator, reserved bits, length covers extension to CRC
    let length = 5 + body.len() + 4;
    let mut section = Vec::with_capacity(3 + length);
    section.push(table_id);
    section.push(0xB0 | ((length >> 8) as u8 & 0x0F));
    section.push(length as u8);
    section.extend_from_slice(&table_id_extension.to_be_bytes());
    section.push(0xC1 | ((version & 0x1F) << 1));
    section.push(0); // section number
    section.push(0); // last section number
    section.extend_from_slice(body);
    let crc = crc32_mpeg(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

pub fn build_pat(transport_stream_id: u16, program: u16, pmt_pid: u16) -> Vec<u8> {
    let mut body = Vec::with_capacity(4);
    body.extend_from_slice(&program.to_be_bytes());
    body.extend_from_slice(&(0xE000 | pmt_pid).to_be_bytes());
    build_section(TABLE_PAT, transport_stream_id, 0, &body)
}

pub fn build_pmt(program: u16, pmt: &Pmt) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(0xE000 | pmt.pcr_pid).to_be_bytes());
    body.extend_from_slice(&0xF000u16.to_be_bytes());
    for stream in &pmt.streams {
        let descriptors: Vec<u8> = stream
            .descriptors
            .iter()
            .flat_map(|d| [vec![d.tag, d.data.len() as u8], d.data.clone()].concat())
            .collect();
        body.push(stream.stream_type);
        body.extend_from_slice(&(0xE000 | stream.pid).to_be_bytes());
        body.extend_from_slice(&(0xF000 | descriptors.len() as u16).to_be_bytes());
        body.extend_from_slice(&descriptors);
    }
    build_section(TABLE_PMT, program, 0, &body)
}

/// Reassembles sections that span several transport packets of one PID
#[derive(Debug, Default)]
pub struct SectionAssembler {
    buffer: Vec<u8>,
    started: bool,
}

impl SectionAssembler {
    /// Feed a packet payload; returns the completed sections.
    pub fn push(&mut self, payload: &[u8], unit_start: bool) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut data = payload;
        if unit_start {
            let Some(&pointer) = data.first() else {
                return out;
            };
            let Some(rest) = data.get(1..) else {
                return out;
            };
            let pointer = pointer as usize;
            if self.started {
                // bytes before the pointer finish the previous section
                self.buffer.extend_from_slice(&rest[..pointer.min(rest.len())]);
                self.take_complete(&mut out);
            }
            self.buffer.clear();
            self.started = true;
            data = rest.get(pointer..).unwrap_or(&[]);
        } else if !self.started {
            return out;
        }
        self.buffer.extend_from_slice(data);
        self.take_complete(&mut out);
        out
    }

    fn take_complete(&mut self, out: &mut Vec<Vec<u8>>) {
        while let Some(length) = section_length(&self.buffer) {
            // 0xFF table id marks stuffing up to the end of the packet
            if self.buffer[0] == 0xFF {
                self.buffer.clear();
                self.started = false;
                return;
            }
            if self.buffer.len() < length {
                return;
            }
            out.push(self.buffer.drain(..length).collect());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_of_known_pat() {
        // PAT for program 1 on PMT PID 0x1000, as produced by common muxers
        let pat = build_pat(1, 1, 0x1000);
        assert_eq!(
            pat,
            vec![0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x01, 0xF0, 0x00, 0x2A, 0xB1, 0x04, 0xB2]
        );
        let section = parse_section(&pat).unwrap();
        assert_eq!(section.table_id, TABLE_PAT);
        assert_eq!(parse_pat(section.body), vec![(1, 0x1000)]);
    }

    #[test]
    fn test_pmt_round_trip_with_descriptors() {
        let pmt = Pmt {
            pcr_pid: 0x100,
            streams: vec![
                PmtStream {
                    stream_type: 0x1B,
                    pid: 0x100,
                    descriptors: Vec::new(),
                },
                PmtStream {
                    stream_type: 0x06,
                    pid: 0x101,
                    descriptors: vec![Descriptor {
                        tag: 0x6A,
                        data: vec![0],
                    }],
                },
            ],
        };
        let section = build_pmt(1, &pmt);
        let parsed = parse_section(&section).unwrap();
        assert_eq!(parsed.table_id, TABLE_PMT);
        assert_eq!(parsed.table_id_extension, 1);
        assert_eq!(parse_pmt(parsed.body).unwrap(), pmt);
    }

    #[test]
    fn test_corrupted_section_rejected() {
        let mut pat = build_pat(1, 1, 0x1000);
        pat[9] ^= 0x01;
        assert!(parse_section(&pat).is_err());
    }

    #[test]
    fn test_assembler_across_packets() {
        let pmt = build_pmt(
            1,
            &Pmt {
                pcr_pid: 0x100,
                streams: vec![PmtStream {
                    stream_type: 0x0F,
                    pid: 0x100,
                    descriptors: vec![Descriptor { tag: 0x0A, data: b"eng\0".to_vec() }],
                }],
            },
        );
        let mut first = vec![0u8];
        first.extend_from_slice(&pmt[..10]);
        let mut second = pmt[10..].to_vec();
        second.extend_from_slice(&[0xFF; 20]);

        let mut assembler = SectionAssembler::default();
        assert!(assembler.push(&first, true).is_empty());
        let sections = assembler.push(&second, false);
        assert_eq!(sections, vec![pmt]);
        assert!(assembler.push(&[1, 2, 3], false).is_empty());
    }
}
