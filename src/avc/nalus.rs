use crate::avc::NaluType;

/// How NAL units are delimited inside a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitFormat {
    /// `00 00 01` / `00 00 00 01` start codes (Annex B).
    AnnexB,
    /// Big endian length prefix of the given width (1 to 4 bytes).
    LengthPrefixed(u8),
}

/// Position of one NAL unit payload inside a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnitLocation {
    pub offset: usize,
    pub length: usize,
}

impl NalUnitLocation {
    pub fn slice<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.offset..self.offset + self.length]
    }
}

/// Lazy iterator over the NAL units of a packet.
///
/// Stops at the first malformed length prefix; `malformed()` reports it.
/// `restart()` rewinds to the first unit.
#[derive(Debug, Clone)]
pub struct NalUnitIter<'a> {
    data: &'a [u8],
    format: NalUnitFormat,
    pos: usize,
    malformed: bool,
}

impl<'a> NalUnitIter<'a> {
    pub fn new(data: &'a [u8], format: NalUnitFormat) -> Self {
        Self {
            data,
            format,
            pos: 0,
            malformed: false,
        }
    }

    pub fn restart(&mut self) {
        self.pos = 0;
        self.malformed = false;
    }

    pub fn malformed(&self) -> bool {
        self.malformed
    }

    fn next_length_prefixed(&mut self, width: usize) -> Option<NalUnitLocation> {
        loop {
            if self.pos >= self.data.len() {
                return None;
            }
            if width == 0 || width > 4 || self.pos + width > self.data.len() {
                self.malformed = true;
                self.pos = self.data.len();
                return None;
            }
            let len = self.data[self.pos..self.pos + width]
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | *b as usize);
            let offset = self.pos + width;
            if offset + len > self.data.len() {
                self.malformed = true;
                self.pos = self.data.len();
                return None;
            }
            self.pos = offset + len;
            if len > 0 {
                return Some(NalUnitLocation {
                    offset,
                    length: len,
                });
            }
        }
    }

    fn next_annex_b(&mut self) -> Option<NalUnitLocation> {
        loop {
            let start = find_start_code(self.data, self.pos)? + 3;
            let end = find_start_code(self.data, start).unwrap_or(self.data.len());
            self.pos = end;
            let mut trimmed = end;
            while trimmed > start && self.data[trimmed - 1] == 0 {
                trimmed -= 1;
            }
            if trimmed > start {
                return Some(NalUnitLocation {
                    offset: start,
                    length: trimmed - start,
                });
            }
            if end >= self.data.len() {
                return None;
            }
        }
    }
}

impl Iterator for NalUnitIter<'_> {
    type Item = NalUnitLocation;

    fn next(&mut self) -> Option<Self::Item> {
        match self.format {
            NalUnitFormat::AnnexB => self.next_annex_b(),
            NalUnitFormat::LengthPrefixed(width) => self.next_length_prefixed(width as usize),
        }
    }
}

/// Offset of the next `00 00 01` at or after `from`.
pub fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < 3 {
        return None;
    }
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i + 2] > 1 {
            i += 3;
        } else if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            return Some(i);
        } else {
            i += 1;
        }
    }
    None
}

/// Represents a NAL unit with its type and data
#[derive(Debug, Clone)]
pub struct Nalu {
    pub nalu_type: NaluType,
    pub data: Vec<u8>,
}

impl Nalu {
    /// Create a NALU from raw data
    pub fn new(data: Vec<u8>) -> Option<Self> {
        if data.is_empty() {
            return None;
        }
        let nalu_type = NaluType::from_header_byte(data[0]);
        Some(Nalu { nalu_type, data })
    }

    /// Check if this NALU is a video frame
    pub fn is_video(&self) -> bool {
        self.nalu_type.is_video()
    }

    /// Check if this NALU is a parameter set (SPS/PPS)
    pub fn is_parameter_set(&self) -> bool {
        self.nalu_type.is_parameter_set()
    }
}

/// Extract all AVC NAL units of a packet.
pub fn extract_nalus(data: &[u8], format: NalUnitFormat) -> Vec<Nalu> {
    NalUnitIter::new(data, format)
        .filter_map(|loc| Nalu::new(loc.slice(data).to_vec()))
        .collect()
}

/// Extract parameter sets (SPS/PPS) from a packet
pub fn extract_parameter_sets(data: &[u8], format: NalUnitFormat) -> (Vec<Nalu>, Vec<Nalu>) {
    let mut sps = Vec::new();
    let mut pps = Vec::new();

    for nalu in extract_nalus(data, format) {
        match nalu.nalu_type {
            NaluType::SPS => sps.push(nalu),
            NaluType::PPS => pps.push(nalu),
            _ => {}
        }
    }

    (sps, pps)
}

/// Return true if the packet contains an IDR slice.
pub fn is_idr_packet(data: &[u8], format: NalUnitFormat) -> bool {
    NalUnitIter::new(data, format)
        .any(|loc| NaluType::from_header_byte(data[loc.offset]) == NaluType::IDR)
}

/// Remove emulation prevention bytes (`00 00 03` -> `00 00`).
pub fn nal_to_rbsp(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len());
    let mut zeros = 0;
    for &b in nal {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

/// Insert emulation prevention bytes into an RBSP.
pub fn rbsp_to_nal(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + 8);
    let mut zeros = 0;
    for &b in rbsp {
        if zeros >= 2 && b <= 3 {
            out.push(3);
            zeros = 0;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

/// Display helper for NAL unit lists used in tests and debugging.
pub fn dump_nalu_types(data: &[u8], format: NalUnitFormat) -> String {
    extract_nalus(data, format)
        .iter()
        .map(|n| n.nalu_type.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
