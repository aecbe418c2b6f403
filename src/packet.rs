use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketType {
    Key,
    Delta,
}

/// One encoded access unit of a track
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPacket {
    /// Payload bytes. Empty for metadata-only packets.
    pub data: Vec<u8>,
    pub packet_type: PacketType,
    /// Presentation timestamp in seconds.
    pub timestamp: f64,
    /// Duration in seconds.
    pub duration: f64,
    /// Strictly increasing in decode order within a track, stable across queries.
    /// `-1` for packets created outside a demuxer.
    pub sequence_number: i64,
    /// Payload size, also set for metadata-only packets.
    pub byte_length: usize,
}

impl EncodedPacket {
    pub fn new(data: Vec<u8>, packet_type: PacketType, timestamp: f64, duration: f64) -> Self {
        let byte_length = data.len();
        Self {
            data,
            packet_type,
            timestamp,
            duration,
            sequence_number: -1,
            byte_length,
        }
    }

    pub fn is_key(&self) -> bool {
        self.packet_type == PacketType::Key
    }

    /// True when only the size of the payload was retrieved.
    pub fn is_metadata_only(&self) -> bool {
        self.data.is_empty() && self.byte_length > 0
    }

    /// Copy with a new payload, keeping timing and sequence number.
    pub fn with_data(&self, data: Vec<u8>) -> Self {
        Self {
            byte_length: data.len(),
            data,
            ..self.clone()
        }
    }

    /// Copy with new timing.
    pub fn with_timing(&self, timestamp: f64, duration: f64) -> Self {
        Self {
            timestamp,
            duration,
            ..self.clone()
        }
    }

    /// End of the packet's validity interval.
    pub fn end_timestamp(&self) -> f64 {
        self.timestamp + self.duration
    }
}

/// Options for packet queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketRetrievalOptions {
    /// Skip reading payloads; packets carry only timing, type and size.
    pub metadata_only: bool,
}

impl PacketRetrievalOptions {
    pub fn metadata_only() -> Self {
        Self {
            metadata_only: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_data_updates_length() {
        let packet = EncodedPacket::new(vec![1, 2, 3], PacketType::Key, 1.5, 0.5);
        assert_eq!(packet.byte_length, 3);
        assert_eq!(packet.end_timestamp(), 2.0);
        let bigger = packet.with_data(vec![0; 10]);
        assert_eq!(bigger.byte_length, 10);
        assert_eq!(bigger.timestamp, 1.5);
        assert!(bigger.is_key());
        assert!(!bigger.is_metadata_only());
    }
}
