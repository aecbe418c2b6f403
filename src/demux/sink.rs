use super::Demuxer;
use crate::errors::MediaResult;
use crate::packet::{EncodedPacket, PacketRetrievalOptions};
use std::sync::Arc;

/// Seek and iteration façade over one track of a demuxer
#[derive(Clone)]
pub struct PacketSink {
    demuxer: Arc<dyn Demuxer>,
    track_id: u32,
}

impl PacketSink {
    pub(crate) fn new(demuxer: Arc<dyn Demuxer>, track_id: u32) -> Self {
        Self { demuxer, track_id }
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    pub async fn get_first_packet(
        &self,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        self.demuxer
            .packets()
            .first_packet(self.track_id, options)
            .await
    }

    /// The packet presented at `timestamp`; the last packet for timestamps
    /// past the end and `None` before the first packet.
    pub async fn get_packet(
        &self,
        timestamp: f64,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        self.demuxer
            .packets()
            .packet_at(self.track_id, timestamp, options)
            .await
    }

    pub async fn get_next_packet(
        &self,
        packet: &EncodedPacket,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        self.demuxer
            .packets()
            .next_packet(self.track_id, packet.sequence_number, options)
            .await
    }

    pub async fn get_key_packet(
        &self,
        timestamp: f64,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        self.demuxer
            .packets()
            .key_packet_at(self.track_id, timestamp, options)
            .await
    }

    pub async fn get_next_key_packet(
        &self,
        packet: &EncodedPacket,
        options: PacketRetrievalOptions,
    ) -> MediaResult<Option<EncodedPacket>> {
        self.demuxer
            .packets()
            .next_key_packet(self.track_id, packet.sequence_number, options)
            .await
    }

    /// Cursor over every packet in decode order.
    pub fn packets(&self, options: PacketRetrievalOptions) -> PacketCursor {
        PacketCursor::new(self.clone(), None, None, options)
    }

    /// Cursor starting at `start` (inclusive) and stopping before the first
    /// packet presented at or after `end`.
    pub fn packets_between(
        &self,
        start: Option<EncodedPacket>,
        end: Option<f64>,
        options: PacketRetrievalOptions,
    ) -> PacketCursor {
        PacketCursor::new(self.clone(), start, end, options)
    }
}

enum CursorState {
    Start,
    After(i64),
    Done,
}

/// Lazy, restartable walk over a track. Only the current position is held.
pub struct PacketCursor {
    sink: PacketSink,
    start: Option<EncodedPacket>,
    end: Option<f64>,
    options: PacketRetrievalOptions,
    state: CursorState,
}

impl PacketCursor {
    fn new(
        sink: PacketSink,
        start: Option<EncodedPacket>,
        end: Option<f64>,
        options: PacketRetrievalOptions,
    ) -> Self {
        Self {
            sink,
            start,
            end,
            options,
            state: CursorState::Start,
        }
    }

    pub async fn next(&mut self) -> MediaResult<Option<EncodedPacket>> {
        let packet = match self.state {
            CursorState::Done => return Ok(None),
            CursorState::Start => match &self.start {
                Some(start) if self.options.metadata_only || !start.is_metadata_only() => {
                    Some(start.clone())
                }
                Some(start) => {
                    // refetch the payload for a metadata-only start packet
                    self.sink
                        .get_packet(start.timestamp, self.options)
                        .await?
                        .filter(|p| p.sequence_number == start.sequence_number)
                        .or_else(|| Some(start.clone()))
                }
                None => self.sink.get_first_packet(self.options).await?,
            },
            CursorState::After(seq) => {
                self.sink
                    .demuxer
                    .packets()
                    .next_packet(self.sink.track_id, seq, self.options)
                    .await?
            }
        };

        match packet {
            Some(p) if self.end.map_or(true, |end| p.timestamp < end) => {
                self.state = CursorState::After(p.sequence_number);
                Ok(Some(p))
            }
            _ => {
                self.state = CursorState::Done;
                Ok(None)
            }
        }
    }

    /// Rewind to the starting position.
    pub fn restart(&mut self) {
        self.state = CursorState::Start;
    }
}
