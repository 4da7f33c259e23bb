//! Splitting a byte stream back into packet frames.

use anyhow::ensure;
use bytes::{Buf, Bytes, BytesMut};

use crate::{FRAME_HEADER_LEN, MAX_PAYLOAD_LEN};

/// A single decoded frame: the packet id and its raw payload.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PacketFrame {
    pub id: u16,
    pub body: Bytes,
}

/// Incrementally splits queued bytes into [`PacketFrame`]s.
#[derive(Default)]
pub struct PacketDecoder {
    buf: BytesMut,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete frame, or `None` if the buffered data ends
    /// mid-frame.
    pub fn try_next_packet(&mut self) -> anyhow::Result<Option<PacketFrame>> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let id = u16::from_le_bytes([self.buf[0], self.buf[1]]);
        let payload_len =
            u32::from_le_bytes([self.buf[3], self.buf[4], self.buf[5], self.buf[6]]) as usize;

        ensure!(
            payload_len <= MAX_PAYLOAD_LEN,
            "payload length of {payload_len} is out of bounds"
        );

        if self.buf.len() < FRAME_HEADER_LEN + payload_len {
            // Not enough data arrived yet.
            return Ok(None);
        }

        self.buf.advance(FRAME_HEADER_LEN);
        let body = self.buf.split_to(payload_len).freeze();

        Ok(Some(PacketFrame { id, body }))
    }
}
