//! Framing packets for the wire.

use bytes::Bytes;

use crate::{Packet, FRAME_HEADER_LEN};

/// Accumulates framed packets back to back, in the order they were appended.
/// The resulting byte string is what an HTTP response body carries.
#[derive(Default)]
pub struct PacketEncoder {
    buf: Vec<u8>,
}

impl PacketEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a single packet, wrapped in its frame header.
    pub fn append_packet<P: Packet>(&mut self, packet: &P) -> anyhow::Result<()> {
        let start = self.buf.len();

        self.buf.extend_from_slice(&P::ID.to_le_bytes());
        // Reserved byte, always zero.
        self.buf.push(0);
        // Payload length placeholder, patched once the payload is written.
        self.buf.extend_from_slice(&[0; 4]);

        packet.encode(&mut self.buf)?;

        let payload_len = (self.buf.len() - start - FRAME_HEADER_LEN) as u32;
        self.buf[start + 3..start + FRAME_HEADER_LEN].copy_from_slice(&payload_len.to_le_bytes());

        Ok(())
    }

    /// Appends bytes that are already framed.
    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

/// Frames a single packet. Shorthand for a one-packet [`PacketEncoder`].
pub fn frame<P: Packet>(packet: &P) -> anyhow::Result<Bytes> {
    let mut enc = PacketEncoder::new();
    enc.append_packet(packet)?;
    Ok(enc.into_bytes())
}
