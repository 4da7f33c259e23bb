#![doc = include_str!("../README.md")]
#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links,
    rustdoc::missing_crate_level_docs,
    rustdoc::invalid_codeblock_attributes,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::bare_urls,
    rustdoc::invalid_html_tags
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_lifetimes,
    unused_import_braces,
    unreachable_pub,
    clippy::dbg_macro
)]

mod impls;
pub mod decode;
pub mod encode;
pub mod packets;
pub mod uleb128;

use std::io::Write;

pub use decode::{PacketDecoder, PacketFrame};
pub use encode::{frame, PacketEncoder};
pub use uleb128::Uleb128;

/// The bancho protocol version this library speaks.
pub const PROTOCOL_VERSION: i32 = 19;

/// The number of bytes in a packet frame header:
/// `u16 packet_id | u8 reserved | u32 payload_length`.
pub const FRAME_HEADER_LEN: usize = 7;

/// The maximum payload length the decoder will accept. Anything larger is
/// treated as a corrupt frame rather than a buffering hint.
pub const MAX_PAYLOAD_LEN: usize = 1 << 20;

/// The `Encode` trait allows objects to be written to the bancho protocol.
/// It is the inverse of [`Decode`].
///
/// All multibyte integers are little-endian. Strings encode as a single
/// `0x00` byte when empty, and otherwise as `0x0b`, a [`Uleb128`] byte
/// length, then the UTF-8 bytes.
pub trait Encode {
    /// Writes this object to the provided writer.
    ///
    /// If this type also implements [`Decode`] then successful calls to this
    /// function returning `Ok(())` must always successfully decode using the
    /// data that was written to the writer.
    fn encode(&self, w: impl Write) -> anyhow::Result<()>;
}

/// The `Decode` trait allows objects to be read from the bancho protocol.
/// It is the inverse of [`Encode`].
pub trait Decode<'a>: Sized {
    /// Reads this object from the provided byte slice, advancing the slice
    /// past the bytes that were consumed.
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self>;
}

/// A bancho packet with a known server→client packet id.
pub trait Packet: Encode {
    /// The wire id of this packet.
    const ID: u16;
    /// The name of this packet for debugging purposes.
    const NAME: &'static str;
}

/// Assembles the reduced 6-bit privilege field sent to clients.
///
/// Bit 0 is always set, bit 2 is set for unrestricted players, bit 1 for
/// staff, and bit 5 for tournament staff.
pub fn bancho_privileges(restricted: bool, staff: bool, tournament_staff: bool) -> i32 {
    let mut bits = 1;

    if !restricted {
        bits |= 4;
    }

    if staff {
        bits |= 2;
    }

    if tournament_staff {
        bits |= 32;
    }

    bits
}
