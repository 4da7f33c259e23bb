use std::io::Write;

use anyhow::bail;
use byteorder::ReadBytesExt;

use crate::{Decode, Encode};

/// A `u32` encoded with variable length, seven bits per byte, least
/// significant group first. Used as the byte-length prefix of strings.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct Uleb128(pub u32);

impl Uleb128 {
    /// The maximum number of bytes a ULEB128 could occupy when read from and
    /// written to the wire.
    pub const MAX_SIZE: usize = 5;

    /// Returns the exact number of bytes this integer will write when
    /// [`Encode::encode`] is called, assuming no error occurs.
    pub fn written_size(self) -> usize {
        match self.0 {
            0 => 1,
            n => (31 - n.leading_zeros() as usize) / 7 + 1,
        }
    }
}

impl Encode for Uleb128 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        let mut n = self.0;

        loop {
            let mut byte = (n & 0x7f) as u8;
            n >>= 7;

            if n != 0 {
                byte |= 0x80;
            }

            w.write_all(&[byte])?;

            if n == 0 {
                return Ok(());
            }
        }
    }
}

impl Decode<'_> for Uleb128 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let mut val = 0;
        for i in 0..Self::MAX_SIZE {
            let byte = r.read_u8()?;
            val |= u32::from(byte & 0x7f) << (i * 7);
            if byte & 0x80 == 0 {
                return Ok(Uleb128(val));
            }
        }
        bail!("ULEB128 is too large")
    }
}

impl From<u32> for Uleb128 {
    fn from(n: u32) -> Self {
        Uleb128(n)
    }
}

impl From<Uleb128> for u32 {
    fn from(n: Uleb128) -> Self {
        n.0
    }
}
