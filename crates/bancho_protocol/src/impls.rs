//! `Encode`/`Decode` implementations for the primitive types of the
//! protocol. All multibyte integers are little-endian.

use std::io::Write;

use anyhow::{bail, ensure};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{Decode, Encode, Uleb128};

impl Encode for bool {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u8(u8::from(*self))?)
    }
}

impl Decode<'_> for bool {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(r.read_u8()? != 0)
    }
}

impl Encode for u8 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u8(*self)?)
    }
}

impl Decode<'_> for u8 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(r.read_u8()?)
    }
}

impl Encode for i8 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_i8(*self)?)
    }
}

impl Decode<'_> for i8 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(r.read_i8()?)
    }
}

macro_rules! impl_int {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Encode for $ty {
            fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
                Ok(w.$write::<LittleEndian>(*self)?)
            }
        }

        impl Decode<'_> for $ty {
            fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
                Ok(r.$read::<LittleEndian>()?)
            }
        }
    };
}

impl_int!(u16, write_u16, read_u16);
impl_int!(i16, write_i16, read_i16);
impl_int!(u32, write_u32, read_u32);
impl_int!(i32, write_i32, read_i32);
impl_int!(u64, write_u64, read_u64);
impl_int!(i64, write_i64, read_i64);
impl_int!(f32, write_f32, read_f32);
impl_int!(f64, write_f64, read_f64);

impl Encode for str {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        if self.is_empty() {
            return Ok(w.write_u8(0x00)?);
        }

        ensure!(
            u32::try_from(self.len()).is_ok(),
            "byte length of string exceeds maximum"
        );

        w.write_u8(0x0b)?;
        Uleb128(self.len() as u32).encode(&mut w)?;
        Ok(w.write_all(self.as_bytes())?)
    }
}

impl Encode for &str {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        str::encode(self, w)
    }
}

impl Encode for String {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.as_str().encode(w)
    }
}

impl<'a> Decode<'a> for &'a str {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self> {
        match r.read_u8()? {
            0x00 => Ok(""),
            0x0b => {
                let len = Uleb128::decode(r)?.0 as usize;
                ensure!(
                    len <= r.len(),
                    "not enough data remaining to decode string of {len} bytes"
                );

                let (bytes, remaining) = r.split_at(len);
                let res = std::str::from_utf8(bytes)?;
                *r = remaining;

                Ok(res)
            }
            prefix => bail!("invalid string prefix byte {prefix:#04x}"),
        }
    }
}

impl Decode<'_> for String {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(<&str>::decode(r)?.into())
    }
}
