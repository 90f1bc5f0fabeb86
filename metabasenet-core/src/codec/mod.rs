//! Length-prefixed byte codec
//!
//! Every value a chunk stores round-trips through this codec. Multi-byte
//! integers are little-endian; variable-length buffers carry an unsigned
//! varint length prefix; digests are raw fixed-width bytes.

mod compress;

pub use compress::{compress, uncompress};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{MetabaseError, Result};

/// A value that serializes to and from the chunk payload format.
///
/// Round-trip contract: `decode(encode(x)) == x` for every value.
pub trait Codec: Sized {
    /// Append the serialized form to `buf`
    fn encode(&self, buf: &mut BytesMut);

    /// Consume the serialized form from the front of `buf`
    fn decode(buf: &mut Bytes) -> Result<Self>;
}

fn ensure(buf: &Bytes, need: usize, what: &str) -> Result<()> {
    if buf.remaining() < need {
        return Err(MetabaseError::CorruptedInput(format!(
            "short read decoding {}: need {} bytes, have {}",
            what,
            need,
            buf.remaining()
        )));
    }
    Ok(())
}

/// Append an unsigned varint (LEB128) to `buf`
pub fn put_uvarint(buf: &mut BytesMut, mut v: u64) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

/// Consume an unsigned varint from the front of `buf`
pub fn get_uvarint(buf: &mut Bytes) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        ensure(buf, 1, "varint")?;
        let byte = buf.get_u8();
        if shift == 63 && byte > 1 {
            return Err(MetabaseError::CorruptedInput("varint overflow".into()));
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(MetabaseError::CorruptedInput("varint too long".into()));
        }
    }
}

macro_rules! impl_codec_le_int {
    ($ty:ty, $put:ident, $get:ident) => {
        impl Codec for $ty {
            fn encode(&self, buf: &mut BytesMut) {
                buf.$put(*self);
            }

            fn decode(buf: &mut Bytes) -> Result<Self> {
                ensure(buf, std::mem::size_of::<$ty>(), stringify!($ty))?;
                Ok(buf.$get())
            }
        }
    };
}

impl Codec for u8 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(*self);
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        ensure(buf, 1, "u8")?;
        Ok(buf.get_u8())
    }
}

impl_codec_le_int!(u16, put_u16_le, get_u16_le);
impl_codec_le_int!(u32, put_u32_le, get_u32_le);
impl_codec_le_int!(u64, put_u64_le, get_u64_le);

impl Codec for Vec<u8> {
    fn encode(&self, buf: &mut BytesMut) {
        put_uvarint(buf, self.len() as u64);
        buf.put_slice(self);
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let len = get_uvarint(buf)? as usize;
        ensure(buf, len, "byte buffer")?;
        let mut out = vec![0u8; len];
        buf.copy_to_slice(&mut out);
        Ok(out)
    }
}

impl Codec for String {
    fn encode(&self, buf: &mut BytesMut) {
        put_uvarint(buf, self.len() as u64);
        buf.put_slice(self.as_bytes());
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let raw = Vec::<u8>::decode(buf)?;
        String::from_utf8(raw)
            .map_err(|e| MetabaseError::CorruptedInput(format!("invalid utf-8: {}", e)))
    }
}

/// Serialize a value to a standalone byte vector
pub fn encode_to_vec<T: Codec>(value: &T) -> Vec<u8> {
    let mut buf = BytesMut::new();
    value.encode(&mut buf);
    buf.to_vec()
}

/// Deserialize a value from a standalone byte slice, rejecting trailing bytes
pub fn decode_from_slice<T: Codec>(data: &[u8]) -> Result<T> {
    let mut buf = Bytes::copy_from_slice(data);
    let value = T::decode(&mut buf)?;
    if buf.has_remaining() {
        return Err(MetabaseError::CorruptedInput(format!(
            "{} trailing bytes after value",
            buf.remaining()
        )));
    }
    Ok(value)
}
