//! Core types for the node kernel

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::Codec;
use crate::util::hex;
use crate::{MetabaseError, Result};

/// Wall-clock instant in seconds since the Unix epoch
pub type Timestamp = u64;

/// Identifier of a time bucket: `timestamp / bucket_width`
pub type BucketId = u64;

/// A fixed-width digest usable as a CTSDB key.
///
/// Keys order by unsigned lexicographic comparison of their big-endian
/// bytes, which the derived `Ord` on the inner array provides.
pub trait ChunkKey: Codec + Ord + Copy + Send + Sync + 'static {
    /// Serialized width in bytes
    const WIDTH: usize;
}

macro_rules! define_digest {
    ($name:ident, $bytes:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub [u8; $bytes]);

        impl $name {
            /// Digest width in bytes
            pub const WIDTH: usize = $bytes;

            /// Construct from a byte slice of exactly `WIDTH` bytes
            pub fn from_slice(data: &[u8]) -> Result<Self> {
                if data.len() != $bytes {
                    return Err(MetabaseError::CorruptedInput(format!(
                        "digest expects {} bytes, got {}",
                        $bytes,
                        data.len()
                    )));
                }
                let mut out = [0u8; $bytes];
                out.copy_from_slice(data);
                Ok(Self(out))
            }

            /// View the digest bytes
            pub fn as_bytes(&self) -> &[u8; $bytes] {
                &self.0
            }

            /// Whether every byte is zero
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::to_hex(&self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), hex::to_hex(&self.0))
            }
        }

        impl FromStr for $name {
            type Err = MetabaseError;

            fn from_str(s: &str) -> Result<Self> {
                let decoded = hex::parse_hex_strict(s)?;
                Self::from_slice(&decoded)
            }
        }

        impl Codec for $name {
            fn encode(&self, buf: &mut BytesMut) {
                buf.put_slice(&self.0);
            }

            fn decode(buf: &mut Bytes) -> Result<Self> {
                if buf.remaining() < $bytes {
                    return Err(MetabaseError::CorruptedInput(
                        "short read decoding digest".into(),
                    ));
                }
                let mut out = [0u8; $bytes];
                buf.copy_to_slice(&mut out);
                Ok(Self(out))
            }
        }

        impl ChunkKey for $name {
            const WIDTH: usize = $bytes;
        }
    };
}

define_digest!(Uint224, 28, "224-bit big-endian digest");
define_digest!(Uint256, 32, "256-bit big-endian digest");

impl From<Uint256> for Uint224 {
    /// Keep the low-order 224 bits of a 256-bit digest
    fn from(h: Uint256) -> Self {
        let mut out = [0u8; 28];
        out.copy_from_slice(&h.0[4..]);
        Uint224(out)
    }
}
