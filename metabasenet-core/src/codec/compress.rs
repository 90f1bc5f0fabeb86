//! Block compression for opaque byte buffers
//!
//! Length-prepended LZ4 framing. Round-trip: `uncompress(compress(x)) == x`
//! for any byte buffer.

use crate::{MetabaseError, Result};

/// Compress a byte buffer
pub fn compress(src: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(src)
}

/// Decompress a buffer produced by [`compress`]
pub fn uncompress(src: &[u8]) -> Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(src)
        .map_err(|e| MetabaseError::CorruptedInput(format!("bad compressed frame: {}", e)))
}
