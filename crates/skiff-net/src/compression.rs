//! LZ4 codec for frames carrying the compression flag.
//!
//! A compressed frame payload is an LZ4 block with the uncompressed size
//! prepended as a little-endian `u32`:
//!
//! ```text
//! +----------------------+----------------------+
//! | raw size (4 bytes)   |   LZ4 block          |
//! | u32 little-endian    |                      |
//! +----------------------+----------------------+
//! ```
//!
//! The client never compresses what it sends; [`compress`] exists for the
//! server side of the wire and for tests.

use lz4_flex::{compress_prepend_size, decompress_size_prepended};

/// Compress `data` into a size-prepended LZ4 block.
pub fn compress(data: &[u8]) -> Vec<u8> {
    compress_prepend_size(data)
}

/// Decompress a size-prepended LZ4 block.
///
/// The declared size is checked against `max_size` before any allocation, so
/// a corrupt header cannot make the client reserve gigabytes.
pub fn decompress(data: &[u8], max_size: usize) -> Result<Vec<u8>, CompressionError> {
    let Some(size_bytes) = data.get(..4) else {
        return Err(CompressionError::Truncated(data.len()));
    };
    let declared = u32::from_le_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]])
        as usize;
    if declared > max_size {
        return Err(CompressionError::TooLarge {
            size: declared,
            max: max_size,
        });
    }

    decompress_size_prepended(data).map_err(|e| CompressionError::DecompressFailed(e.to_string()))
}

/// Errors that can occur during payload decompression.
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    /// Fewer than four bytes, so no size prefix.
    #[error("compressed payload too short for size prefix ({0} bytes)")]
    Truncated(usize),
    /// The declared uncompressed size exceeds the limit.
    #[error("declared uncompressed size {size} exceeds maximum {max}")]
    TooLarge {
        /// Declared uncompressed size.
        size: usize,
        /// The configured maximum.
        max: usize,
    },
    /// LZ4 decompression failed.
    #[error("LZ4 decompression failed: {0}")]
    DecompressFailed(String),
}
