//! Length-prefixed framing for TCP streams.
//!
//! Every message on the wire is a length-prefixed frame:
//!
//! ```text
//! +-----------------------+--------------------+
//! | length | flag (4 B)   |   payload          |
//! | u32 little-endian     |   (length bytes)   |
//! +-----------------------+--------------------+
//! ```
//!
//! Bit 31 of the prefix is the compression flag; bits 0–30 hold the payload
//! length in bytes. The length does **not** include the 4 prefix bytes. A
//! length of 0 is a valid empty frame.
//!
//! [`FrameDecoder`] is the receive side: raw reads of any size are pushed in,
//! whole frames come out. It never blocks and never returns a partial frame.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::compression::{self, CompressionError};
use crate::message::Message;
use crate::ring_buffer::{ByteRingBuffer, DEFAULT_GROWTH_STEP};

/// Size of the length-and-flag prefix.
pub const HEADER_LEN: usize = 4;

/// Bit 31 of the prefix: payload is LZ4-compressed.
pub const COMPRESSED_FLAG: u32 = 0x8000_0000;

/// Bits 0–30 of the prefix: payload length.
pub const LENGTH_MASK: u32 = 0x7FFF_FFFF;

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes, both on the wire and after
    /// decompression. Default: 16 MiB.
    pub max_payload_size: u32,
    /// Growth step of the reassembly buffer. Default: 4 MiB.
    pub ring_growth_step: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 16 * 1024 * 1024,
            ring_growth_step: DEFAULT_GROWTH_STEP,
        }
    }
}

/// Whether an encoded frame carries a compressed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Payload is written as-is.
    #[default]
    None,
    /// Payload is LZ4-compressed and the flag bit is set.
    Lz4,
}

/// Decoded frame prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length on the wire.
    pub len: u32,
    /// Whether the compression flag is set.
    pub compressed: bool,
}

impl FrameHeader {
    /// Split a raw prefix into length and flag.
    pub fn decode(bytes: [u8; HEADER_LEN]) -> Self {
        let raw = u32::from_le_bytes(bytes);
        Self {
            len: raw & LENGTH_MASK,
            compressed: raw & COMPRESSED_FLAG != 0,
        }
    }

    /// Pack length and flag into a raw prefix.
    pub fn encode(self) -> [u8; HEADER_LEN] {
        let mut raw = self.len & LENGTH_MASK;
        if self.compressed {
            raw |= COMPRESSED_FLAG;
        }
        raw.to_le_bytes()
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload size exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The actual payload size.
        size: u32,
        /// The configured maximum.
        max: u32,
    },

    /// A frame flagged as compressed could not be decompressed.
    #[error("corrupt compressed frame: {0}")]
    Decompress(#[from] CompressionError),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build one complete frame (prefix + payload) ready for a single write.
pub fn encode_frame(
    payload: &[u8],
    compression: Compression,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let check = |len: usize| {
        let size = u32::try_from(len).unwrap_or(u32::MAX);
        if size > config.max_payload_size || size > LENGTH_MASK {
            Err(FrameError::PayloadTooLarge {
                size,
                max: config.max_payload_size.min(LENGTH_MASK),
            })
        } else {
            Ok(size)
        }
    };
    check(payload.len())?;

    let (body, compressed) = match compression {
        Compression::None => (None, false),
        Compression::Lz4 => (Some(compression::compress(payload)), true),
    };
    let body = body.as_deref().unwrap_or(payload);
    let len = check(body.len())?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&FrameHeader { len, compressed }.encode());
    out.extend_from_slice(body);
    Ok(out)
}

/// Incremental frame reassembler backed by a [`ByteRingBuffer`].
#[derive(Debug)]
pub struct FrameDecoder {
    ring: ByteRingBuffer,
    config: FrameConfig,
}

impl FrameDecoder {
    /// Create a decoder with an empty reassembly buffer.
    pub fn new(config: FrameConfig) -> Self {
        Self {
            ring: ByteRingBuffer::with_capacity(config.ring_growth_step, config.ring_growth_step),
            config,
        }
    }

    /// Append raw bytes from one socket read.
    pub fn push(&mut self, bytes: &[u8]) {
        self.ring.enqueue_slice(bytes);
    }

    /// Bytes received but not yet consumed as part of a frame.
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// Drop all buffered bytes.
    pub fn reset(&mut self) {
        self.ring.clear();
    }

    /// Pop the next complete frame, if one is fully buffered.
    ///
    /// Returns `Ok(None)` while the prefix or payload is incomplete; nothing is
    /// consumed in that case. An oversized length or a corrupt compressed
    /// payload is an error and leaves the stream unusable.
    pub fn next_message(&mut self) -> Result<Option<Message>, FrameError> {
        if self.ring.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut prefix = [0u8; HEADER_LEN];
        self.ring.peek_range(&mut prefix);
        let header = FrameHeader::decode(prefix);

        if header.len > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: header.len,
                max: self.config.max_payload_size,
            });
        }

        let len = header.len as usize;
        if self.ring.len() < HEADER_LEN + len {
            return Ok(None);
        }

        self.ring.skip(HEADER_LEN);
        let mut payload = vec![0u8; len];
        self.ring.dequeue_range(&mut payload);

        if header.compressed {
            payload = compression::decompress(&payload, self.config.max_payload_size as usize)?;
        }

        Ok(Some(Message::new(payload)))
    }
}

/// Read a single frame from an async stream, blocking until it is complete.
///
/// Used by peers that own a whole stream (the server side of the wire and
/// tests). Returns [`FrameError::ConnectionClosed`] if the peer closes the
/// connection before the frame is complete.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Message, FrameError> {
    let mut prefix = [0u8; HEADER_LEN];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let header = FrameHeader::decode(prefix);
    if header.len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: header.len,
            max: config.max_payload_size,
        });
    }

    let mut payload = vec![0u8; header.len as usize];
    if header.len > 0 {
        reader.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FrameError::ConnectionClosed
            } else {
                FrameError::Io(e)
            }
        })?;
    }

    if header.compressed {
        payload = compression::decompress(&payload, config.max_payload_size as usize)?;
    }
    Ok(Message::new(payload))
}

/// Write a single frame to an async stream.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    compression: Compression,
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let frame = encode_frame(payload, compression, config)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
