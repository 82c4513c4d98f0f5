//! Units handed to and from the layers above the transport.
//!
//! [`Message`] is what the stream transports yield: one whole, decompressed
//! frame payload. [`Packet`] is the datagram envelope: serialized with
//! [`postcard`] and prefixed with a version byte.

use serde::{Deserialize, Serialize};

/// Current datagram envelope version. Prepended to every encoded packet.
pub const PACKET_VERSION: u8 = 1;

/// Packet id reserved for "connection request" control packets.
pub const CONNECTION_REQUEST_ID: u32 = 1;

/// One reassembled payload from a stream transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    data: Vec<u8>,
}

impl Message {
    /// Wrap payload bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Payload length in bytes (after decompression).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take ownership of the payload.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// Datagram envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Packet {
    /// Packet type id. [`CONNECTION_REQUEST_ID`] is reserved.
    pub id: u32,
    /// Opaque application payload.
    pub payload: Vec<u8>,
    /// Size of the datagram this packet arrived in. Stamped by the receiver,
    /// never serialized.
    #[serde(skip)]
    pub len: usize,
}

impl Packet {
    /// Build an outgoing packet.
    pub fn new(id: u32, payload: Vec<u8>) -> Self {
        Self {
            id,
            payload,
            len: 0,
        }
    }

    /// Whether this is a transport-level connection request.
    pub fn is_connection_request(&self) -> bool {
        self.id == CONNECTION_REQUEST_ID
    }

    /// Size of this packet once encoded with [`encode_packet`], or 0 if it
    /// cannot be encoded.
    pub fn wire_len(&self) -> usize {
        encode_packet(self).map_or(0, |bytes| bytes.len())
    }
}

/// Errors that can occur while decoding a datagram.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// The datagram was empty (no version byte).
    #[error("empty datagram, no version byte")]
    Empty,

    /// The version byte does not match [`PACKET_VERSION`].
    #[error("unsupported packet version: {0}")]
    UnsupportedVersion(u8),

    /// Postcard encoding or decoding failed.
    #[error("packet codec error: {0}")]
    Codec(#[from] postcard::Error),
}

/// Serialize a packet into `[version][postcard body]`.
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, PacketError> {
    let body = postcard::to_allocvec(packet)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PACKET_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode one datagram. The returned packet's `len` is the datagram size.
pub fn decode_packet(datagram: &[u8]) -> Result<Packet, PacketError> {
    let (&version, body) = datagram.split_first().ok_or(PacketError::Empty)?;
    if version != PACKET_VERSION {
        return Err(PacketError::UnsupportedVersion(version));
    }
    let mut packet: Packet = postcard::from_bytes(body)?;
    packet.len = datagram.len();
    Ok(packet)
}
