//! Client networking: TCP framing, UDP datagrams, and an in-process loopback
//! carrier, all behind one pair of transport traits.

pub mod bandwidth;
pub mod compression;
pub mod framing;
pub mod loopback;
pub mod message;
pub mod platform;
pub mod ring_buffer;
pub mod tcp_client;
pub mod transport;
pub mod udp_client;

pub use bandwidth::{NetworkCounters, StatsSnapshot};
pub use framing::{Compression, FrameConfig, FrameDecoder, FrameError, encode_frame};
pub use loopback::{LoopbackChannel, LoopbackDatagram, LoopbackStream};
pub use message::{CONNECTION_REQUEST_ID, Message, Packet, PacketError};
pub use platform::SocketConfig;
pub use ring_buffer::ByteRingBuffer;
pub use tcp_client::{TcpClientConfig, TcpTransportClient};
pub use transport::{
    ConnectCallbacks, ConnectionRequestHandler, ConnectionState, ConnectionStateWatch,
    DatagramClient, DatagramTransport, StreamClient, StreamTransport, TransportError,
};
pub use udp_client::{PacketInjector, UdpClientConfig, UdpTransportClient};
