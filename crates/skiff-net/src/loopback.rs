//! In-process transport for singleplayer sessions.
//!
//! When the client hosts its own server, both ends live in one process and the
//! socket is replaced by a [`LoopbackChannel`]: four queues (messages and
//! packets in each direction), each behind its own lock. The client and server
//! each get adapters that implement the same transport traits as the real
//! carriers, so nothing above this layer can tell the difference.
//!
//! Messages cross unframed and packets cross unencoded; there is no loss and
//! no reordering.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crate::message::{Message, Packet};
use crate::transport::{
    ConnectCallbacks, ConnectionRequestHandler, DatagramTransport, StreamTransport,
    TransportError, lock,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Client,
    Server,
}

/// Queues shared by one client/server adapter pair.
#[derive(Debug, Default)]
pub struct LoopbackChannel {
    to_server: Mutex<VecDeque<Message>>,
    to_client: Mutex<VecDeque<Message>>,
    packets_to_server: Mutex<VecDeque<Packet>>,
    packets_to_client: Mutex<VecDeque<Packet>>,
}

impl LoopbackChannel {
    /// Create an empty channel.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stream adapter for the client end.
    pub fn client_stream(self: &Arc<Self>) -> LoopbackStream {
        LoopbackStream::new(Arc::clone(self), Side::Client)
    }

    /// Stream adapter for the server end.
    pub fn server_stream(self: &Arc<Self>) -> LoopbackStream {
        LoopbackStream::new(Arc::clone(self), Side::Server)
    }

    /// Datagram adapter for the client end.
    pub fn client_datagram(self: &Arc<Self>) -> LoopbackDatagram {
        LoopbackDatagram::new(Arc::clone(self), Side::Client)
    }

    /// Datagram adapter for the server end.
    pub fn server_datagram(self: &Arc<Self>) -> LoopbackDatagram {
        LoopbackDatagram::new(Arc::clone(self), Side::Server)
    }

    /// Empty all four queues. Call at session end, before reuse.
    pub fn clear(&self) {
        lock(&self.to_server).clear();
        lock(&self.to_client).clear();
        lock(&self.packets_to_server).clear();
        lock(&self.packets_to_client).clear();
        tracing::debug!("Loopback channel cleared");
    }

    /// True when nothing is queued in either direction.
    pub fn is_empty(&self) -> bool {
        lock(&self.to_server).is_empty()
            && lock(&self.to_client).is_empty()
            && lock(&self.packets_to_server).is_empty()
            && lock(&self.packets_to_client).is_empty()
    }

    fn inbound_messages(&self, side: Side) -> &Mutex<VecDeque<Message>> {
        match side {
            Side::Client => &self.to_client,
            Side::Server => &self.to_server,
        }
    }

    fn outbound_messages(&self, side: Side) -> &Mutex<VecDeque<Message>> {
        match side {
            Side::Client => &self.to_server,
            Side::Server => &self.to_client,
        }
    }

    fn inbound_packets(&self, side: Side) -> &Mutex<VecDeque<Packet>> {
        match side {
            Side::Client => &self.packets_to_client,
            Side::Server => &self.packets_to_server,
        }
    }

    fn outbound_packets(&self, side: Side) -> &Mutex<VecDeque<Packet>> {
        match side {
            Side::Client => &self.packets_to_server,
            Side::Server => &self.packets_to_client,
        }
    }
}

/// Reliable ordered adapter over a [`LoopbackChannel`].
#[derive(Debug)]
pub struct LoopbackStream {
    channel: Arc<LoopbackChannel>,
    side: Side,
    disposed: bool,
}

impl LoopbackStream {
    fn new(channel: Arc<LoopbackChannel>, side: Side) -> Self {
        Self {
            channel,
            side,
            disposed: false,
        }
    }

    /// The shared channel this adapter is attached to.
    pub fn channel(&self) -> &Arc<LoopbackChannel> {
        &self.channel
    }
}

impl StreamTransport for LoopbackStream {
    /// The channel is always "up": `on_connected` runs synchronously.
    fn connect(&mut self, host: &str, port: u16, callbacks: ConnectCallbacks) {
        tracing::debug!("Loopback stream connect ({host}:{port} ignored)");
        self.disposed = false;
        (callbacks.on_connected)();
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.disposed {
            return Err(TransportError::NotConnected);
        }
        lock(self.channel.outbound_messages(self.side)).push_back(Message::new(bytes.to_vec()));
        Ok(())
    }

    fn read_message(&mut self) -> Option<Message> {
        if self.disposed {
            return None;
        }
        lock(self.channel.inbound_messages(self.side)).pop_front()
    }

    fn dispose(&mut self) {
        self.disposed = true;
    }
}

/// Datagram adapter over a [`LoopbackChannel`].
pub struct LoopbackDatagram {
    channel: Arc<LoopbackChannel>,
    side: Side,
    handler: Option<Arc<dyn ConnectionRequestHandler>>,
    disposed: bool,
}

impl LoopbackDatagram {
    fn new(channel: Arc<LoopbackChannel>, side: Side) -> Self {
        Self {
            channel,
            side,
            handler: None,
            disposed: false,
        }
    }

    /// The shared channel this adapter is attached to.
    pub fn channel(&self) -> &Arc<LoopbackChannel> {
        &self.channel
    }
}

impl DatagramTransport for LoopbackDatagram {
    fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        tracing::debug!("Loopback datagram connect ({addr} ignored)");
        self.disposed = false;
        Ok(())
    }

    fn send(&self, packet: &Packet) {
        if self.disposed {
            tracing::debug!("Loopback send of packet {} after dispose", packet.id);
            return;
        }
        // Stamp the size the packet would have had as a UDP datagram.
        let mut packet = packet.clone();
        packet.len = packet.wire_len();
        lock(self.channel.outbound_packets(self.side)).push_back(packet);
    }

    /// Drain the inbound queue. Connection requests go to the handler and are
    /// not returned.
    fn read_message(&mut self) -> Option<Vec<Packet>> {
        if self.disposed {
            return None;
        }
        let drained: Vec<Packet> = lock(self.channel.inbound_packets(self.side))
            .drain(..)
            .collect();

        let mut data = Vec::with_capacity(drained.len());
        for packet in drained {
            if !packet.is_connection_request() {
                data.push(packet);
                continue;
            }
            match &self.handler {
                Some(handler) => handler.on_connection_request(packet),
                None => tracing::debug!("Connection request with no handler installed"),
            }
        }

        if data.is_empty() { None } else { Some(data) }
    }

    fn enqueue_packet(&self, packet: Packet) {
        lock(self.channel.inbound_packets(self.side)).push_back(packet);
    }

    fn set_connection_request_handler(&mut self, handler: Arc<dyn ConnectionRequestHandler>) {
        self.handler = Some(handler);
    }

    fn dispose(&mut self) {
        self.disposed = true;
    }
}
