//! UDP datagram transport.
//!
//! [`UdpTransportClient::connect`] binds a socket connected to the server and
//! spawns one receive loop on the runtime. The loop decodes each datagram:
//! connection requests go to the installed [`ConnectionRequestHandler`],
//! everything else lands in a lock-free queue that the game thread drains once
//! per tick with [`UdpTransportClient::read_message`]. That queue is the only
//! hand-off between the loop and the game thread.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::bandwidth::NetworkCounters;
use crate::message::{Packet, decode_packet, encode_packet};
use crate::platform::connected_udp_socket;
use crate::transport::{ConnectionRequestHandler, DatagramTransport, TransportError, lock};

/// Largest payload a UDP/IPv4 datagram can carry.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

type HandlerSlot = Arc<Mutex<Option<Arc<dyn ConnectionRequestHandler>>>>;

/// Configuration for [`UdpTransportClient`].
#[derive(Debug, Clone)]
pub struct UdpClientConfig {
    /// Receive buffer size; longer datagrams are truncated by the OS and then
    /// fail to decode. Default: [`MAX_UDP_PAYLOAD`].
    pub max_datagram_size: usize,
}

impl Default for UdpClientConfig {
    fn default() -> Self {
        Self {
            max_datagram_size: MAX_UDP_PAYLOAD,
        }
    }
}

/// Cloneable handle that pushes packets into a client's receive queue from
/// any thread.
#[derive(Debug, Clone)]
pub struct PacketInjector {
    tx: Sender<Packet>,
}

impl PacketInjector {
    /// Queue `packet` as if it had arrived over the wire.
    pub fn enqueue(&self, packet: Packet) {
        // The receiver lives as long as the client; a send after drop is moot.
        let _ = self.tx.send(packet);
    }
}

/// Client end of a UDP association.
pub struct UdpTransportClient {
    runtime: Handle,
    config: UdpClientConfig,
    inbox_tx: Sender<Packet>,
    inbox_rx: Receiver<Packet>,
    handler: HandlerSlot,
    counters: Arc<NetworkCounters>,
    socket: Option<Arc<UdpSocket>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl UdpTransportClient {
    /// Create an unbound client whose receive loop will run on `runtime`.
    pub fn new(runtime: Handle, config: UdpClientConfig) -> Self {
        let (inbox_tx, inbox_rx) = crossbeam_channel::unbounded();
        Self {
            runtime,
            config,
            inbox_tx,
            inbox_rx,
            handler: Arc::new(Mutex::new(None)),
            counters: Arc::new(NetworkCounters::new()),
            socket: None,
            shutdown_tx: None,
        }
    }

    /// Traffic counters for this client.
    pub fn counters(&self) -> &Arc<NetworkCounters> {
        &self.counters
    }

    /// Local address of the bound socket, if connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref()?.local_addr().ok()
    }

    /// A handle other producers use to inject packets into this client's queue.
    pub fn injector(&self) -> PacketInjector {
        PacketInjector {
            tx: self.inbox_tx.clone(),
        }
    }

    /// Install the connection-request handler. Takes effect immediately, also
    /// for a receive loop that is already running.
    pub fn set_connection_request_handler(&mut self, handler: Arc<dyn ConnectionRequestHandler>) {
        *lock(&self.handler) = Some(handler);
    }

    /// Bind a socket connected to `addr` and start the receive loop.
    ///
    /// A previous association, if any, is disposed first.
    pub fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        self.dispose();

        let std_socket = connected_udp_socket(addr)?;
        let socket = {
            let _guard = self.runtime.enter();
            Arc::new(UdpSocket::from_std(std_socket)?)
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(
            "UDP bound to {} for {addr}",
            socket
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".to_string())
        );

        self.runtime.spawn(receive_loop(
            Arc::clone(&socket),
            self.inbox_tx.clone(),
            Arc::clone(&self.handler),
            Arc::clone(&self.counters),
            shutdown_rx,
            self.config.max_datagram_size.max(1),
        ));

        self.socket = Some(socket);
        self.shutdown_tx = Some(shutdown_tx);
        Ok(())
    }

    /// Encode and submit one datagram. Failures are logged and dropped.
    pub fn send(&self, packet: &Packet) {
        let Some(socket) = self.socket.as_ref() else {
            tracing::debug!("UDP send of packet {} while not connected", packet.id);
            return;
        };
        let bytes = match encode_packet(packet) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!("UDP packet {} failed to encode: {e}", packet.id);
                return;
            }
        };
        match socket.try_send(&bytes) {
            Ok(n) => self.counters.record_send(n as u64),
            // Readiness not yet observed (fresh socket) or buffer full: hand the
            // datagram to the runtime, which waits for writability.
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                let socket = Arc::clone(socket);
                let counters = Arc::clone(&self.counters);
                let id = packet.id;
                self.runtime.spawn(async move {
                    match socket.send(&bytes).await {
                        Ok(n) => counters.record_send(n as u64),
                        Err(e) => tracing::debug!("UDP send of packet {id} dropped: {e}"),
                    }
                });
            }
            Err(e) => tracing::debug!("UDP send of packet {} dropped: {e}", packet.id),
        }
    }

    /// Drain every packet queued at the time of the call.
    ///
    /// Returns `None` when the queue is empty.
    pub fn read_message(&mut self) -> Option<Vec<Packet>> {
        let queued = self.inbox_rx.len();
        if queued == 0 {
            return None;
        }
        let packets: Vec<Packet> = (0..queued)
            .map_while(|_| self.inbox_rx.try_recv().ok())
            .collect();
        Some(packets)
    }

    /// Queue `packet` for the next [`read_message`](Self::read_message).
    pub fn enqueue_packet(&self, packet: Packet) {
        let _ = self.inbox_tx.send(packet);
    }

    /// Stop the receive loop and release the socket. Packets already queued
    /// stay readable. Safe to call more than once.
    pub fn dispose(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            shutdown_tx.send_replace(true);
            tracing::debug!("UDP transport disposed");
        }
        self.socket = None;
    }
}

impl DatagramTransport for UdpTransportClient {
    fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        UdpTransportClient::connect(self, addr)
    }

    fn send(&self, packet: &Packet) {
        UdpTransportClient::send(self, packet);
    }

    fn read_message(&mut self) -> Option<Vec<Packet>> {
        UdpTransportClient::read_message(self)
    }

    fn enqueue_packet(&self, packet: Packet) {
        UdpTransportClient::enqueue_packet(self, packet);
    }

    fn set_connection_request_handler(&mut self, handler: Arc<dyn ConnectionRequestHandler>) {
        UdpTransportClient::set_connection_request_handler(self, handler);
    }

    fn dispose(&mut self) {
        UdpTransportClient::dispose(self);
    }
}

impl Drop for UdpTransportClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    inbox: Sender<Packet>,
    handler: HandlerSlot,
    counters: Arc<NetworkCounters>,
    mut shutdown_rx: watch::Receiver<bool>,
    max_datagram_size: usize,
) {
    let mut buf = vec![0u8; max_datagram_size];
    loop {
        let received = tokio::select! {
            result = socket.recv(&mut buf) => result,
            _ = shutdown_rx.changed() => break,
        };
        match received {
            Ok(n) => {
                counters.record_wire_receive(n as u64);
                dispatch(&buf[..n], &inbox, &handler, &counters);
            }
            // ICMP errors (e.g. port unreachable) surface here on a connected socket.
            Err(e) => tracing::debug!("UDP receive error: {e}"),
        }
    }
    tracing::debug!("UDP receive loop stopped");
}

/// Route one datagram: control packets to the handler, data to the queue,
/// malformed ones to the floor.
fn dispatch(
    datagram: &[u8],
    inbox: &Sender<Packet>,
    handler: &HandlerSlot,
    counters: &NetworkCounters,
) {
    let packet = match decode_packet(datagram) {
        Ok(packet) => packet,
        Err(e) => {
            counters.record_drop();
            tracing::debug!("Dropping malformed datagram ({} bytes): {e}", datagram.len());
            return;
        }
    };

    if packet.is_connection_request() {
        let handler = lock(handler).clone();
        match handler {
            Some(handler) => handler.on_connection_request(packet),
            None => tracing::debug!("Connection request with no handler installed"),
        }
    } else {
        // Only datagrams that crossed the wire count; injected packets do not.
        counters.record_message(packet.payload.len() as u64);
        let _ = inbox.send(packet);
    }
}
