//! The client-facing contract every carrier implements.
//!
//! Upper layers talk to a [`StreamTransport`] (TCP or loopback) and a
//! [`DatagramTransport`] (UDP or loopback) and never learn which carrier is
//! underneath. [`StreamClient`] and [`DatagramClient`] are the tagged
//! variants the game holds onto.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use crate::framing::FrameError;
use crate::loopback::{LoopbackDatagram, LoopbackStream};
use crate::message::{Message, Packet, PacketError};
use crate::tcp_client::TcpTransportClient;
use crate::udp_client::UdpTransportClient;

/// Errors surfaced by the transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No connection is established (never connected, failed, or disposed).
    #[error("not connected")]
    NotConnected,

    /// The TCP handshake did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// The stream violated the framing protocol.
    #[error("protocol violation: {0}")]
    Frame(#[from] FrameError),

    /// A datagram could not be encoded.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting to establish a connection.
    Connecting,
    /// Connection established, ready for communication.
    Connected,
    /// Connection lost, failed, or intentionally closed.
    Disconnected,
}

/// Observable connection state backed by a [`watch`] channel.
///
/// UI code can subscribe to transitions instead of polling the transport.
#[derive(Debug)]
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    /// Set the current state, notifying subscribers only on change.
    pub fn set(&self, state: ConnectionState) {
        self.tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

type ConnectedFn = Box<dyn FnOnce() + Send>;
type DisconnectFn = Box<dyn FnOnce(TransportError) + Send>;

/// Outcome callbacks handed to [`StreamTransport::connect`].
///
/// At most one of the two fires for the connect outcome. `on_disconnect` also
/// covers a later stream failure, and fires at most once per connection.
/// Neither fires after [`StreamTransport::dispose`].
pub struct ConnectCallbacks {
    pub(crate) on_connected: ConnectedFn,
    pub(crate) on_disconnect: DisconnectFn,
}

impl ConnectCallbacks {
    /// Build callbacks from two closures.
    pub fn new(
        on_connected: impl FnOnce() + Send + 'static,
        on_disconnect: impl FnOnce(TransportError) + Send + 'static,
    ) -> Self {
        Self {
            on_connected: Box::new(on_connected),
            on_disconnect: Box::new(on_disconnect),
        }
    }

    /// Callbacks that do nothing; the state watch still reports the outcome.
    pub fn noop() -> Self {
        Self::new(|| {}, |_| {})
    }
}

/// Single-shot holder for one outcome callback.
///
/// The slot stays locked while the callback runs, so [`disarm`](Self::disarm)
/// returns only once an in-flight callback has finished. Callbacks must not
/// block on the thread that disarms them.
pub(crate) struct CallbackSlot<F>(Mutex<Option<F>>);

pub(crate) type ConnectedSlot = CallbackSlot<ConnectedFn>;
pub(crate) type DisconnectSlot = CallbackSlot<DisconnectFn>;

impl<F> CallbackSlot<F> {
    pub(crate) fn new(callback: F) -> Self {
        Self(Mutex::new(Some(callback)))
    }

    /// Hand the callback to `invoke` if it has not fired or been disarmed yet.
    fn fire_with(&self, invoke: impl FnOnce(F)) {
        let mut slot = lock(&self.0);
        if let Some(callback) = slot.take() {
            invoke(callback);
        }
    }

    /// Drop the callback without invoking it.
    pub(crate) fn disarm(&self) {
        lock(&self.0).take();
    }
}

impl ConnectedSlot {
    pub(crate) fn fire(&self) {
        self.fire_with(|callback| callback());
    }
}

impl DisconnectSlot {
    pub(crate) fn fire(&self, error: TransportError) {
        self.fire_with(|callback| callback(error));
    }
}

/// Receives datagrams whose id marks them as connection requests.
pub trait ConnectionRequestHandler: Send + Sync {
    /// Handle one connection request.
    fn on_connection_request(&self, packet: Packet);
}

/// Blanket implementation for closures.
impl<F> ConnectionRequestHandler for F
where
    F: Fn(Packet) + Send + Sync,
{
    fn on_connection_request(&self, packet: Packet) {
        self(packet);
    }
}

/// Lock a mutex, recovering the data if a holder panicked.
///
/// Every mutex in this crate guards plain queues or slots whose contents stay
/// valid across a panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Reliable, ordered message transport.
pub trait StreamTransport {
    /// Start connecting. The outcome is reported through `callbacks`.
    fn connect(&mut self, host: &str, port: u16, callbacks: ConnectCallbacks);

    /// Send one message.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Return the next complete message, if any. Call until `None` each tick.
    fn read_message(&mut self) -> Option<Message>;

    /// Tear down the connection. Safe to call more than once.
    fn dispose(&mut self);
}

/// Unreliable, unordered packet transport.
pub trait DatagramTransport {
    /// Bind and start receiving from `addr`.
    fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError>;

    /// Send one packet, fire-and-forget.
    fn send(&self, packet: &Packet);

    /// Drain every data packet received since the last call.
    fn read_message(&mut self) -> Option<Vec<Packet>>;

    /// Inject a packet into the consumer-facing queue as if it had arrived.
    fn enqueue_packet(&self, packet: Packet);

    /// Install the handler for connection-request packets.
    fn set_connection_request_handler(&mut self, handler: Arc<dyn ConnectionRequestHandler>);

    /// Stop receiving and release the socket. Safe to call more than once.
    fn dispose(&mut self);
}

// ---------------------------------------------------------------------------
// Tagged variants
// ---------------------------------------------------------------------------

/// Stream carrier selected at session start.
pub enum StreamClient {
    /// Real TCP connection.
    Tcp(TcpTransportClient),
    /// In-process channel to an embedded server.
    Loopback(LoopbackStream),
}

impl StreamTransport for StreamClient {
    fn connect(&mut self, host: &str, port: u16, callbacks: ConnectCallbacks) {
        match self {
            Self::Tcp(t) => t.connect(host, port, callbacks),
            Self::Loopback(t) => t.connect(host, port, callbacks),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        match self {
            Self::Tcp(t) => t.send(bytes),
            Self::Loopback(t) => t.send(bytes),
        }
    }

    fn read_message(&mut self) -> Option<Message> {
        match self {
            Self::Tcp(t) => t.read_message(),
            Self::Loopback(t) => t.read_message(),
        }
    }

    fn dispose(&mut self) {
        match self {
            Self::Tcp(t) => t.dispose(),
            Self::Loopback(t) => t.dispose(),
        }
    }
}

/// Datagram carrier selected at session start.
pub enum DatagramClient {
    /// Real UDP socket.
    Udp(UdpTransportClient),
    /// In-process channel to an embedded server.
    Loopback(LoopbackDatagram),
}

impl DatagramTransport for DatagramClient {
    fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        match self {
            Self::Udp(t) => t.connect(addr),
            Self::Loopback(t) => t.connect(addr),
        }
    }

    fn send(&self, packet: &Packet) {
        match self {
            Self::Udp(t) => t.send(packet),
            Self::Loopback(t) => t.send(packet),
        }
    }

    fn read_message(&mut self) -> Option<Vec<Packet>> {
        match self {
            Self::Udp(t) => t.read_message(),
            Self::Loopback(t) => t.read_message(),
        }
    }

    fn enqueue_packet(&self, packet: Packet) {
        match self {
            Self::Udp(t) => t.enqueue_packet(packet),
            Self::Loopback(t) => t.enqueue_packet(packet),
        }
    }

    fn set_connection_request_handler(&mut self, handler: Arc<dyn ConnectionRequestHandler>) {
        match self {
            Self::Udp(t) => t.set_connection_request_handler(handler),
            Self::Loopback(t) => t.set_connection_request_handler(handler),
        }
    }

    fn dispose(&mut self) {
        match self {
            Self::Udp(t) => t.dispose(),
            Self::Loopback(t) => t.dispose(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_connection_state_starts_disconnected() {
        let watch = ConnectionStateWatch::new();
        assert_eq!(watch.current(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connection_state_transitions() {
        let watch = ConnectionStateWatch::new();
        watch.set(ConnectionState::Connecting);
        assert_eq!(watch.current(), ConnectionState::Connecting);
        watch.set(ConnectionState::Connected);
        assert_eq!(watch.current(), ConnectionState::Connected);
        watch.set(ConnectionState::Disconnected);
        assert_eq!(watch.current(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_state_watch_subscriber_receives_updates() {
        let watch = ConnectionStateWatch::new();
        let mut rx = watch.subscribe();
        watch.set(ConnectionState::Connected);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connected);
    }

    #[test]
    fn test_disconnect_slot_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let slot = DisconnectSlot::new(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        slot.fire(TransportError::Closed);
        slot.fire(TransportError::Closed);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disarmed_slot_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let slot = DisconnectSlot::new(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        slot.disarm();
        slot.fire(TransportError::Closed);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disarm_waits_for_running_callback() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let finished = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&finished);
        let slot = Arc::new(ConnectedSlot::new(Box::new(move || {
            let _ = entered_tx.send(());
            std::thread::sleep(Duration::from_millis(50));
            done.fetch_add(1, Ordering::SeqCst);
        })));

        let firing = Arc::clone(&slot);
        let worker = std::thread::spawn(move || firing.fire());
        entered_rx.recv().unwrap();
        slot.disarm();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        worker.join().unwrap();
    }

    #[test]
    fn test_closure_is_a_connection_request_handler() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let handler: Arc<dyn ConnectionRequestHandler> = Arc::new(move |packet: Packet| {
            counter.fetch_add(packet.id as usize, Ordering::SeqCst);
        });
        handler.on_connection_request(Packet::new(1, Vec::new()));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
