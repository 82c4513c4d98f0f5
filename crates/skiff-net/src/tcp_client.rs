//! TCP stream transport.
//!
//! Connecting and writing happen on the tokio runtime; reading is polled from
//! the game thread. Each [`TcpTransportClient::read_message`] call performs at
//! most one non-blocking read into a bounded scratch buffer, feeds the bytes
//! into a [`FrameDecoder`], and returns at most one whole frame. The game loop
//! calls it until it returns `None`.
//!
//! ```text
//!  game thread                     runtime
//!  ───────────                     ───────
//!  connect() ───spawn──────────▶  connect task ──▶ on_connected / on_disconnect
//!  send()    ───mpsc frame─────▶  writer task  ──▶ socket
//!  read_message() ◀── try_read ── socket
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::bandwidth::NetworkCounters;
use crate::framing::{Compression, FrameConfig, FrameDecoder, encode_frame};
use crate::message::Message;
use crate::platform::{SocketConfig, configure_stream};
use crate::transport::{
    ConnectCallbacks, ConnectedSlot, ConnectionState, ConnectionStateWatch, DisconnectSlot,
    StreamTransport, TransportError, lock,
};

/// Size of the per-call read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

/// Configuration for [`TcpTransportClient`].
#[derive(Debug, Clone)]
pub struct TcpClientConfig {
    /// Framing limits and reassembly buffer sizing.
    pub frame: FrameConfig,
    /// Socket options applied after the handshake.
    pub socket: SocketConfig,
    /// Bytes read per [`TcpTransportClient::read_message`] call. Default: 16 KiB.
    pub read_buffer_size: usize,
    /// Give up on the handshake after this long. Default: 10 s.
    pub connect_timeout: Option<Duration>,
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            socket: SocketConfig::default(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Live halves of an established connection.
struct Link {
    reader: OwnedReadHalf,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
}

/// State shared between the client and the tasks of one connection attempt.
///
/// The state watch is only written while `link` is held, and the shutdown flag
/// is checked under the same lock, so a dispose cannot interleave with a state
/// change of its own session.
struct Session {
    link: Mutex<Option<Link>>,
    on_connected: ConnectedSlot,
    on_disconnect: DisconnectSlot,
    shutdown_tx: watch::Sender<bool>,
}

impl Session {
    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Drop the link and report `error` through the disconnect callback.
    /// Only the first failure of a live session is reported.
    fn fail(&self, state: &ConnectionStateWatch, error: TransportError) {
        {
            let mut link = lock(&self.link);
            if self.is_shut_down() || link.take().is_none() {
                return;
            }
            state.set(ConnectionState::Disconnected);
        }
        tracing::warn!("TCP connection lost: {error}");
        // An unreported connect is superseded by the failure.
        self.on_connected.disarm();
        self.on_disconnect.fire(error);
    }
}

/// Client end of a framed TCP connection.
pub struct TcpTransportClient {
    runtime: Handle,
    config: TcpClientConfig,
    state: Arc<ConnectionStateWatch>,
    counters: Arc<NetworkCounters>,
    session: Option<Arc<Session>>,
    decoder: FrameDecoder,
    scratch: Box<[u8]>,
    last_read: usize,
}

impl TcpTransportClient {
    /// Create an unconnected client whose I/O tasks run on `runtime`.
    pub fn new(runtime: Handle, config: TcpClientConfig) -> Self {
        Self {
            runtime,
            decoder: FrameDecoder::new(config.frame.clone()),
            scratch: vec![0u8; config.read_buffer_size.max(1)].into_boxed_slice(),
            config,
            state: Arc::new(ConnectionStateWatch::new()),
            counters: Arc::new(NetworkCounters::new()),
            session: None,
            last_read: 0,
        }
    }

    /// Return the connection state watch.
    pub fn state(&self) -> &Arc<ConnectionStateWatch> {
        &self.state
    }

    /// Traffic counters for this client.
    pub fn counters(&self) -> &Arc<NetworkCounters> {
        &self.counters
    }

    /// Size of the most recent read plus bytes buffered but not yet returned
    /// as a message. For progress display only.
    pub fn bytes_in_flight(&self) -> usize {
        self.last_read + self.decoder.buffered()
    }

    /// Start connecting to `host:port`.
    ///
    /// Returns immediately. Exactly one of the callbacks fires for the
    /// outcome. A previous connection, if any, is disposed first.
    pub fn connect(&mut self, host: &str, port: u16, callbacks: ConnectCallbacks) {
        self.dispose();

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let session = Arc::new(Session {
            link: Mutex::new(None),
            on_connected: ConnectedSlot::new(callbacks.on_connected),
            on_disconnect: DisconnectSlot::new(callbacks.on_disconnect),
            shutdown_tx,
        });
        self.session = Some(Arc::clone(&session));
        self.state.set(ConnectionState::Connecting);

        let state = Arc::clone(&self.state);
        let counters = Arc::clone(&self.counters);
        let config = self.config.clone();
        let host = host.to_owned();

        tracing::info!("Connecting to {host}:{port}");
        self.runtime.spawn(async move {
            let outcome = tokio::select! {
                result = open_stream(&host, port, &config) => result,
                _ = shutdown_rx.changed() => return,
            };

            match outcome {
                Ok(stream) => {
                    let (reader, writer) = stream.into_split();
                    let (outgoing, rx) = mpsc::unbounded_channel();
                    {
                        let mut link = lock(&session.link);
                        if session.is_shut_down() {
                            return;
                        }
                        *link = Some(Link { reader, outgoing });
                        state.set(ConnectionState::Connected);
                    }
                    tracing::info!("Connected to {host}:{port}");

                    // Disarmed by a dispose that won the race; then this is a no-op.
                    session.on_connected.fire();
                    tokio::spawn(write_loop(writer, rx, session, state, counters));
                }
                Err(error) => {
                    {
                        let _link = lock(&session.link);
                        if session.is_shut_down() {
                            return;
                        }
                        state.set(ConnectionState::Disconnected);
                    }
                    tracing::warn!("Connection to {host}:{port} failed: {error}");
                    session.on_connected.disarm();
                    session.on_disconnect.fire(error);
                }
            }
        });
    }

    /// Frame `bytes` and queue them for the writer task as one write.
    ///
    /// Outgoing frames are never compressed.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let session = self.session.as_ref().ok_or(TransportError::NotConnected)?;
        let frame = encode_frame(bytes, Compression::None, &self.config.frame)?;

        let link = lock(&session.link);
        let link = link.as_ref().ok_or(TransportError::NotConnected)?;
        link.outgoing
            .send(frame)
            .map_err(|_| TransportError::NotConnected)
    }

    /// Return the next complete message, if one is available.
    ///
    /// Performs at most one non-blocking read. Stream errors, peer close and
    /// protocol violations tear the connection down and are reported once
    /// through the disconnect callback; afterwards this returns `None`.
    pub fn read_message(&mut self) -> Option<Message> {
        let session = Arc::clone(self.session.as_ref()?);
        self.last_read = 0;

        let read = lock(&session.link)
            .as_ref()
            .map(|link| link.reader.try_read(&mut self.scratch));

        let mut peer_closed = false;
        match read {
            None => {}
            Some(Ok(0)) => peer_closed = true,
            Some(Ok(n)) => {
                self.last_read = n;
                self.counters.record_wire_receive(n as u64);
                self.decoder.push(&self.scratch[..n]);
            }
            Some(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Some(Err(e)) => {
                self.decoder.reset();
                session.fail(&self.state, TransportError::Io(e));
                return None;
            }
        }

        match self.decoder.next_message() {
            Ok(Some(message)) => {
                self.counters.record_message(message.len() as u64);
                Some(message)
            }
            Ok(None) => {
                if peer_closed {
                    self.decoder.reset();
                    session.fail(&self.state, TransportError::Closed);
                }
                None
            }
            Err(e) => {
                self.decoder.reset();
                session.fail(&self.state, TransportError::Frame(e));
                None
            }
        }
    }

    /// Close the connection without firing the disconnect callback.
    ///
    /// Frames already queued are still flushed by the writer task before the
    /// socket closes. Safe to call more than once.
    pub fn dispose(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.shutdown_tx.send_replace(true);
        session.on_connected.disarm();
        session.on_disconnect.disarm();
        {
            let mut link = lock(&session.link);
            link.take();
            self.state.set(ConnectionState::Disconnected);
        }
        self.decoder.reset();
        self.last_read = 0;
        tracing::debug!("TCP transport disposed");
    }
}

impl StreamTransport for TcpTransportClient {
    fn connect(&mut self, host: &str, port: u16, callbacks: ConnectCallbacks) {
        TcpTransportClient::connect(self, host, port, callbacks);
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        TcpTransportClient::send(self, bytes)
    }

    fn read_message(&mut self) -> Option<Message> {
        TcpTransportClient::read_message(self)
    }

    fn dispose(&mut self) {
        TcpTransportClient::dispose(self);
    }
}

impl Drop for TcpTransportClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn open_stream(
    host: &str,
    port: u16,
    config: &TcpClientConfig,
) -> Result<TcpStream, TransportError> {
    let connect = TcpStream::connect((host, port));
    let stream = match config.connect_timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| TransportError::ConnectTimeout(limit))??,
        None => connect.await?,
    };
    configure_stream(&stream, &config.socket)?;
    Ok(stream)
}

/// Write queued frames until the sender side is dropped or a write fails.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    session: Arc<Session>,
    state: Arc<ConnectionStateWatch>,
    counters: Arc<NetworkCounters>,
) {
    while let Some(frame) = outgoing.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            session.fail(&state, TransportError::Io(e));
            return;
        }
        counters.record_send(frame.len() as u64);
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{FrameHeader, read_frame};
    use std::net::SocketAddr;
    use std::sync::mpsc as std_mpsc;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[derive(Debug)]
    enum Outcome {
        Connected,
        Disconnected(TransportError),
    }

    fn callbacks() -> (ConnectCallbacks, std_mpsc::Receiver<Outcome>) {
        let (tx, rx) = std_mpsc::channel();
        let tx2 = tx.clone();
        let cb = ConnectCallbacks::new(
            move || {
                let _ = tx.send(Outcome::Connected);
            },
            move |e| {
                let _ = tx2.send(Outcome::Disconnected(e));
            },
        );
        (cb, rx)
    }

    async fn next_outcome(rx: &std_mpsc::Receiver<Outcome>) -> Outcome {
        for _ in 0..2000 {
            if let Ok(outcome) = rx.try_recv() {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("no connect outcome within 2s");
    }

    /// Poll `read_message` until a message arrives or 2 s pass.
    async fn poll_message(client: &mut TcpTransportClient) -> Option<Message> {
        for _ in 0..2000 {
            if let Some(msg) = client.read_message() {
                return Some(msg);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        None
    }

    async fn connected_pair() -> (
        TcpTransportClient,
        TcpStream,
        std_mpsc::Receiver<Outcome>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpTransportClient::new(Handle::current(), TcpClientConfig::default());
        let (cb, rx) = callbacks();
        client.connect("127.0.0.1", addr.port(), cb);

        let (server, _) = listener.accept().await.unwrap();
        assert!(matches!(next_outcome(&rx).await, Outcome::Connected));
        (client, server, rx)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_client_connects_to_server() {
        let (client, _server, _rx) = connected_pair().await;
        assert_eq!(client.state().current(), ConnectionState::Connected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_frame_split_across_reads_is_reassembled() {
        let (mut client, mut server, _rx) = connected_pair().await;
        let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 199) as u8).collect();
        let wire = encode_frame(&payload, Compression::None, &FrameConfig::default()).unwrap();

        for piece in wire.chunks(7_000) {
            server.write_all(piece).await.unwrap();
            server.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let msg = poll_message(&mut client).await.expect("frame should arrive");
        assert_eq!(msg.data(), &payload[..]);
        assert_eq!(client.read_message(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_back_to_back_frames_in_one_write() {
        let (mut client, mut server, _rx) = connected_pair().await;
        let config = FrameConfig::default();
        let mut wire = encode_frame(b"one", Compression::None, &config).unwrap();
        wire.extend(encode_frame(b"two", Compression::None, &config).unwrap());
        server.write_all(&wire).await.unwrap();

        let first = poll_message(&mut client).await.unwrap();
        let second = poll_message(&mut client).await.unwrap();
        assert_eq!(first.data(), b"one");
        assert_eq!(second.data(), b"two");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_compressed_frame_from_server() {
        let (mut client, mut server, _rx) = connected_pair().await;
        let payload = vec![3u8; 20_000];
        let wire = encode_frame(&payload, Compression::Lz4, &FrameConfig::default()).unwrap();
        server.write_all(&wire).await.unwrap();

        let msg = poll_message(&mut client).await.unwrap();
        assert_eq!(msg.len(), 20_000);
        assert_eq!(msg.data(), &payload[..]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_send_writes_uncompressed_frame() {
        let (mut client, mut server, _rx) = connected_pair().await;
        client.send(b"hello server").unwrap();
        client.send(&[]).unwrap();

        let mut prefix = [0u8; 4];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut prefix)
            .await
            .unwrap();
        let header = FrameHeader::decode(prefix);
        assert_eq!(header.len, 12);
        assert!(!header.compressed);

        let mut body = [0u8; 12];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut body)
            .await
            .unwrap();
        assert_eq!(&body, b"hello server");

        let empty = read_frame(&mut server, &FrameConfig::default()).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_connect_refused_reports_once() {
        let addr: SocketAddr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let mut client = TcpTransportClient::new(Handle::current(), TcpClientConfig::default());
        let (cb, rx) = callbacks();
        client.connect("127.0.0.1", addr.port(), cb);

        assert!(matches!(
            next_outcome(&rx).await,
            Outcome::Disconnected(TransportError::Io(_))
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "callbacks must fire exactly once");
        assert_eq!(client.state().current(), ConnectionState::Disconnected);
        assert!(matches!(client.send(b"x"), Err(TransportError::NotConnected)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_oversized_header_fails_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = TcpClientConfig {
            frame: FrameConfig {
                max_payload_size: 1024,
                ring_growth_step: 4096,
            },
            ..Default::default()
        };
        let mut client = TcpTransportClient::new(Handle::current(), config);
        let (cb, rx) = callbacks();
        client.connect("127.0.0.1", addr.port(), cb);
        let (mut server, _) = listener.accept().await.unwrap();
        assert!(matches!(next_outcome(&rx).await, Outcome::Connected));

        server.write_all(&0x0100_0000u32.to_le_bytes()).await.unwrap();

        assert!(poll_message(&mut client).await.is_none());
        assert!(matches!(
            next_outcome(&rx).await,
            Outcome::Disconnected(TransportError::Frame(_))
        ));
        assert_eq!(client.state().current(), ConnectionState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_peer_close_delivers_pending_frames_then_disconnects() {
        let (mut client, mut server, rx) = connected_pair().await;
        let wire = encode_frame(b"last words", Compression::None, &FrameConfig::default()).unwrap();
        server.write_all(&wire).await.unwrap();
        drop(server);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let msg = poll_message(&mut client).await.unwrap();
        assert_eq!(msg.data(), b"last words");
        assert!(poll_message(&mut client).await.is_none());
        assert!(matches!(
            next_outcome(&rx).await,
            Outcome::Disconnected(TransportError::Closed)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bytes_in_flight_tracks_partial_frame() {
        let (mut client, mut server, _rx) = connected_pair().await;
        let wire = encode_frame(&[1u8; 100], Compression::None, &FrameConfig::default()).unwrap();
        server.write_all(&wire[..50]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(client.read_message().is_none());
        assert_eq!(client.bytes_in_flight(), 50 + 50);
        assert!(client.read_message().is_none());
        assert_eq!(client.bytes_in_flight(), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispose_is_idempotent_and_silent() {
        let (mut client, mut server, rx) = connected_pair().await;
        client.dispose();
        client.dispose();

        assert_eq!(client.state().current(), ConnectionState::Disconnected);
        assert!(matches!(client.send(b"x"), Err(TransportError::NotConnected)));
        assert!(client.read_message().is_none());

        let mut buf = [0u8; 8];
        let n = tokio::io::AsyncReadExt::read(&mut server, &mut buf).await.unwrap();
        assert_eq!(n, 0, "server should see EOF after dispose");
        assert!(rx.try_recv().is_err(), "dispose must not fire callbacks");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispose_racing_connect_never_reports_late() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let late_calls = Arc::new(AtomicUsize::new(0));
        let mut client = TcpTransportClient::new(Handle::current(), TcpClientConfig::default());
        for attempt in 0..200u64 {
            let disposed = Arc::new(AtomicBool::new(false));
            let (flag, late) = (Arc::clone(&disposed), Arc::clone(&late_calls));
            let (flag2, late2) = (Arc::clone(&disposed), Arc::clone(&late_calls));
            client.connect(
                "127.0.0.1",
                port,
                ConnectCallbacks::new(
                    move || {
                        if flag.load(Ordering::SeqCst) {
                            late.fetch_add(1, Ordering::SeqCst);
                        }
                    },
                    move |_| {
                        if flag2.load(Ordering::SeqCst) {
                            late2.fetch_add(1, Ordering::SeqCst);
                        }
                    },
                ),
            );
            // Vary the gap so dispose lands on both sides of the handshake.
            tokio::time::sleep(Duration::from_micros(attempt * 10 % 700)).await;
            client.dispose();
            disposed.store(true, Ordering::SeqCst);
            assert_eq!(client.state().current(), ConnectionState::Disconnected);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.state().current(), ConnectionState::Disconnected);
        accept.abort();
    }
}
