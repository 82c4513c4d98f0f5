//! One client session over the configured carrier.
//!
//! The session owns a stream carrier, a datagram carrier, or both (loopback),
//! and is driven from the main thread: [`ClientSession::tick`] drains every
//! carrier until empty and then sends this tick's traffic.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use skiff_config::NetworkConfig;
use skiff_net::{
    CONNECTION_REQUEST_ID, ConnectCallbacks, DatagramClient, DatagramTransport, FrameConfig,
    LoopbackChannel, Packet, SocketConfig, StreamClient, StreamTransport, TcpClientConfig,
    TcpTransportClient, TransportError, UdpClientConfig, UdpTransportClient,
};
use tokio::runtime::Handle;

/// Packet id for per-tick state.
pub const STATE_PACKET_ID: u32 = 2;

/// Packet id the server answers a connection request with.
pub const WELCOME_PACKET_ID: u32 = 3;

/// Errors that abort a session before it starts.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The server address did not resolve.
    #[error("could not resolve {host}:{port}: {reason}")]
    Resolve {
        /// Host as configured.
        host: String,
        /// Port as configured.
        port: u16,
        /// Resolver failure.
        reason: String,
    },

    /// A carrier failed to start.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Connection outcome reported by the stream carrier's callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The stream is up.
    Connected,
    /// The stream failed or was closed by the peer.
    Disconnected(String),
}

/// Map the network config onto the TCP client's settings.
pub fn tcp_client_config(config: &NetworkConfig) -> TcpClientConfig {
    let socket = SocketConfig {
        tcp_nodelay: config.tcp_nodelay,
        keepalive_enabled: config.keepalive().is_some(),
        keepalive_idle: config.keepalive().unwrap_or(Duration::from_secs(60)),
        ..SocketConfig::default()
    };
    TcpClientConfig {
        frame: FrameConfig {
            max_payload_size: config.max_frame_size,
            ring_growth_step: config.ring_growth_step,
        },
        socket,
        read_buffer_size: config.read_buffer_size,
        connect_timeout: config.connect_timeout(),
    }
}

/// Map the network config onto the UDP client's settings.
pub fn udp_client_config(config: &NetworkConfig) -> UdpClientConfig {
    UdpClientConfig {
        max_datagram_size: config.max_datagram_size,
    }
}

/// A running client session.
pub struct ClientSession {
    stream: Option<StreamClient>,
    datagram: Option<DatagramClient>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    connection_requests: Arc<AtomicU64>,
    connected: bool,
    finished: bool,
    messages_received: u64,
    packets_received: u64,
}

impl ClientSession {
    /// Session over a remote server, using TCP or UDP as configured.
    /// `Loopback` in the config is treated as TCP; use [`Self::loopback`].
    pub fn remote(config: &NetworkConfig, runtime: Handle) -> Self {
        use skiff_config::TransportKind;
        match config.transport {
            TransportKind::Udp => Self::with_carriers(
                None,
                Some(DatagramClient::Udp(UdpTransportClient::new(
                    runtime,
                    udp_client_config(config),
                ))),
            ),
            TransportKind::Tcp | TransportKind::Loopback => Self::with_carriers(
                Some(StreamClient::Tcp(TcpTransportClient::new(
                    runtime,
                    tcp_client_config(config),
                ))),
                None,
            ),
        }
    }

    /// Session over an in-process channel to an embedded server.
    pub fn loopback(channel: &Arc<LoopbackChannel>) -> Self {
        Self::with_carriers(
            Some(StreamClient::Loopback(channel.client_stream())),
            Some(DatagramClient::Loopback(channel.client_datagram())),
        )
    }

    fn with_carriers(stream: Option<StreamClient>, datagram: Option<DatagramClient>) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            stream,
            datagram,
            events_tx,
            events_rx,
            connection_requests: Arc::new(AtomicU64::new(0)),
            connected: false,
            finished: false,
            messages_received: 0,
            packets_received: 0,
        }
    }

    /// Start every carrier.
    ///
    /// The stream carrier reports its outcome asynchronously; a datagram-only
    /// session counts as connected as soon as its socket is bound.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), SessionError> {
        if let Some(stream) = self.stream.as_mut() {
            let connected = self.events_tx.clone();
            let lost = self.events_tx.clone();
            stream.connect(
                host,
                port,
                ConnectCallbacks::new(
                    move || {
                        let _ = connected.send(SessionEvent::Connected);
                    },
                    move |e| {
                        let _ = lost.send(SessionEvent::Disconnected(e.to_string()));
                    },
                ),
            );
        }

        if let Some(datagram) = self.datagram.as_mut() {
            let addr = match datagram {
                DatagramClient::Udp(_) => resolve(host, port)?,
                DatagramClient::Loopback(_) => SocketAddr::from(([127, 0, 0, 1], port)),
            };
            let requests = Arc::clone(&self.connection_requests);
            datagram.set_connection_request_handler(Arc::new(move |_: Packet| {
                requests.fetch_add(1, Ordering::Relaxed);
            }));
            datagram.connect(addr)?;
            datagram.send(&Packet::new(CONNECTION_REQUEST_ID, Vec::new()));

            if self.stream.is_none() {
                let _ = self.events_tx.send(SessionEvent::Connected);
            }
        }
        Ok(())
    }

    /// Run one client tick: drain all carriers, then send this tick's traffic.
    pub fn tick(&mut self, tick: u64) {
        self.drain_events();
        if self.finished {
            return;
        }

        if let Some(stream) = self.stream.as_mut() {
            while let Some(message) = stream.read_message() {
                tracing::trace!("Tick {tick}: message of {} bytes", message.len());
                self.messages_received += 1;
            }
        }
        if let Some(datagram) = self.datagram.as_mut()
            && let Some(packets) = datagram.read_message()
        {
            self.packets_received += packets.len() as u64;
        }

        // Failures surfaced while draining land in the event queue.
        self.drain_events();
        if !self.connected || self.finished {
            return;
        }

        let payload = tick.to_le_bytes();
        if let Some(stream) = self.stream.as_mut()
            && let Err(e) = stream.send(&payload)
        {
            tracing::warn!("Tick {tick}: stream send failed: {e}");
            self.finished = true;
            return;
        }
        if let Some(datagram) = self.datagram.as_ref() {
            datagram.send(&Packet::new(STATE_PACKET_ID, payload.to_vec()));
        }
    }

    fn drain_events(&mut self) {
        for event in self.events_rx.try_iter() {
            match event {
                SessionEvent::Connected => {
                    tracing::info!("Session connected");
                    self.connected = true;
                }
                SessionEvent::Disconnected(reason) => {
                    tracing::warn!("Session ended: {reason}");
                    self.connected = false;
                    self.finished = true;
                }
            }
        }
    }

    /// Log and reset the traffic counters of the socket carriers.
    pub fn log_stats(&self) {
        if let Some(StreamClient::Tcp(tcp)) = &self.stream {
            tcp.counters().snapshot_and_reset().log("tcp");
        }
        if let Some(DatagramClient::Udp(udp)) = &self.datagram {
            udp.counters().snapshot_and_reset().log("udp");
        }
    }

    /// True once the stream carrier has reported success.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// True once the session has failed or been shut down.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Stream messages received so far.
    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    /// Data packets received so far.
    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    /// Connection-request packets the server has sent us.
    pub fn connection_requests(&self) -> u64 {
        self.connection_requests.load(Ordering::Relaxed)
    }

    /// Dispose every carrier. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.dispose();
        }
        if let Some(datagram) = self.datagram.as_mut() {
            datagram.dispose();
        }
        self.connected = false;
        self.finished = true;
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, SessionError> {
    let resolve_error = |reason: String| SessionError::Resolve {
        host: host.to_string(),
        port,
        reason,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(|e| resolve_error(e.to_string()))?
        .next()
        .ok_or_else(|| resolve_error("no addresses".to_string()))
}
