//! Embedded singleplayer server.
//!
//! In singleplayer the client hosts a minimal server on its own thread, wired
//! to the client through a [`LoopbackChannel`]. The server echoes stream
//! messages and state packets and answers connection requests with a welcome
//! packet. Stopping it clears the channel so it can be reused.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use skiff_net::{
    DatagramTransport, LoopbackChannel, LoopbackDatagram, LoopbackStream, Packet,
    StreamTransport,
};

use crate::session::WELCOME_PACKET_ID;
use crate::tick_loop::TickLoop;

/// What the server did over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
    /// Stream messages echoed back.
    pub messages_echoed: u64,
    /// Datagram packets echoed back.
    pub packets_echoed: u64,
    /// Connection requests answered.
    pub connection_requests: u64,
}

/// Handle to the server thread.
pub struct EmbeddedServer {
    channel: Arc<LoopbackChannel>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<ServerStats>>,
}

impl EmbeddedServer {
    /// Spawn the server thread, ticking every `tick`.
    pub fn start(channel: Arc<LoopbackChannel>, tick: Duration) -> std::io::Result<Self> {
        let stream = channel.server_stream();
        let datagram = channel.server_datagram();
        let running = Arc::new(AtomicBool::new(true));

        let thread = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("singleplayer-server".to_string())
                .spawn(move || serve(stream, datagram, &running, tick))?
        };
        tracing::info!("Singleplayer server started");

        Ok(Self {
            channel,
            running,
            thread: Some(thread),
        })
    }

    /// Stop the thread, clear the channel, and return the server's totals.
    pub fn stop(mut self) -> ServerStats {
        self.shutdown()
    }

    fn shutdown(&mut self) -> ServerStats {
        self.running.store(false, Ordering::SeqCst);
        let stats = match self.thread.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                tracing::error!("Singleplayer server thread panicked");
                ServerStats::default()
            }
            None => ServerStats::default(),
        };
        self.channel.clear();
        tracing::info!(
            "Singleplayer server stopped: {} messages, {} packets, {} connection requests",
            stats.messages_echoed,
            stats.packets_echoed,
            stats.connection_requests
        );
        stats
    }
}

impl Drop for EmbeddedServer {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}

fn serve(
    mut stream: LoopbackStream,
    mut datagram: LoopbackDatagram,
    running: &AtomicBool,
    tick: Duration,
) -> ServerStats {
    let pending_requests = Arc::new(AtomicU64::new(0));
    let requests = Arc::clone(&pending_requests);
    datagram.set_connection_request_handler(Arc::new(move |_: Packet| {
        requests.fetch_add(1, Ordering::Relaxed);
    }));

    let mut stats = ServerStats::default();
    let mut tick_loop = TickLoop::new(tick);
    while running.load(Ordering::SeqCst) {
        tick_loop.tick(|_| server_tick(&mut stream, &mut datagram, &pending_requests, &mut stats));
        tick_loop.wait_for_next_tick();
    }

    stream.dispose();
    datagram.dispose();
    stats
}

fn server_tick(
    stream: &mut LoopbackStream,
    datagram: &mut LoopbackDatagram,
    pending_requests: &AtomicU64,
    stats: &mut ServerStats,
) {
    while let Some(message) = stream.read_message() {
        if stream.send(message.data()).is_ok() {
            stats.messages_echoed += 1;
        }
    }

    if let Some(packets) = datagram.read_message() {
        for packet in packets {
            datagram.send(&packet);
            stats.packets_echoed += 1;
        }
    }

    // Requests were counted by the handler during the drain above.
    for _ in 0..pending_requests.swap(0, Ordering::Relaxed) {
        datagram.send(&Packet::new(WELCOME_PACKET_ID, b"welcome".to_vec()));
        stats.connection_requests += 1;
    }
}
