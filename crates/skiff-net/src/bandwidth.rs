//! Traffic counters shared between a transport's I/O side and the game thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters incremented by the transports.
///
/// Uses atomics so the receive loop and writer task can bump counters without
/// locking.
#[derive(Debug, Default)]
pub struct NetworkCounters {
    /// Wire bytes sent (frame prefix included).
    pub bytes_sent: AtomicU64,
    /// Wire bytes received (post-compression).
    pub bytes_received: AtomicU64,
    /// Payload bytes received after decompression.
    pub bytes_received_raw: AtomicU64,
    /// Messages or packets sent.
    pub messages_sent: AtomicU64,
    /// Messages or packets delivered to the consumer side.
    pub messages_received: AtomicU64,
    /// Datagrams dropped because they failed to decode.
    pub datagrams_dropped: AtomicU64,
}

impl NetworkCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outgoing message.
    pub fn record_send(&self, wire_bytes: u64) {
        self.bytes_sent.fetch_add(wire_bytes, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record raw bytes arriving from the socket.
    pub fn record_wire_receive(&self, wire_bytes: u64) {
        self.bytes_received.fetch_add(wire_bytes, Ordering::Relaxed);
    }

    /// Record one decoded message of `raw_bytes` payload.
    pub fn record_message(&self, raw_bytes: u64) {
        self.bytes_received_raw
            .fetch_add(raw_bytes, Ordering::Relaxed);
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a datagram that was dropped during decoding.
    pub fn record_drop(&self) {
        self.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot and reset all counters (swap with 0).
    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_sent: self.bytes_sent.swap(0, Ordering::Relaxed),
            bytes_received: self.bytes_received.swap(0, Ordering::Relaxed),
            bytes_received_raw: self.bytes_received_raw.swap(0, Ordering::Relaxed),
            messages_sent: self.messages_sent.swap(0, Ordering::Relaxed),
            messages_received: self.messages_received.swap(0, Ordering::Relaxed),
            datagrams_dropped: self.datagrams_dropped.swap(0, Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of network counters for one measurement period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Wire bytes sent.
    pub bytes_sent: u64,
    /// Wire bytes received.
    pub bytes_received: u64,
    /// Payload bytes received after decompression.
    pub bytes_received_raw: u64,
    /// Messages sent.
    pub messages_sent: u64,
    /// Messages received.
    pub messages_received: u64,
    /// Datagrams dropped as malformed.
    pub datagrams_dropped: u64,
}

impl StatsSnapshot {
    /// Fraction of received payload bytes saved by compression, in `[0, 1)`.
    ///
    /// Zero when nothing was received or nothing was compressed.
    pub fn receive_compression_ratio(&self) -> f64 {
        if self.bytes_received_raw == 0 || self.bytes_received >= self.bytes_received_raw {
            0.0
        } else {
            1.0 - self.bytes_received as f64 / self.bytes_received_raw as f64
        }
    }

    /// Emit the snapshot at debug level.
    pub fn log(&self, transport: &str) {
        tracing::debug!(
            "{transport}: sent={} bytes ({} msgs), recv={} bytes ({} msgs), dropped={}, compression={:.1}%",
            self.bytes_sent,
            self.messages_sent,
            self.bytes_received,
            self.messages_received,
            self.datagrams_dropped,
            self.receive_compression_ratio() * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_track_bytes_sent() {
        let counters = NetworkCounters::new();
        counters.record_send(100);
        counters.record_send(200);

        let snapshot = counters.snapshot_and_reset();
        assert_eq!(snapshot.bytes_sent, 300);
        assert_eq!(snapshot.messages_sent, 2);
    }

    #[test]
    fn test_stats_track_bytes_received() {
        let counters = NetworkCounters::new();
        counters.record_wire_receive(500);
        counters.record_message(600);
        counters.record_message(400);

        let snapshot = counters.snapshot_and_reset();
        assert_eq!(snapshot.bytes_received, 500);
        assert_eq!(snapshot.bytes_received_raw, 1000);
        assert_eq!(snapshot.messages_received, 2);
    }

    #[test]
    fn test_snapshot_resets_counters() {
        let counters = NetworkCounters::new();
        counters.record_send(100);
        counters.record_drop();

        let snap1 = counters.snapshot_and_reset();
        assert_eq!(snap1.bytes_sent, 100);
        assert_eq!(snap1.datagrams_dropped, 1);

        let snap2 = counters.snapshot_and_reset();
        assert_eq!(snap2, StatsSnapshot::default(), "Counters should be zero after reset");
    }

    #[test]
    fn test_compression_ratio_calculation() {
        let snapshot = StatsSnapshot {
            bytes_received: 600,
            bytes_received_raw: 1000,
            ..Default::default()
        };
        assert!((snapshot.receive_compression_ratio() - 0.4).abs() < 0.001);
        assert_eq!(StatsSnapshot::default().receive_compression_ratio(), 0.0);
    }
}
