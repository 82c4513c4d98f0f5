//! Fixed-rate tick loop.
//!
//! Network polling runs at a fixed rate regardless of how long each pass over
//! the loop takes. Elapsed wall time feeds an accumulator; every whole tick
//! in it runs the update callback once.

use std::time::{Duration, Instant};

use tracing::warn;

/// Most wall time credited to a single pass, so a long stall does not turn
/// into a burst of catch-up ticks.
pub const MAX_FRAME_TIME: Duration = Duration::from_millis(250);

/// Fixed-rate tick scheduler.
pub struct TickLoop {
    tick: Duration,
    previous_time: Instant,
    accumulator: Duration,
    tick_count: u64,
}

impl TickLoop {
    /// Create a loop ticking every `tick`, starting now.
    pub fn new(tick: Duration) -> Self {
        Self {
            tick: tick.max(Duration::from_micros(1)),
            previous_time: Instant::now(),
            accumulator: Duration::ZERO,
            tick_count: 0,
        }
    }

    /// Measure elapsed time and run any ticks that are due.
    ///
    /// `update_fn(tick_index)` is called zero or more times. Returns the number
    /// of ticks run.
    pub fn tick(&mut self, update_fn: impl FnMut(u64)) -> u32 {
        let now = Instant::now();
        let frame_time = now.duration_since(self.previous_time);
        self.previous_time = now;
        self.advance(frame_time, update_fn)
    }

    /// Credit `frame_time` to the accumulator and run the ticks it covers.
    pub fn advance(&mut self, mut frame_time: Duration, mut update_fn: impl FnMut(u64)) -> u32 {
        if frame_time > MAX_FRAME_TIME {
            warn!(
                "Frame time {:.1}ms exceeds maximum, clamping to {:.1}ms",
                frame_time.as_secs_f64() * 1000.0,
                MAX_FRAME_TIME.as_secs_f64() * 1000.0
            );
            frame_time = MAX_FRAME_TIME;
        }

        self.accumulator += frame_time;

        let mut ran = 0;
        while self.accumulator >= self.tick {
            update_fn(self.tick_count);
            self.accumulator -= self.tick;
            self.tick_count += 1;
            ran += 1;
        }
        ran
    }

    /// Time left until the next tick is due.
    pub fn until_next_tick(&self) -> Duration {
        let pending = self.accumulator + self.previous_time.elapsed();
        self.tick.saturating_sub(pending)
    }

    /// Sleep until the next tick is due.
    pub fn wait_for_next_tick(&self) {
        let remaining = self.until_next_tick();
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }

    /// Total ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Configured tick length.
    pub fn tick_duration(&self) -> Duration {
        self.tick
    }
}
