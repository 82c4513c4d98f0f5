//! Growable circular byte buffer used to reassemble TCP frames across reads.
//!
//! The buffer keeps a backing slice of `capacity` bytes plus a `start` index
//! and a `count`. Logical byte `i` lives at `(start + i) % capacity`. When a
//! push would overflow, the storage grows by a fixed step: the logical
//! contents are copied to offset 0 of the new allocation and `start` resets to
//! 0. The buffer never shrinks.

/// Default growth increment: 4 MiB.
///
/// Coarse on purpose so a burst of large frames resizes once rather than on
/// every read.
pub const DEFAULT_GROWTH_STEP: usize = 4 * 1024 * 1024;

/// Growable FIFO of bytes with bulk peek/dequeue.
#[derive(Debug, Clone)]
pub struct ByteRingBuffer {
    buf: Box<[u8]>,
    start: usize,
    count: usize,
    growth_step: usize,
}

impl Default for ByteRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteRingBuffer {
    /// Create a buffer with [`DEFAULT_GROWTH_STEP`] initial capacity and growth step.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_GROWTH_STEP, DEFAULT_GROWTH_STEP)
    }

    /// Create a buffer with an explicit initial capacity and growth step.
    ///
    /// A zero growth step is bumped to 1 so pushes always make progress.
    pub fn with_capacity(capacity: usize, growth_step: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            count: 0,
            growth_step: growth_step.max(1),
        }
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Size of the backing storage.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Drop all buffered bytes. Capacity is kept.
    pub fn clear(&mut self) {
        self.start = 0;
        self.count = 0;
    }

    /// Append one byte, growing the storage if it is full.
    pub fn enqueue(&mut self, byte: u8) {
        if self.count == self.buf.len() {
            self.grow(1);
        }
        let tail = (self.start + self.count) % self.buf.len();
        self.buf[tail] = byte;
        self.count += 1;
    }

    /// Append a slice of bytes, growing at most once.
    pub fn enqueue_slice(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let free = self.buf.len() - self.count;
        if bytes.len() > free {
            self.grow(bytes.len() - free);
        }

        let cap = self.buf.len();
        let tail = (self.start + self.count) % cap;
        let first = bytes.len().min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&bytes[..first]);
        self.buf[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        self.count += bytes.len();
    }

    /// Pop the oldest byte, or `None` if the buffer is empty.
    pub fn dequeue(&mut self) -> Option<u8> {
        if self.count == 0 {
            return None;
        }
        let byte = self.buf[self.start];
        self.start = (self.start + 1) % self.buf.len();
        self.count -= 1;
        Some(byte)
    }

    /// Copy the oldest `out.len()` bytes into `out` without consuming them.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `out.len()` bytes are buffered.
    pub fn peek_range(&self, out: &mut [u8]) {
        assert!(
            out.len() <= self.count,
            "peek of {} bytes with only {} buffered",
            out.len(),
            self.count
        );
        if out.is_empty() {
            return;
        }
        let cap = self.buf.len();
        let first = out.len().min(cap - self.start);
        out[..first].copy_from_slice(&self.buf[self.start..self.start + first]);
        let rest = out.len() - first;
        out[first..].copy_from_slice(&self.buf[..rest]);
    }

    /// Copy the oldest `out.len()` bytes into `out` and consume them.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `out.len()` bytes are buffered.
    pub fn dequeue_range(&mut self, out: &mut [u8]) {
        self.peek_range(out);
        self.skip(out.len());
    }

    /// Consume `n` bytes without copying them out.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `n` bytes are buffered.
    pub fn skip(&mut self, n: usize) {
        assert!(n <= self.count, "skip of {n} bytes with only {} buffered", self.count);
        if n == 0 {
            return;
        }
        self.start = (self.start + n) % self.buf.len();
        self.count -= n;
        if self.count == 0 {
            self.start = 0;
        }
    }

    /// Grow by whole steps until at least `additional` more bytes fit, then
    /// linearise the contents at offset 0.
    fn grow(&mut self, additional: usize) {
        let steps = additional.div_ceil(self.growth_step);
        let new_cap = self.buf.len() + steps * self.growth_step;
        let mut new_buf = vec![0u8; new_cap].into_boxed_slice();
        self.peek_range(&mut new_buf[..self.count]);
        tracing::trace!(
            old_capacity = self.buf.len(),
            new_capacity = new_cap,
            "ring buffer grew"
        );
        self.buf = new_buf;
        self.start = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_single_bytes() {
        let mut ring = ByteRingBuffer::with_capacity(4, 4);
        for b in 1..=3u8 {
            ring.enqueue(b);
        }
        assert_eq!(ring.dequeue(), Some(1));
        assert_eq!(ring.dequeue(), Some(2));
        assert_eq!(ring.dequeue(), Some(3));
        assert_eq!(ring.dequeue(), None);
    }

    #[test]
    fn test_dequeue_range_is_fifo_across_growth() {
        let mut ring = ByteRingBuffer::with_capacity(8, 8);
        // Move start away from 0 so the contents wrap before growing.
        ring.enqueue_slice(&[0xAA; 5]);
        for _ in 0..5 {
            assert_eq!(ring.dequeue(), Some(0xAA));
        }

        let data: Vec<u8> = (0..20).collect();
        ring.enqueue_slice(&data[..6]);
        assert_eq!(ring.capacity(), 8, "six bytes should fit without growing");
        ring.enqueue_slice(&data[6..]);
        assert!(ring.capacity() > 8, "buffer should have grown");

        let mut out = vec![0u8; 20];
        ring.dequeue_range(&mut out);
        assert_eq!(out, data);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_growth_preserves_contents_for_every_occupancy() {
        let cap = 16;
        for occupancy in 0..cap {
            for offset in 0..cap {
                let mut ring = ByteRingBuffer::with_capacity(cap, 16);
                // Rotate start to `offset`.
                for _ in 0..offset {
                    ring.enqueue(0);
                    ring.dequeue();
                }
                let before: Vec<u8> = (0..occupancy as u8).map(|b| b + 100).collect();
                ring.enqueue_slice(&before);

                // Push enough single bytes to force exactly one growth.
                let extra: Vec<u8> = (0..(cap - occupancy + 1) as u8).collect();
                for &b in &extra {
                    ring.enqueue(b);
                }
                assert_eq!(ring.capacity(), cap + 16);

                let mut out = vec![0u8; occupancy + extra.len()];
                ring.dequeue_range(&mut out);
                assert_eq!(&out[..occupancy], &before[..], "occupancy {occupancy} offset {offset}");
                assert_eq!(&out[occupancy..], &extra[..]);
            }
        }
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut ring = ByteRingBuffer::with_capacity(4, 4);
        ring.enqueue_slice(b"abcd");
        let mut peeked = [0u8; 2];
        ring.peek_range(&mut peeked);
        assert_eq!(&peeked, b"ab");
        assert_eq!(ring.len(), 4);

        let mut all = [0u8; 4];
        ring.dequeue_range(&mut all);
        assert_eq!(&all, b"abcd");
    }

    #[test]
    fn test_large_slice_grows_in_whole_steps() {
        let mut ring = ByteRingBuffer::with_capacity(4, 10);
        ring.enqueue_slice(&[1u8; 25]);
        assert_eq!(ring.capacity(), 34);
        assert_eq!(ring.len(), 25);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut ring = ByteRingBuffer::with_capacity(4, 4);
        ring.enqueue_slice(&[9u8; 6]);
        let cap = ring.capacity();
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), cap);
        assert_eq!(ring.dequeue(), None);
    }

    #[test]
    fn test_zero_capacity_buffer_grows_on_first_push() {
        let mut ring = ByteRingBuffer::with_capacity(0, 8);
        ring.enqueue(7);
        assert_eq!(ring.capacity(), 8);
        assert_eq!(ring.dequeue(), Some(7));
    }

    #[test]
    #[should_panic]
    fn test_dequeue_range_past_end_panics() {
        let mut ring = ByteRingBuffer::with_capacity(4, 4);
        ring.enqueue(1);
        let mut out = [0u8; 2];
        ring.dequeue_range(&mut out);
    }
}
