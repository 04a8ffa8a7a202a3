//! Fixed-capacity cyclic byte buffer.
//!
//! The staging area between the two descriptors of an fd-to-fd job. The
//! region is allocated once at job setup and never grows; `head`/`used`
//! arithmetic keeps `0 ≤ used ≤ capacity` at all times.
//!
//! **Contract:**
//! - `writable()` is the largest contiguous free slice; `commit(n)` records
//!   that `n` bytes of it were filled.
//! - `readable()` is the oldest contiguous used slice; `consume(n)` retires
//!   `n` bytes of it.
//! - A wrapped buffer may need two `writable()`/`readable()` rounds to
//!   reach every byte; callers simply come back on the next readiness
//!   delivery.

/// Cyclic buffer over an engine-owned region.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    head: usize,
    used: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            buf: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn free(&self) -> usize {
        self.buf.len() - self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn is_full(&self) -> bool {
        self.used == self.buf.len()
    }

    /// Largest contiguous free slice, starting at the write position.
    pub fn writable(&mut self) -> &mut [u8] {
        let cap = self.buf.len();
        let tail = (self.head + self.used) % cap;
        let run = cap.min(tail + self.free()) - tail;
        &mut self.buf[tail..tail + run]
    }

    /// Record `n` bytes written into the slice returned by `writable`.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.free(), "commit past free space");
        self.used += n;
    }

    /// Oldest contiguous used slice.
    pub fn readable(&self) -> &[u8] {
        let run = self.used.min(self.buf.len() - self.head);
        &self.buf[self.head..self.head + run]
    }

    /// Retire `n` bytes from the front of the buffer.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.used, "consume past used bytes");
        self.head = (self.head + n) % self.buf.len();
        self.used -= n;
    }

    /// Discard everything buffered.
    pub fn clear(&mut self) {
        self.head = 0;
        self.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(ring: &mut RingBuffer, data: &[u8]) -> usize {
        let w = ring.writable();
        let n = w.len().min(data.len());
        w[..n].copy_from_slice(&data[..n]);
        ring.commit(n);
        n
    }

    #[test]
    fn write_then_read_back() {
        let mut ring = RingBuffer::new(8);
        assert_eq!(fill(&mut ring, b"abcde"), 5);
        assert_eq!(ring.used(), 5);
        assert_eq!(ring.readable(), b"abcde");

        ring.consume(3);
        assert_eq!(ring.readable(), b"de");
        assert_eq!(ring.free(), 6);
    }

    #[test]
    fn wraparound_splits_the_regions() {
        let mut ring = RingBuffer::new(8);
        fill(&mut ring, b"abcdef");
        ring.consume(4); // head = 4, used = 2

        // Free space wraps: contiguous run is only up to the end.
        assert_eq!(fill(&mut ring, b"XYZW"), 2); // fills slots 6..8
        assert!(ring.writable().len() == 4); // now the wrapped front half
        assert_eq!(fill(&mut ring, b"1234"), 4);
        assert!(ring.is_full());

        // Readable is contiguous up to the wrap point only.
        assert_eq!(ring.readable(), b"efXY");
        ring.consume(4);
        assert_eq!(ring.readable(), b"1234");
    }

    #[test]
    fn full_and_empty_extremes() {
        let mut ring = RingBuffer::new(4);
        assert!(ring.is_empty());
        assert_eq!(ring.writable().len(), 4);

        fill(&mut ring, b"....");
        assert!(ring.is_full());
        assert_eq!(ring.writable().len(), 0);
        assert_eq!(ring.free(), 0);

        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.writable().len(), 4);
    }

    #[test]
    fn occupancy_invariant_over_mixed_ops() {
        let mut ring = RingBuffer::new(16);
        let mut expected = 0usize;
        for step in 0..64 {
            if step % 3 == 0 {
                let n = fill(&mut ring, &[step as u8; 5]);
                expected += n;
            } else if !ring.is_empty() {
                let n = ring.readable().len().min(2);
                ring.consume(n);
                expected -= n;
            }
            assert_eq!(ring.used(), expected);
            assert!(ring.used() <= ring.capacity());
        }
    }
}
