//! Bounded capture of subprocess output.
//!
//! Steps can produce unbounded output; the runner only ever keeps the
//! most recent `capacity` bytes of each stream for diagnostics, analysis
//! and artifacts.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

pub const DEFAULT_CAPACITY: usize = 4096;

/// Thread-safe fixed-capacity byte buffer with writer semantics. Clones
/// share the same underlying storage, so one clone can be handed to a
/// pipe-reader thread while the runner keeps another for readback.
#[derive(Clone)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    capacity: usize,
    data: VecDeque<u8>,
}

impl CaptureBuffer {
    /// A zero capacity falls back to the default.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_CAPACITY } else { capacity };
        Self {
            inner: Arc::new(Mutex::new(Inner {
                capacity,
                data: VecDeque::with_capacity(capacity),
            })),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().expect("capture lock").capacity
    }

    /// Defensive copy of the retained tail.
    pub fn bytes(&self) -> Vec<u8> {
        let inner = self.inner.lock().expect("capture lock");
        inner.data.iter().copied().collect()
    }

    pub fn reset(&self) {
        self.inner.lock().expect("capture lock").data.clear();
    }
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().expect("capture lock");
        let capacity = inner.capacity;

        if buf.len() >= capacity {
            // Only the last `capacity` bytes of this write survive.
            inner.data.clear();
            inner.data.extend(&buf[buf.len() - capacity..]);
        } else {
            let overflow = (inner.data.len() + buf.len()).saturating_sub(capacity);
            inner.data.drain(..overflow);
            inner.data.extend(buf);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retains_everything_under_capacity() {
        let mut buffer = CaptureBuffer::new(16);
        buffer.write_all(b"hello").unwrap();
        assert_eq!(buffer.bytes(), b"hello");
    }

    #[test]
    fn keeps_last_capacity_bytes_across_writes() {
        let mut buffer = CaptureBuffer::new(8);
        buffer.write_all(b"abcdef").unwrap();
        buffer.write_all(b"ghij").unwrap();
        assert_eq!(buffer.bytes(), b"cdefghij");
    }

    #[test]
    fn oversized_write_keeps_its_tail() {
        let mut buffer = CaptureBuffer::new(4);
        buffer.write_all(b"0123456789").unwrap();
        assert_eq!(buffer.bytes(), b"6789");
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut buffer = CaptureBuffer::new(32);
        for chunk in [&b"aaaa"[..], &b"bbbbbbbbbbbbbbbbbbbbbbbb"[..], &b"cc"[..]] {
            buffer.write_all(chunk).unwrap();
            assert!(buffer.bytes().len() <= 32);
        }
    }

    #[test]
    fn bytes_equal_tail_of_concatenated_writes() {
        let writes: Vec<&[u8]> = vec![b"one ", b"two ", b"three ", b"four"];
        let mut concatenated = Vec::new();
        let mut buffer = CaptureBuffer::new(10);
        for w in &writes {
            buffer.write_all(w).unwrap();
            concatenated.extend_from_slice(w);
        }
        let tail_start = concatenated.len().saturating_sub(10);
        assert_eq!(buffer.bytes(), &concatenated[tail_start..]);
    }

    #[test]
    fn zero_capacity_falls_back_to_default() {
        let buffer = CaptureBuffer::new(0);
        assert_eq!(buffer.capacity(), DEFAULT_CAPACITY);
    }

    #[test]
    fn reset_then_identical_writes_yield_identical_bytes() {
        let mut buffer = CaptureBuffer::new(8);
        buffer.write_all(b"abcdefghij").unwrap();
        let first = buffer.bytes();
        buffer.reset();
        buffer.write_all(b"abcdefghij").unwrap();
        assert_eq!(buffer.bytes(), first);
    }

    #[test]
    fn bytes_returns_a_defensive_copy() {
        let mut buffer = CaptureBuffer::new(8);
        buffer.write_all(b"data").unwrap();
        let mut copy = buffer.bytes();
        copy.clear();
        assert_eq!(buffer.bytes(), b"data");
    }

    #[test]
    fn clones_share_storage() {
        let buffer = CaptureBuffer::new(8);
        let mut writer = buffer.clone();
        writer.write_all(b"shared").unwrap();
        assert_eq!(buffer.bytes(), b"shared");
    }
}
