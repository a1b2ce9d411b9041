//! Power-of-two ring buffers addressed by absolute stream positions.

use crate::{DecodeError, Result};

/// A fixed-capacity byte ring.
///
/// Read and write cursors are absolute stream positions; the slot of a
/// position is `position & mask`. The buffer never holds more than its
/// capacity, so the writer can run at most one lap ahead of the reader.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    mask: u64,
    read: u64,
    write: u64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(DecodeError::InvalidWindow(capacity));
        }
        Ok(Self {
            buf: vec![0; capacity].into_boxed_slice(),
            mask: capacity as u64 - 1,
            read: 0,
            write: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes written but not yet consumed.
    #[inline]
    pub fn len(&self) -> usize {
        (self.write - self.read) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.write == self.read
    }

    #[inline]
    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Absolute position of the next byte to read.
    #[inline]
    pub fn read_position(&self) -> u64 {
        self.read
    }

    /// Absolute position of the next byte to write.
    #[inline]
    pub fn write_position(&self) -> u64 {
        self.write
    }

    /// Copy as much of `data` as fits, wrapping if needed.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let mut written = 0;
        while written < data.len() {
            let slot = self.writable();
            let n = slot.len().min(data.len() - written);
            if n == 0 {
                break;
            }
            slot[..n].copy_from_slice(&data[written..written + n]);
            self.commit(n);
            written += n;
        }
        written
    }

    /// Readable bytes up to `limit` (an absolute position), contiguous
    /// from the read cursor to the end of the ring at most.
    pub fn readable_until(&self, limit: u64) -> &[u8] {
        let end = limit.min(self.write);
        if end <= self.read {
            return &[];
        }
        let start = (self.read & self.mask) as usize;
        let len = ((end - self.read) as usize).min(self.capacity() - start);
        &self.buf[start..start + len]
    }

    /// All readable bytes contiguous from the read cursor.
    #[inline]
    pub fn readable(&self) -> &[u8] {
        self.readable_until(self.write)
    }

    pub fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.len());
        self.read += count.min(self.len()) as u64;
    }

    /// Free space contiguous from the write cursor.
    pub fn writable(&mut self) -> &mut [u8] {
        let start = (self.write & self.mask) as usize;
        let len = self.free().min(self.capacity() - start);
        &mut self.buf[start..start + len]
    }

    pub fn commit(&mut self, count: usize) {
        debug_assert!(count <= self.free());
        self.write += count.min(self.free()) as u64;
    }
}
