//! Page buffer allocation.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Backing memory for one page.
///
/// Pages are addressed by index and offset, never by address, so the buffer
/// records the alignment the page asked for without over-aligning it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBuffer {
    data: Box<[u8]>,
    align: usize,
}

impl PageBuffer {
    pub fn zeroed(len: usize, align: usize) -> Self {
        Self {
            data: vec![0u8; len].into_boxed_slice(),
            align: align.max(1),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn align(&self) -> usize {
        self.align
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Supplies page buffers to a loading container.
pub trait PageAllocator: Send + Sync {
    fn allocate(&self, len: usize, align: usize) -> PageBuffer;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAllocator;

impl PageAllocator for DefaultAllocator {
    fn allocate(&self, len: usize, align: usize) -> PageBuffer {
        PageBuffer::zeroed(len, align)
    }
}

/// Counts allocations and bytes handed out.
#[derive(Debug, Default)]
pub struct CountingAllocator {
    calls: AtomicUsize,
    bytes: AtomicUsize,
}

impl CountingAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }
}

impl PageAllocator for CountingAllocator {
    fn allocate(&self, len: usize, align: usize) -> PageBuffer {
        self.calls.fetch_add(1, Ordering::AcqRel);
        self.bytes.fetch_add(len, Ordering::AcqRel);
        PageBuffer::zeroed(len, align)
    }
}
