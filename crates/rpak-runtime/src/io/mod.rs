//! Asynchronous file reads.
//!
//! The loader never blocks on disk. It issues reads through an [`AsyncIo`]
//! service and polls them on later ticks, consuming completions strictly in
//! file order.

mod memory;
mod threaded;

use std::path::Path;

pub use memory::MemoryIo;
pub use threaded::ThreadedFileIo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Scheduling hint passed through to the I/O service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum IoPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Outcome of polling a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    Pending,
    /// The bytes read. A short result means the file ended.
    Ready(Vec<u8>),
    Error(String),
    Canceled,
}

impl ReadStatus {
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// A file service with non-blocking reads.
///
/// A request is forgotten once [`poll`](Self::poll) returns anything other
/// than [`ReadStatus::Pending`]; polling it again reports an error.
pub trait AsyncIo: Send + Sync {
    fn open(&self, path: &Path, priority: IoPriority) -> Option<FileHandle>;

    fn file_size(&self, handle: FileHandle) -> Option<u64>;

    fn read(&self, handle: FileHandle, offset: u64, len: usize) -> RequestId;

    fn poll(&self, request: RequestId) -> ReadStatus;

    /// Ask for a read to be dropped. It still has to be polled to completion.
    fn cancel(&self, request: RequestId);

    fn close(&self, handle: FileHandle);
}
