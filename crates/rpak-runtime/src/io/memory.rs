//! In-memory file service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{AsyncIo, FileHandle, IoPriority, ReadStatus, RequestId};
use crate::FxHashMap;

struct Request {
    result: ReadStatus,
    polls_left: u32,
}

#[derive(Default)]
struct State {
    files: FxHashMap<PathBuf, Arc<Vec<u8>>>,
    failing: FxHashMap<PathBuf, String>,
    open: FxHashMap<FileHandle, (PathBuf, Arc<Vec<u8>>)>,
    requests: FxHashMap<RequestId, Request>,
    opened: Vec<PathBuf>,
    next_handle: u32,
    next_request: u64,
    latency: u32,
    delivered: u64,
}

/// Files held in memory, with scripted read latency and failures.
///
/// Each read reports [`ReadStatus::Pending`] for `latency` polls before it
/// completes.
#[derive(Default)]
pub struct MemoryIo {
    state: Mutex<State>,
}

impl MemoryIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: u32) -> Self {
        let io = Self::default();
        io.state.lock().latency = latency;
        io
    }

    pub fn insert(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.state.lock().files.insert(path.into(), Arc::new(bytes));
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.state.lock().files.remove(path).is_some()
    }

    /// Make every read of `path` fail with `message`.
    pub fn fail_reads(&self, path: impl Into<PathBuf>, message: impl Into<String>) {
        self.state.lock().failing.insert(path.into(), message.into());
    }

    /// Every path successfully opened, in order.
    pub fn opened(&self) -> Vec<PathBuf> {
        self.state.lock().opened.clone()
    }

    pub fn open_files(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Requests issued but not yet polled to completion.
    pub fn outstanding(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Bytes handed out by completed reads.
    pub fn bytes_delivered(&self) -> u64 {
        self.state.lock().delivered
    }
}

impl AsyncIo for MemoryIo {
    fn open(&self, path: &Path, _priority: IoPriority) -> Option<FileHandle> {
        let mut state = self.state.lock();
        let bytes = Arc::clone(state.files.get(path)?);
        state.next_handle += 1;
        let handle = FileHandle(state.next_handle);
        state.open.insert(handle, (path.to_path_buf(), bytes));
        state.opened.push(path.to_path_buf());
        Some(handle)
    }

    fn file_size(&self, handle: FileHandle) -> Option<u64> {
        self.state.lock().open.get(&handle).map(|(_, bytes)| bytes.len() as u64)
    }

    fn read(&self, handle: FileHandle, offset: u64, len: usize) -> RequestId {
        let mut state = self.state.lock();
        state.next_request += 1;
        let id = RequestId(state.next_request);

        let result = match state.open.get(&handle) {
            None => ReadStatus::Error(format!("{handle:?} is not open")),
            Some((path, bytes)) => match state.failing.get(path) {
                Some(message) => ReadStatus::Error(message.clone()),
                None => {
                    let start = offset.min(bytes.len() as u64) as usize;
                    let end = start + len.min(bytes.len() - start);
                    ReadStatus::Ready(bytes[start..end].to_vec())
                }
            },
        };
        let polls_left = state.latency;
        state.requests.insert(id, Request { result, polls_left });
        id
    }

    fn poll(&self, request: RequestId) -> ReadStatus {
        let mut state = self.state.lock();
        let Some(entry) = state.requests.get_mut(&request) else {
            return ReadStatus::Error(format!("unknown request {}", request.0));
        };
        if entry.polls_left > 0 {
            entry.polls_left -= 1;
            return ReadStatus::Pending;
        }
        let result = state
            .requests
            .remove(&request)
            .map_or(ReadStatus::Canceled, |entry| entry.result);
        if let ReadStatus::Ready(bytes) = &result {
            state.delivered += bytes.len() as u64;
        }
        result
    }

    fn cancel(&self, request: RequestId) {
        if let Some(entry) = self.state.lock().requests.get_mut(&request) {
            entry.result = ReadStatus::Canceled;
        }
    }

    fn close(&self, handle: FileHandle) {
        self.state.lock().open.remove(&handle);
    }
}
