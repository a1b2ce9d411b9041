//! Worker-thread file service.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use log::{debug, trace, warn};
use parking_lot::Mutex;

use super::{AsyncIo, FileHandle, IoPriority, ReadStatus, RequestId};
use crate::FxHashMap;

struct OpenFile {
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
    priority: IoPriority,
}

struct ReadJob {
    id: RequestId,
    file: Arc<OpenFile>,
    offset: u64,
    len: usize,
}

enum Slot {
    Queued,
    Canceled,
    Done(ReadStatus),
}

type Requests = Arc<Mutex<FxHashMap<RequestId, Slot>>>;

/// Reads files on a pool of worker threads.
///
/// Reads from high-priority files go through their own channel, which the
/// workers drain first.
pub struct ThreadedFileIo {
    files: Mutex<FxHashMap<FileHandle, Arc<OpenFile>>>,
    requests: Requests,
    next_handle: AtomicU32,
    next_request: AtomicU64,
    urgent: Option<Sender<ReadJob>>,
    normal: Option<Sender<ReadJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadedFileIo {
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let (urgent_tx, urgent_rx) = unbounded::<ReadJob>();
        let (normal_tx, normal_rx) = unbounded::<ReadJob>();
        let requests: Requests = Arc::default();

        let mut workers = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let urgent = urgent_rx.clone();
            let normal = normal_rx.clone();
            let requests = Arc::clone(&requests);
            let worker = std::thread::Builder::new()
                .name(format!("rpak-io-{index}"))
                .spawn(move || worker_loop(&urgent, &normal, &requests))?;
            workers.push(worker);
        }
        debug!("io: started {} read workers", workers.len());

        Ok(Self {
            files: Mutex::default(),
            requests,
            next_handle: AtomicU32::new(1),
            next_request: AtomicU64::new(1),
            urgent: Some(urgent_tx),
            normal: Some(normal_tx),
            workers,
        })
    }

    /// Requests issued but not yet polled to completion.
    pub fn outstanding(&self) -> usize {
        self.requests.lock().len()
    }
}

fn worker_loop(urgent: &Receiver<ReadJob>, normal: &Receiver<ReadJob>, requests: &Requests) {
    loop {
        let job = match urgent.try_recv() {
            Ok(job) => job,
            Err(_) => select! {
                recv(urgent) -> job => match job {
                    Ok(job) => job,
                    Err(_) => return,
                },
                recv(normal) -> job => match job {
                    Ok(job) => job,
                    Err(_) => return,
                },
            },
        };

        if matches!(requests.lock().get(&job.id), Some(Slot::Canceled) | None) {
            requests.lock().insert(job.id, Slot::Done(ReadStatus::Canceled));
            continue;
        }

        let status = match read_at(&job.file, job.offset, job.len) {
            Ok(bytes) => ReadStatus::Ready(bytes),
            Err(err) => ReadStatus::Error(err.to_string()),
        };
        trace!("io: read {} bytes at {} of {}", job.len, job.offset, job.file.path.display());

        let mut requests = requests.lock();
        let status = match requests.get(&job.id) {
            Some(Slot::Canceled) => ReadStatus::Canceled,
            _ => status,
        };
        requests.insert(job.id, Slot::Done(status));
    }
}

fn read_at(file: &OpenFile, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
    let available = file.size.saturating_sub(offset).min(len as u64) as usize;
    let mut bytes = vec![0u8; available];
    let mut file = file.file.lock();
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut bytes)?;
    Ok(bytes)
}

impl AsyncIo for ThreadedFileIo {
    fn open(&self, path: &Path, priority: IoPriority) -> Option<FileHandle> {
        let file = File::open(path).ok()?;
        let size = file.metadata().ok()?.len();
        let handle = FileHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.files.lock().insert(
            handle,
            Arc::new(OpenFile {
                path: path.to_path_buf(),
                file: Mutex::new(file),
                size,
                priority,
            }),
        );
        trace!("io: opened {} as {handle:?}", path.display());
        Some(handle)
    }

    fn file_size(&self, handle: FileHandle) -> Option<u64> {
        self.files.lock().get(&handle).map(|file| file.size)
    }

    fn read(&self, handle: FileHandle, offset: u64, len: usize) -> RequestId {
        let id = RequestId(self.next_request.fetch_add(1, Ordering::Relaxed));
        let Some(file) = self.files.lock().get(&handle).cloned() else {
            self.requests
                .lock()
                .insert(id, Slot::Done(ReadStatus::Error(format!("{handle:?} is not open"))));
            return id;
        };

        self.requests.lock().insert(id, Slot::Queued);
        let channel = if file.priority == IoPriority::High {
            &self.urgent
        } else {
            &self.normal
        };
        let job = ReadJob { id, file, offset, len };
        if channel.as_ref().map_or(true, |tx| tx.send(job).is_err()) {
            warn!("io: read workers are gone");
            self.requests
                .lock()
                .insert(id, Slot::Done(ReadStatus::Error("read workers stopped".to_string())));
        }
        id
    }

    fn poll(&self, request: RequestId) -> ReadStatus {
        let mut requests = self.requests.lock();
        match requests.remove(&request) {
            Some(Slot::Done(status)) => status,
            Some(slot) => {
                requests.insert(request, slot);
                ReadStatus::Pending
            }
            None => ReadStatus::Error(format!("unknown request {}", request.0)),
        }
    }

    fn cancel(&self, request: RequestId) {
        if let Some(slot) = self.requests.lock().get_mut(&request) {
            if matches!(slot, Slot::Queued) {
                *slot = Slot::Canceled;
            }
        }
    }

    fn close(&self, handle: FileHandle) {
        if let Some(file) = self.files.lock().remove(&handle) {
            trace!("io: closed {}", file.path.display());
        }
    }
}

impl Drop for ThreadedFileIo {
    fn drop(&mut self) {
        self.urgent.take();
        self.normal.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
