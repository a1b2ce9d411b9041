//! In-order chunked file reads feeding a body decoder.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use log::{debug, trace};
use rpak_codec::{DecoderConfig, StreamDecoder};
use rpak_format::PakHeader;

use crate::config::PakPaths;
use crate::error::{IoError, LoadError};
use crate::io::{AsyncIo, FileHandle, IoPriority, ReadStatus, RequestId};

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: RequestId,
    offset: u64,
    len: usize,
}

/// Issues fixed-size reads ahead of the consumer and hands their bytes out
/// strictly in file order.
pub(crate) struct ChunkedReader {
    handle: FileHandle,
    path: PathBuf,
    size: u64,
    /// Bytes past this offset are never requested nor delivered.
    end: u64,
    next_offset: u64,
    delivered: u64,
    chunk: usize,
    max_in_flight: usize,
    in_flight: VecDeque<InFlight>,
    current: Vec<u8>,
    current_pos: usize,
    canceled: bool,
}

impl ChunkedReader {
    pub(crate) fn new(handle: FileHandle, path: PathBuf, size: u64, chunk: usize, max_in_flight: usize) -> Self {
        Self {
            handle,
            path,
            size,
            end: size.min(chunk as u64),
            next_offset: 0,
            delivered: 0,
            chunk: chunk.max(1),
            max_in_flight: max_in_flight.max(1),
            in_flight: VecDeque::new(),
            current: Vec::new(),
            current_pos: 0,
            canceled: false,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    /// Read up to `end`, which must not exceed the file size.
    pub(crate) fn set_end(&mut self, end: u64) {
        self.end = end.min(self.size);
    }

    /// Issue reads up to the in-flight limit and collect the next chunk in
    /// order. Returns whether new bytes became available.
    pub(crate) fn pump(&mut self, io: &dyn AsyncIo) -> Result<bool, IoError> {
        while !self.canceled && self.in_flight.len() < self.max_in_flight && self.next_offset < self.end {
            let len = (self.end - self.next_offset).min(self.chunk as u64) as usize;
            let id = io.read(self.handle, self.next_offset, len);
            trace!("read: issued {len} bytes at {} of {}", self.next_offset, self.path.display());
            self.in_flight.push_back(InFlight {
                id,
                offset: self.next_offset,
                len,
            });
            self.next_offset += len as u64;
        }

        if self.current_pos < self.current.len() {
            return Ok(false);
        }
        let Some(front) = self.in_flight.front().copied() else {
            return Ok(false);
        };

        let status = io.poll(front.id);
        if status.is_pending() {
            return Ok(false);
        }
        self.in_flight.pop_front();
        match status {
            ReadStatus::Ready(bytes) if bytes.len() == front.len => {
                self.current = bytes;
                self.current_pos = 0;
                Ok(true)
            }
            ReadStatus::Ready(bytes) => Err(IoError::Truncated {
                path: self.path.clone(),
                size: front.offset + bytes.len() as u64,
                expected: front.offset + front.len as u64,
            }),
            ReadStatus::Error(message) => Err(IoError::ReadFailed {
                path: self.path.clone(),
                offset: front.offset,
                len: front.len,
                message,
            }),
            ReadStatus::Canceled | ReadStatus::Pending => Err(IoError::ReadCanceled {
                path: self.path.clone(),
                offset: front.offset,
            }),
        }
    }

    /// Bytes received and not yet consumed, never past `end`.
    pub(crate) fn available(&self) -> &[u8] {
        let left = self.end.saturating_sub(self.delivered);
        let ready = &self.current[self.current_pos..];
        &ready[..ready.len().min(left as usize)]
    }

    pub(crate) fn consume(&mut self, count: usize) {
        self.current_pos += count;
        self.delivered += count as u64;
    }

    /// Everything up to `end` has been consumed.
    #[cfg(test)]
    pub(crate) fn is_complete(&self) -> bool {
        self.delivered >= self.end
    }

    /// Cancel outstanding reads and poll them; true once none remain.
    pub(crate) fn drain(&mut self, io: &dyn AsyncIo) -> bool {
        if !self.canceled {
            for read in &self.in_flight {
                io.cancel(read.id);
            }
            self.canceled = true;
        }
        self.in_flight.retain(|read| io.poll(read.id).is_pending());
        self.in_flight.is_empty()
    }

    pub(crate) fn close(&self, io: &dyn AsyncIo) {
        io.close(self.handle);
    }
}

/// One container file: raw header bytes first, then the decoded body.
pub(crate) struct ContainerStream {
    reader: ChunkedReader,
    header_bytes: Vec<u8>,
    decoder: Option<StreamDecoder>,
}

impl ContainerStream {
    /// Open `name`, trying the override directory before the regular one.
    pub(crate) fn open(
        io: &dyn AsyncIo,
        paths: &PakPaths,
        name: &str,
        priority: IoPriority,
        chunk: usize,
        max_in_flight: usize,
    ) -> Result<Self, IoError> {
        let candidates = paths.candidates(name);
        for (attempt, path) in candidates.iter().enumerate() {
            let Some(handle) = io.open(path, priority) else {
                continue;
            };
            if attempt > 0 {
                debug!(
                    "open: {name} not found at {}, falling back to {}",
                    candidates[0].display(),
                    path.display()
                );
            }

            let Some(size) = io.file_size(handle) else {
                io.close(handle);
                return Err(IoError::UnknownSize(path.clone()));
            };
            if size < PakHeader::SIZE as u64 {
                io.close(handle);
                return Err(IoError::Truncated {
                    path: path.clone(),
                    size,
                    expected: PakHeader::SIZE as u64,
                });
            }

            let mut reader = ChunkedReader::new(handle, path.clone(), size, chunk, max_in_flight);
            // The first window always covers the whole header.
            reader.set_end(chunk.max(PakHeader::SIZE) as u64);
            return Ok(Self {
                reader,
                header_bytes: Vec::with_capacity(PakHeader::SIZE),
                decoder: None,
            });
        }

        Err(IoError::OpenFailed {
            name: name.to_string(),
            tried: candidates,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        self.reader.path()
    }

    /// Collect the raw header. `None` while its bytes are still in flight.
    pub(crate) fn poll_header(&mut self, io: &dyn AsyncIo) -> Result<Option<PakHeader>, LoadError> {
        while self.header_bytes.len() < PakHeader::SIZE {
            let available = self.reader.available();
            if available.is_empty() {
                if !self.reader.pump(io)? {
                    break;
                }
                continue;
            }
            let take = available.len().min(PakHeader::SIZE - self.header_bytes.len());
            self.header_bytes.extend_from_slice(&available[..take]);
            self.reader.consume(take);
        }

        if self.header_bytes.len() < PakHeader::SIZE {
            return Ok(None);
        }
        Ok(Some(PakHeader::read(&self.header_bytes)?))
    }

    pub(crate) fn header_bytes(&self) -> &[u8] {
        &self.header_bytes
    }

    pub(crate) fn has_body(&self) -> bool {
        self.decoder.is_some()
    }

    /// Start decoding the body described by `header`.
    pub(crate) fn start_body(&mut self, header: &PakHeader, config: &DecoderConfig) -> Result<(), LoadError> {
        if self.reader.size() < header.compressed_size {
            return Err(IoError::Truncated {
                path: self.reader.path().to_path_buf(),
                size: self.reader.size(),
                expected: header.compressed_size,
            }
            .into());
        }
        self.reader.set_end(header.compressed_size);
        self.decoder = Some(StreamDecoder::for_header(header, config)?);
        Ok(())
    }

    /// Move file bytes into the decoder and decode what fits.
    pub(crate) fn pump(&mut self, io: &dyn AsyncIo) -> Result<bool, LoadError> {
        let mut progress = self.reader.pump(io)?;
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(progress);
        };

        loop {
            let available = self.reader.available();
            if available.is_empty() {
                break;
            }
            let pushed = decoder.push_input(available);
            if pushed == 0 {
                break;
            }
            self.reader.consume(pushed);
            progress = true;
        }

        let free = decoder.input_free();
        if decoder.decode_step(decoder.input_received())? > 0 || decoder.input_free() != free {
            progress = true;
        }
        Ok(progress)
    }

    pub(crate) fn output(&self) -> &[u8] {
        self.decoder.as_ref().map_or(&[], StreamDecoder::output)
    }

    pub(crate) fn consume_output(&mut self, count: usize) {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.consume_output(count);
        }
    }

    /// The whole body was decoded and drained.
    pub(crate) fn is_drained(&self) -> bool {
        self.decoder.as_ref().is_some_and(StreamDecoder::is_drained)
    }

    /// Cancel and collect outstanding reads; true once none remain.
    pub(crate) fn drain(&mut self, io: &dyn AsyncIo) -> bool {
        self.reader.drain(io)
    }

    pub(crate) fn close(&self, io: &dyn AsyncIo) {
        self.reader.close(io);
    }
}
