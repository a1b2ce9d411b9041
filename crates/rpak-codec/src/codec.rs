//! Incremental codecs behind the streaming decoder.

use flate2::{Decompress, FlushDecompress, Status};
use rpak_format::{Compression, PakHeader};
use zstd::stream::raw::{Decoder as ZstdDecoder, InBuffer, Operation, OutBuffer};

use crate::{DecodeError, Result};

/// Outcome of one codec invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodecStep {
    pub consumed: usize,
    pub produced: usize,
    /// The codec saw the end of its stream.
    pub finished: bool,
}

/// A resumable decoder that works on whatever contiguous input and output
/// windows it is handed.
pub trait Codec: Send {
    fn compression(&self) -> Compression;

    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<CodecStep>;
}

/// Create the codec for `compression`.
///
/// `expected` is the decoded body size; the stored codec uses it to know
/// where its stream ends.
pub fn new_codec(compression: Compression, expected: u64) -> Result<Box<dyn Codec>> {
    Ok(match compression {
        Compression::Stored => Box::new(StoredCodec::new(expected)),
        Compression::Deflate => Box::new(DeflateCodec::new()),
        Compression::Zstd => Box::new(ZstdCodec::new()?),
    })
}

/// Body compression actually in effect for a container.
///
/// A body flagged compressed whose on-disk size equals its decoded size is
/// already decoded and passes through unchanged.
pub fn effective_compression(header: &PakHeader) -> Compression {
    match header.compression() {
        Compression::Stored => Compression::Stored,
        _ if header.compressed_size == header.decompressed_size => Compression::Stored,
        other => other,
    }
}

/// Pass-through for uncompressed bodies.
pub struct StoredCodec {
    remaining: u64,
}

impl StoredCodec {
    pub fn new(expected: u64) -> Self {
        Self { remaining: expected }
    }
}

impl Codec for StoredCodec {
    fn compression(&self) -> Compression {
        Compression::Stored
    }

    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<CodecStep> {
        let n = input
            .len()
            .min(output.len())
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        output[..n].copy_from_slice(&input[..n]);
        self.remaining -= n as u64;
        Ok(CodecStep {
            consumed: n,
            produced: n,
            finished: self.remaining == 0,
        })
    }
}

/// Primary codec: raw DEFLATE.
pub struct DeflateCodec {
    inner: Decompress,
}

impl DeflateCodec {
    pub fn new() -> Self {
        Self {
            inner: Decompress::new(false),
        }
    }
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for DeflateCodec {
    fn compression(&self) -> Compression {
        Compression::Deflate
    }

    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<CodecStep> {
        let in_before = self.inner.total_in();
        let out_before = self.inner.total_out();

        let status = self
            .inner
            .decompress(input, output, FlushDecompress::None)
            .map_err(|e| DecodeError::Codec {
                codec: "deflate",
                message: e.to_string(),
            })?;

        Ok(CodecStep {
            consumed: (self.inner.total_in() - in_before) as usize,
            produced: (self.inner.total_out() - out_before) as usize,
            finished: status == Status::StreamEnd,
        })
    }
}

/// Alternate codec: Zstandard.
pub struct ZstdCodec {
    inner: ZstdDecoder<'static>,
}

impl ZstdCodec {
    pub fn new() -> Result<Self> {
        let inner = ZstdDecoder::new().map_err(|e| DecodeError::Codec {
            codec: "zstd",
            message: e.to_string(),
        })?;
        Ok(Self { inner })
    }
}

impl Codec for ZstdCodec {
    fn compression(&self) -> Compression {
        Compression::Zstd
    }

    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<CodecStep> {
        let mut src = InBuffer::around(input);
        let mut dst = OutBuffer::around(output);

        let hint = self.inner.run(&mut src, &mut dst).map_err(|e| DecodeError::Codec {
            codec: "zstd",
            message: e.to_string(),
        })?;

        Ok(CodecStep {
            consumed: src.pos(),
            produced: dst.pos(),
            finished: hint == 0,
        })
    }
}
