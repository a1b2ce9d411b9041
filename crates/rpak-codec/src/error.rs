//! Error types for the codec crate.

use thiserror::Error;

/// Errors raised while decoding or encoding a container body.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Container header or layout error.
    #[error("{0}")]
    Format(#[from] rpak_format::FormatError),

    /// Ring buffer sizes must be non-zero powers of two.
    #[error("window size {0} is not a power of two")]
    InvalidWindow(usize),

    /// The underlying codec rejected the stream.
    #[error("{codec} stream error: {message}")]
    Codec {
        codec: &'static str,
        message: String,
    },

    /// The decoded byte count differs from the header.
    #[error("decompressed size mismatch: header declares {expected} bytes, stream produced {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// The codec made no progress although input and output space were available.
    #[error("decoder stalled after consuming {consumed} and producing {produced} bytes")]
    Stalled { consumed: u64, produced: u64 },
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, DecodeError>;
