//! Error types for rpak-common.

use thiserror::Error;

/// Common error type for rpak operations.
#[derive(Debug, Error)]
pub enum Error {
    /// End of buffer reached while reading.
    #[error("unexpected end of buffer: needed {needed} bytes but only {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    /// End of a bit stream reached while reading.
    #[error("unexpected end of bit stream: needed {needed} bits but only {available} available")]
    UnexpectedEndOfBits { needed: u32, available: u64 },

    /// Invalid magic bytes encountered.
    #[error("invalid magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: Vec<u8>, actual: Vec<u8> },

    /// Invalid GUID text.
    #[error("invalid GUID format: {0}")]
    InvalidGuid(String),

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Missing null terminator in string.
    #[error("string missing null terminator")]
    MissingNullTerminator,
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
