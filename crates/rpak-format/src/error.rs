//! Error types for the format crate.

use thiserror::Error;

/// Errors raised while interpreting a container's header and tables.
#[derive(Debug, Error)]
pub enum FormatError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Truncated or malformed table data.
    #[error("{0}")]
    Common(#[from] rpak_common::Error),

    #[error("bad container magic: expected {expected:#010x}, got {found:#010x}")]
    BadMagic { expected: u32, found: u32 },

    #[error("unsupported container version {found} (expected {expected})")]
    UnsupportedVersion { expected: u16, found: u16 },

    #[error("container declares {count} segments, maximum is {max}")]
    TooManySegments { count: u16, max: u16 },

    #[error("container declares {count} assets, registry capacity is {max}")]
    TooManyAssets { count: u32, max: u32 },

    /// A page pointer names a page that does not exist.
    #[error("page pointer {index}:{offset:#x} is out of range ({page_count} pages)")]
    InvalidPagePointer {
        index: u32,
        offset: u32,
        page_count: u16,
    },

    /// A page pointer plus access length runs past the end of its page.
    #[error("access of {len} bytes at page {index} offset {offset:#x} exceeds page size {page_size}")]
    PageOffsetOutOfBounds {
        index: u32,
        offset: u32,
        len: usize,
        page_size: u32,
    },

    /// A table entry references data outside its target table.
    #[error("invalid {table} entry {index}: {detail}")]
    InvalidTableRange {
        table: &'static str,
        index: usize,
        detail: String,
    },

    #[error("segment {segment} declares {declared} bytes but its pages need {required}")]
    SegmentOverflow {
        segment: usize,
        declared: u64,
        required: u64,
    },

    /// The header's sizes disagree with the byte stream.
    #[error("{what}: expected {expected} bytes, found {actual}")]
    SizeMismatch {
        what: &'static str,
        expected: u64,
        actual: u64,
    },

    #[error("patch sub-header covers {actual} pages, container has {expected}")]
    PatchPageCountMismatch { expected: u16, actual: u32 },
}

/// Result type for format operations.
pub type Result<T> = std::result::Result<T, FormatError>;
