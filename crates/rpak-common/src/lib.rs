//! Common utilities for rpak.
//!
//! This crate provides foundational types used across all rpak crates:
//!
//! - [`BinaryReader`] - Zero-copy little-endian reading from byte slices
//! - [`BitReader`] - LSB-first bit reading for patch command streams
//! - [`PakGuid`] - 64-bit asset identifier and the name hash that produces it
//! - [`FourCc`] - Four-character asset type tags

mod bits;
mod error;
mod fourcc;
mod guid;
mod reader;

pub use bits::BitReader;
pub use error::{Error, Result};
pub use fourcc::FourCc;
pub use guid::PakGuid;
pub use reader::{split_cstrings, BinaryReader};

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Re-export memchr for byte searching
pub use memchr;
