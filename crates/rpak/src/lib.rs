//! Rpak - reading, converting and loading RPak asset containers.
//!
//! This crate re-exports the rpak crates under one roof.
//!
//! # Crates
//!
//! - [`rpak_common`] - Binary reading, GUIDs and four-character codes
//! - [`rpak_format`] - Container header, tables and the container builder
//! - [`rpak_codec`] - Streaming DEFLATE/Zstandard body decoder
//! - [`rpak_patch`] - Patch edit-stream interpreter
//! - [`rpak_runtime`] - Asynchronous loading, asset registry and streaming sets
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rpak::prelude::*;
//!
//! let runtime = PakRuntime::threaded(PakConfig::default(), 0)?;
//! let handle = runtime
//!     .load("common.rpak", Arc::new(DefaultAllocator), IoPriority::Normal, LoadFlags::NONE)
//!     .expect("container table full");
//!
//! match runtime.wait(handle) {
//!     PakStatus::Loaded => println!("{} assets published", runtime.registry().len()),
//!     status => println!("{status}: {:?}", runtime.error(handle)),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use rpak_codec as codec;
pub use rpak_common as common;
pub use rpak_format as format;
pub use rpak_patch as patch;
pub use rpak_runtime as runtime;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use rpak_codec::{decode_container, encode_container, DecoderConfig, StreamDecoder};
    pub use rpak_common::{BinaryReader, FourCc, PakGuid};
    pub use rpak_format::{Compression, FormatLimits, PagePtr, PakContainer, PakHeader};
    pub use rpak_patch::{EditStream, PatchEngine};
    pub use rpak_runtime::{
        AssetBinding, AssetContext, AssetLoader, DefaultAllocator, IoPriority, LoadError, LoadFlags, PakConfig,
        PakHandle, PakRuntime, PakStatus,
    };
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
