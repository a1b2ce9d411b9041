//! RPak container format model.
//!
//! A container file starts with a fixed 128-byte [`PakHeader`]. Every table
//! after it (patch area, streaming file names, segments, pages, pointer
//! descriptors, assets, GUID descriptors, relations) sits at an offset that
//! is derived purely from counts in the header, see [`ContainerLayout`].
//! Page data follows the tables, pages concatenated in index order.
//!
//! Data inside pages is addressed with [`PagePtr`] (page index, byte offset)
//! pairs rather than raw pointers.
//!
//! # Example
//!
//! ```no_run
//! use rpak_format::{ContainerFile, FormatLimits};
//!
//! let file = ContainerFile::open("common.rpak", &FormatLimits::default())?;
//! println!("{} assets", file.header().asset_count);
//! # Ok::<(), rpak_format::FormatError>(())
//! ```

mod builder;
mod container;
mod error;
mod file;
mod header;
mod layout;
mod tables;

pub use builder::{AssetSpec, PakBuilder, PatchSpec};
pub use container::{PakContainer, PatchInfo};
pub use error::{FormatError, Result};
pub use file::ContainerFile;
pub use header::{Compression, FormatLimits, PakHeader};
pub use layout::ContainerLayout;
pub use tables::{
    AssetEntry, PageHeader, PagePtr, PatchDataHeader, PatchFileHeader, SegmentHeader, SegmentKind,
};
