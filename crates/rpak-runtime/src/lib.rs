//! Asynchronous container loading for RPak files.
//!
//! A [`PakRuntime`] owns the container table, the global asset registry and
//! the asset type bindings. Loading a container runs a resumable state
//! machine that reads the file in chunks through an [`AsyncIo`] service,
//! decodes the body, applies a patch chain when there is one, copies pages
//! into caller-provided buffers, hands assets to a [`JobDispatcher`],
//! resolves cross-asset dependencies and finally publishes every asset.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rpak_runtime::{DefaultAllocator, IoPriority, LoadFlags, PakConfig, PakRuntime, PakStatus};
//!
//! let config = PakConfig::load("rpak.toml")?;
//! let runtime = PakRuntime::threaded(config, 0)?;
//! let handle = runtime
//!     .load("common.rpak", Arc::new(DefaultAllocator), IoPriority::Normal, LoadFlags::NONE)
//!     .expect("container table full");
//!
//! if runtime.wait(handle) == PakStatus::Loaded {
//!     println!("{} assets", runtime.info(handle).map_or(0, |info| info.asset_count));
//! }
//! # Ok::<(), rpak_runtime::ConfigError>(())
//! ```

use std::hash::BuildHasherDefault;

use rustc_hash::FxHasher;

mod alloc;
mod bindings;
mod chain;
mod config;
mod error;
pub mod io;
mod jobs;
mod loader;
mod pages;
mod reader;
mod registry;
mod resolve;
mod runtime;
mod status;
mod streaming;

pub use alloc::{CountingAllocator, DefaultAllocator, PageAllocator, PageBuffer};
pub use bindings::{AssetBinding, AssetContext, AssetLoader, TypeBindings, MAX_TYPE_BINDINGS, UNKNOWN_TYPE};
pub use config::{chain_file_name, unqualified, PakConfig, PakPaths};
pub use error::{
    BindingError, ConfigError, IoError, LoadError, LoaderError, RegistryError, ResolveError, Result,
};
pub use io::{AsyncIo, FileHandle, IoPriority, MemoryIo, ReadStatus, RequestId, ThreadedFileIo};
pub use jobs::{InlineDispatcher, Job, JobDispatcher, JobLimiter, JobTracker, RayonDispatcher};
pub use pages::PageArena;
pub use registry::{AssetRegistry, RegistryEntry};
pub use resolve::ResolvedRef;
pub use runtime::{PakInfo, PakRuntime};
pub use status::{LoadFlags, PakHandle, PakStatus};
pub use streaming::{InstallProgress, StreamingFile, StreamingSet, StreamingSetKind, StreamingSets};

/// `HashMap` with the Fx hasher.
pub(crate) type FxHashMap<K, V> = hashbrown::HashMap<K, V, BuildHasherDefault<FxHasher>>;

/// `HashSet` with the Fx hasher.
pub(crate) type FxHashSet<T> = hashbrown::HashSet<T, BuildHasherDefault<FxHasher>>;
