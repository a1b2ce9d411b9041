//! Error types for the runtime.

use std::path::PathBuf;

use rpak_common::{FourCc, PakGuid};
use thiserror::Error;

/// File and read failures.
#[derive(Debug, Clone, Error)]
pub enum IoError {
    #[error("cannot open {name}: not found in {tried:?}")]
    OpenFailed { name: String, tried: Vec<PathBuf> },

    #[error("cannot determine the size of {0}")]
    UnknownSize(PathBuf),

    #[error("{path} is {size} bytes, header declares {expected}")]
    Truncated { path: PathBuf, size: u64, expected: u64 },

    #[error("read of {len} bytes at {offset} in {path} failed: {message}")]
    ReadFailed {
        path: PathBuf,
        offset: u64,
        len: usize,
        message: String,
    },

    #[error("read at {offset} in {path} was canceled")]
    ReadCanceled { path: PathBuf, offset: u64 },

    #[error("mandatory streaming file {0} is missing")]
    MissingStreamingFile(PathBuf),
}

/// Dependency resolution failures.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("asset {asset_guid} depends on {target_guid}, which is not loaded")]
    UnresolvedDependency { asset_guid: PakGuid, target_guid: PakGuid },
}

/// Registry publication failures.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("asset {0} is already registered")]
    DuplicateGuid(PakGuid),

    #[error("registry is full: {len} entries, {requested} more requested, capacity {capacity}")]
    Full {
        len: usize,
        requested: usize,
        capacity: usize,
    },
}

/// Type binding table failures.
#[derive(Debug, Clone, Error)]
pub enum BindingError {
    #[error("asset type {0} is already bound")]
    AlreadyBound(FourCc),

    #[error("type binding table is full ({0} types)")]
    TableFull(usize),
}

/// A per-asset load callback failed.
#[derive(Debug, Clone, Error)]
#[error("{tag} asset {guid}: {message}")]
pub struct LoaderError {
    pub guid: PakGuid,
    pub tag: FourCc,
    pub message: String,
}

impl LoaderError {
    pub fn new(guid: PakGuid, tag: FourCc, message: impl Into<String>) -> Self {
        Self {
            guid,
            tag,
            message: message.into(),
        }
    }
}

/// Configuration file failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("cannot start {what}: {message}")]
    Startup { what: &'static str, message: String },
}

/// Why a container load failed.
///
/// Cloned into [`PakRuntime::error`](crate::PakRuntime::error), so codec and
/// format errors are kept as their messages.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error(transparent)]
    Io(#[from] IoError),

    #[error("{0}")]
    Format(String),

    #[error("{0}")]
    Decode(String),

    #[error("{0}")]
    Patch(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error("asset job failed: {0}")]
    Job(#[from] LoaderError),
}

impl From<rpak_format::FormatError> for LoadError {
    fn from(error: rpak_format::FormatError) -> Self {
        Self::Format(error.to_string())
    }
}

impl From<rpak_codec::DecodeError> for LoadError {
    fn from(error: rpak_codec::DecodeError) -> Self {
        Self::Decode(error.to_string())
    }
}

impl From<rpak_patch::PatchError> for LoadError {
    fn from(error: rpak_patch::PatchError) -> Self {
        Self::Patch(error.to_string())
    }
}

impl From<rpak_common::Error> for LoadError {
    fn from(error: rpak_common::Error) -> Self {
        Self::Format(error.to_string())
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, LoadError>;
