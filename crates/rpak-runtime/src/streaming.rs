//! Streaming sets.
//!
//! Large asset payloads live outside the container, in a mandatory and an
//! optional set of companion files named in the container's name buffers.
//! A container may instead embed a set after its body, in which case the
//! set is one virtual file: the container itself, found in the platform
//! directory.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, info, warn};
use rpak_format::PakContainer;

use crate::config::PakPaths;
use crate::error::IoError;
use crate::io::{AsyncIo, FileHandle, IoPriority};

/// Fraction of the install present on disk, in `[0, 1]`. Only moves up.
#[derive(Debug, Default)]
pub struct InstallProgress {
    bits: AtomicU32,
}

impl InstallProgress {
    pub fn new(fraction: f32) -> Self {
        let progress = Self::default();
        progress.set(fraction);
        progress
    }

    /// Raise the progress to `fraction`. Lower values are ignored.
    pub fn set(&self, fraction: f32) {
        let fraction = fraction.clamp(0.0, 1.0);
        let _ = self.bits.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
            (fraction > f32::from_bits(bits)).then(|| fraction.to_bits())
        });
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn is_complete(&self) -> bool {
        self.get() >= 1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamingSetKind {
    Mandatory,
    Optional,
}

impl StreamingSetKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mandatory => "mandatory",
            Self::Optional => "optional",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingFile {
    pub path: PathBuf,
    pub handle: FileHandle,
    /// Byte offset and size of an embedded payload within the file.
    pub embedded: Option<(u64, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingSet {
    pub kind: StreamingSetKind,
    pub files: Vec<StreamingFile>,
    /// False when the set was skipped or could not be opened.
    pub enabled: bool,
}

impl StreamingSet {
    fn disabled(kind: StreamingSetKind) -> Self {
        Self {
            kind,
            files: Vec::new(),
            enabled: false,
        }
    }
}

/// A container's open streaming files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingSets {
    pub mandatory: StreamingSet,
    pub optional: StreamingSet,
}

/// Where a set's files come from.
enum Source<'a> {
    Named(&'a [String]),
    Embedded { offset: u64, size: u64 },
}

pub(crate) struct StreamingRequest<'a> {
    pub io: &'a dyn AsyncIo,
    pub paths: &'a PakPaths,
    pub container_name: &'a str,
    pub container: &'a PakContainer,
    pub priority: IoPriority,
    pub open_mandatory: bool,
    pub open_optional: bool,
}

impl StreamingSets {
    pub(crate) fn open(request: &StreamingRequest<'_>) -> Result<Self, IoError> {
        let header = request.container.header();

        let mandatory = if !request.open_mandatory {
            StreamingSet::disabled(StreamingSetKind::Mandatory)
        } else {
            let source = if header.embedded_size > 0 {
                Source::Embedded {
                    offset: header.embedded_offset,
                    size: header.embedded_size,
                }
            } else {
                Source::Named(request.container.stream_names())
            };
            let files = open_files(request, &source).map_err(IoError::MissingStreamingFile)?;
            StreamingSet {
                kind: StreamingSetKind::Mandatory,
                files,
                enabled: true,
            }
        };

        let optional = if !request.open_optional {
            debug!("streaming: optional set of {} skipped", request.container_name);
            StreamingSet::disabled(StreamingSetKind::Optional)
        } else {
            let source = if header.embedded_opt_size > 0 {
                Source::Embedded {
                    offset: header.embedded_opt_offset,
                    size: header.embedded_opt_size,
                }
            } else {
                Source::Named(request.container.opt_stream_names())
            };
            match open_files(request, &source) {
                Ok(files) => StreamingSet {
                    kind: StreamingSetKind::Optional,
                    files,
                    enabled: true,
                },
                Err(path) => {
                    warn!(
                        "streaming: optional file {} missing, optional streaming disabled for {}",
                        path.display(),
                        request.container_name
                    );
                    StreamingSet::disabled(StreamingSetKind::Optional)
                }
            }
        };

        let sets = Self { mandatory, optional };
        if sets.file_count() > 0 {
            info!(
                "streaming: {} has {} mandatory and {} optional streaming files",
                request.container_name,
                sets.mandatory.files.len(),
                sets.optional.files.len()
            );
        }
        Ok(sets)
    }

    pub fn file_count(&self) -> usize {
        self.mandatory.files.len() + self.optional.files.len()
    }

    pub(crate) fn close(&mut self, io: &dyn AsyncIo) {
        for set in [&mut self.mandatory, &mut self.optional] {
            for file in set.files.drain(..) {
                io.close(file.handle);
            }
            set.enabled = false;
        }
    }
}

/// Open every file of a set, or none: the first missing path is returned
/// after closing what was already opened.
fn open_files(request: &StreamingRequest<'_>, source: &Source<'_>) -> Result<Vec<StreamingFile>, PathBuf> {
    match *source {
        Source::Embedded { offset, size } => {
            let path = request.paths.embedded_streaming_path(request.container_name);
            let handle = request.io.open(&path, request.priority).ok_or_else(|| path.clone())?;
            Ok(vec![StreamingFile {
                path,
                handle,
                embedded: Some((offset, size)),
            }])
        }
        Source::Named(names) => {
            let mut files = Vec::with_capacity(names.len());
            for name in names {
                let candidates = request.paths.candidates(name);
                let opened = candidates
                    .iter()
                    .find_map(|path| request.io.open(path, request.priority).map(|handle| (path, handle)));
                match opened {
                    Some((path, handle)) => files.push(StreamingFile {
                        path: path.clone(),
                        handle,
                        embedded: None,
                    }),
                    None => {
                        for file in files {
                            request.io.close(file.handle);
                        }
                        return Err(candidates.last().cloned().unwrap_or_else(|| PathBuf::from(name)));
                    }
                }
            }
            Ok(files)
        }
    }
}
