//! Memory-mapped access to a container file for offline tools.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::{FormatError, FormatLimits, PakHeader, Result};

/// A container file mapped into memory with its header read and validated.
pub struct ContainerFile {
    mmap: Mmap,
    path: PathBuf,
    header: PakHeader,
}

impl ContainerFile {
    pub fn open(path: impl AsRef<Path>, limits: &FormatLimits) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: the map is read-only and the file is not expected to be
        // modified while the tool holds it.
        let mmap = unsafe { Mmap::map(&file)? };

        let header = PakHeader::read(&mmap)?;
        header.validate(limits)?;
        if (mmap.len() as u64) < header.compressed_size {
            return Err(FormatError::SizeMismatch {
                what: "container file",
                expected: header.compressed_size,
                actual: mmap.len() as u64,
            });
        }

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
            header,
        })
    }

    #[inline]
    pub fn header(&self) -> &PakHeader {
        &self.header
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole file.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }
}
