//! The 128-byte container header.

use rpak_common::BinaryReader;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{ContainerLayout, FormatError, Result};

/// Body compression declared by the header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Body stored as-is.
    Stored,
    /// Primary codec (raw DEFLATE).
    Deflate,
    /// Alternate codec (Zstandard).
    Zstd,
}

impl Compression {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::Deflate => "deflate",
            Self::Zstd => "zstd",
        }
    }
}

/// Hard limits checked before any page memory is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatLimits {
    pub max_segments: u16,
    pub max_assets: u32,
}

impl Default for FormatLimits {
    fn default() -> Self {
        Self {
            max_segments: 20,
            max_assets: 0x40000,
        }
    }
}

/// Container file header.
///
/// Always stored uncompressed at the start of the file. Every table offset
/// after it is derived from the counts held here.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct PakHeader {
    pub magic: u32,
    pub version: u16,
    pub flags: u16,
    pub file_time: u64,
    /// Carried through, never verified.
    pub checksum: u64,
    /// Size of the file on disk.
    pub compressed_size: u64,
    pub embedded_offset: u64,
    pub embedded_opt_offset: u64,
    /// Size of the decoded stream, header included.
    pub decompressed_size: u64,
    pub embedded_size: u64,
    pub embedded_opt_size: u64,
    pub stream_names_size: u16,
    pub opt_stream_names_size: u16,
    pub segment_count: u16,
    pub page_count: u16,
    /// Number of patch chain entries; zero for a base container.
    pub patch_index: u32,
    pub pointer_count: u32,
    pub asset_count: u32,
    pub guid_count: u32,
    pub relation_count: u32,
    pub reserved0: [u8; 16],
    pub page_offset: u32,
    pub reserved1: [u8; 8],
}

impl PakHeader {
    /// `RPak` in file order.
    pub const MAGIC: u32 = u32::from_le_bytes(*b"RPak");

    pub const VERSION: u16 = 8;

    pub const SIZE: usize = 128;

    pub const FLAG_COMPANION_MODULE: u16 = 0x1;
    pub const FLAG_COMPRESSED: u16 = 0x100;
    pub const FLAG_ALTERNATE_CODEC: u16 = 0x200;

    /// A fresh header with magic and version filled in.
    pub fn new() -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            ..Self::default()
        }
    }

    /// Read a header from the first 128 bytes of `bytes`. No validation.
    pub fn read(bytes: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(bytes);
        Ok(reader.read_struct::<Self>()?)
    }

    /// Check magic, version and the limits that must hold before anything
    /// is allocated for this container.
    pub fn validate(&self, limits: &FormatLimits) -> Result<()> {
        if self.magic != Self::MAGIC {
            return Err(FormatError::BadMagic {
                expected: Self::MAGIC,
                found: self.magic,
            });
        }
        if self.version != Self::VERSION {
            return Err(FormatError::UnsupportedVersion {
                expected: Self::VERSION,
                found: self.version,
            });
        }
        if self.segment_count > limits.max_segments {
            return Err(FormatError::TooManySegments {
                count: self.segment_count,
                max: limits.max_segments,
            });
        }
        if self.asset_count > limits.max_assets {
            return Err(FormatError::TooManyAssets {
                count: self.asset_count,
                max: limits.max_assets,
            });
        }
        if self.decompressed_size < Self::SIZE as u64 || self.compressed_size < Self::SIZE as u64 {
            return Err(FormatError::SizeMismatch {
                what: "container size",
                expected: Self::SIZE as u64,
                actual: self.decompressed_size.min(self.compressed_size),
            });
        }

        // The table region is buffered whole before anything else is read.
        let layout = ContainerLayout::new(self);
        let tables_end = if self.is_patched() {
            layout.patch_area.end
        } else {
            layout.total_header_size
        } as u64;
        if tables_end > self.decompressed_size {
            return Err(FormatError::SizeMismatch {
                what: "container tables",
                expected: tables_end,
                actual: self.decompressed_size,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn is_patched(&self) -> bool {
        self.patch_index > 0
    }

    #[inline]
    pub fn has_companion_module(&self) -> bool {
        self.flags & Self::FLAG_COMPANION_MODULE != 0
    }

    pub fn compression(&self) -> Compression {
        if self.flags & Self::FLAG_COMPRESSED == 0 {
            Compression::Stored
        } else if self.flags & Self::FLAG_ALTERNATE_CODEC != 0 {
            Compression::Zstd
        } else {
            Compression::Deflate
        }
    }

    pub fn set_compression(&mut self, compression: Compression) {
        self.flags &= !(Self::FLAG_COMPRESSED | Self::FLAG_ALTERNATE_CODEC);
        match compression {
            Compression::Stored => {}
            Compression::Deflate => self.flags |= Self::FLAG_COMPRESSED,
            Compression::Zstd => self.flags |= Self::FLAG_COMPRESSED | Self::FLAG_ALTERNATE_CODEC,
        }
    }

    /// Bytes of codec input following the header on disk.
    #[inline]
    pub fn body_compressed_size(&self) -> u64 {
        self.compressed_size.saturating_sub(Self::SIZE as u64)
    }

    /// Bytes of decoded output following the header.
    #[inline]
    pub fn body_decompressed_size(&self) -> u64 {
        self.decompressed_size.saturating_sub(Self::SIZE as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_128_bytes() {
        assert_eq!(std::mem::size_of::<PakHeader>(), PakHeader::SIZE);
    }

    #[test]
    fn test_field_offsets() {
        let mut header = PakHeader::new();
        header.segment_count = 0x1122;
        header.patch_index = 0x3344_5566;
        header.page_offset = 0x7788_99AA;

        let bytes = header.as_bytes();
        assert_eq!(&bytes[0..4], b"RPak");
        assert_eq!(&bytes[4..6], &8u16.to_le_bytes());
        assert_eq!(&bytes[0x4C..0x4E], &0x1122u16.to_le_bytes());
        assert_eq!(&bytes[0x50..0x54], &0x3344_5566u32.to_le_bytes());
        assert_eq!(&bytes[0x74..0x78], &0x7788_99AAu32.to_le_bytes());
    }

    #[test]
    fn test_validate_rejects_bad_magic_and_version() {
        let limits = FormatLimits::default();
        let mut header = PakHeader::new();
        header.compressed_size = 128;
        header.decompressed_size = 128;
        assert!(header.validate(&limits).is_ok());

        header.magic = 0xDEAD_BEEF;
        assert!(matches!(
            header.validate(&limits),
            Err(FormatError::BadMagic { found: 0xDEAD_BEEF, .. })
        ));

        header.magic = PakHeader::MAGIC;
        header.version = 7;
        assert!(matches!(
            header.validate(&limits),
            Err(FormatError::UnsupportedVersion { found: 7, .. })
        ));
    }

    #[test]
    fn test_validate_segment_limit() {
        let limits = FormatLimits::default();
        let mut header = PakHeader::new();
        header.compressed_size = 128;
        header.decompressed_size = 4096;

        header.segment_count = limits.max_segments;
        assert!(header.validate(&limits).is_ok());

        header.segment_count = limits.max_segments + 1;
        assert!(matches!(
            header.validate(&limits),
            Err(FormatError::TooManySegments { count: 21, max: 20 })
        ));
    }

    #[test]
    fn test_validate_tables_fit_decoded_size() {
        let limits = FormatLimits::default();
        let mut header = PakHeader::new();
        header.compressed_size = 128;
        header.decompressed_size = 128 + 16 + 12;
        header.segment_count = 1;
        header.page_count = 1;
        assert!(header.validate(&limits).is_ok());

        header.relation_count = 0x0400_0000;
        assert!(matches!(
            header.validate(&limits),
            Err(FormatError::SizeMismatch {
                what: "container tables",
                expected: 0x1000_009C,
                actual: 156,
            })
        ));

        // Patch containers only buffer their patch area up front.
        header.relation_count = 0;
        header.segment_count = 20;
        header.patch_index = 1;
        assert!(header.validate(&limits).is_ok());
        header.patch_index = 3;
        assert!(header.validate(&limits).is_err());
    }

    #[test]
    fn test_compression_flags() {
        let mut header = PakHeader::new();
        assert_eq!(header.compression(), Compression::Stored);

        header.set_compression(Compression::Zstd);
        assert_eq!(header.flags, 0x300);
        assert_eq!(header.compression(), Compression::Zstd);

        header.flags |= PakHeader::FLAG_COMPANION_MODULE;
        header.set_compression(Compression::Deflate);
        assert_eq!(header.compression(), Compression::Deflate);
        assert!(header.has_companion_module());
    }
}
