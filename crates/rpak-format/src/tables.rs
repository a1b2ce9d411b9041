//! Fixed-layout table records that follow the header.

use rpak_common::{FourCc, PakGuid};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// A (page index, byte offset) address inside a container's page arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct PagePtr {
    pub index: u32,
    pub offset: u32,
}

impl PagePtr {
    #[inline]
    pub const fn new(index: u32, offset: u32) -> Self {
        Self { index, offset }
    }

    /// Offset this pointer by `delta` bytes within the same page.
    #[inline]
    pub const fn add(self, delta: u32) -> Self {
        Self {
            index: self.index,
            offset: self.offset + delta,
        }
    }
}

/// What a segment's pages hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Asset headers and metadata.
    Head,
    /// Scratch data discarded after load.
    Temp,
    /// CPU-resident asset data.
    Cpu,
    /// Development-only data.
    Dev,
}

impl SegmentKind {
    pub const fn flags(self) -> u32 {
        match self {
            Self::Head => 0,
            Self::Temp => SegmentHeader::FLAG_TEMP,
            Self::Cpu => SegmentHeader::FLAG_CPU,
            Self::Dev => SegmentHeader::FLAG_DEV,
        }
    }

    /// Whether completing a page of this kind can make asset headers ready.
    pub const fn triggers_dispatch(self) -> bool {
        matches!(self, Self::Head | Self::Dev)
    }
}

#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SegmentHeader {
    pub flags: u32,
    pub alignment: u32,
    pub size: u64,
}

impl SegmentHeader {
    pub const FLAG_TEMP: u32 = 0x1;
    pub const FLAG_CPU: u32 = 0x2;
    pub const FLAG_DEV: u32 = 0x100;

    pub fn kind(&self) -> SegmentKind {
        if self.flags & Self::FLAG_DEV != 0 {
            SegmentKind::Dev
        } else if self.flags & Self::FLAG_TEMP != 0 {
            SegmentKind::Temp
        } else if self.flags & Self::FLAG_CPU != 0 {
            SegmentKind::Cpu
        } else {
            SegmentKind::Head
        }
    }
}

#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct PageHeader {
    pub segment: u32,
    pub alignment: u32,
    pub size: u32,
}

/// One asset table entry (80 bytes).
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct AssetEntry {
    pub guid: PakGuid,
    pub reserved: u64,
    /// Asset header location.
    pub head: PagePtr,
    /// Bulk data location; index `u32::MAX` when absent.
    pub data: PagePtr,
    pub stream_offset: u64,
    pub opt_stream_offset: u64,
    /// One past the highest page the header depends on.
    pub page_end: u16,
    /// Dependencies still awaiting resolution.
    pub remaining_dependencies: u16,
    pub relations_start: u32,
    pub dependencies_start: u32,
    pub relations_count: u32,
    pub dependencies_count: u32,
    pub header_size: u32,
    pub version: u32,
    pub tag: FourCc,
}

impl AssetEntry {
    pub const NO_DATA: PagePtr = PagePtr::new(u32::MAX, 0);

    pub fn has_data(&self) -> bool {
        self.data.index != u32::MAX
    }
}

/// Leading sub-header of a patch container.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct PatchDataHeader {
    pub edit_stream_size: u32,
    pub page_count: u32,
}

/// Expected sizes of one file in the patch chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct PatchFileHeader {
    /// On-disk size of the chain file.
    pub compressed_size: u64,
    pub decompressed_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<PagePtr>(), 8);
        assert_eq!(std::mem::size_of::<SegmentHeader>(), 16);
        assert_eq!(std::mem::size_of::<PageHeader>(), 12);
        assert_eq!(std::mem::size_of::<AssetEntry>(), 80);
        assert_eq!(std::mem::size_of::<PatchDataHeader>(), 8);
        assert_eq!(std::mem::size_of::<PatchFileHeader>(), 16);
    }

    #[test]
    fn test_segment_kind_precedence() {
        let mut header = SegmentHeader::default();
        assert_eq!(header.kind(), SegmentKind::Head);

        header.flags = SegmentHeader::FLAG_CPU;
        assert_eq!(header.kind(), SegmentKind::Cpu);

        header.flags = SegmentHeader::FLAG_TEMP | SegmentHeader::FLAG_CPU;
        assert_eq!(header.kind(), SegmentKind::Temp);

        header.flags = SegmentHeader::FLAG_DEV | SegmentHeader::FLAG_TEMP;
        assert_eq!(header.kind(), SegmentKind::Dev);
        assert!(SegmentKind::Dev.triggers_dispatch());
        assert!(!SegmentKind::Temp.triggers_dispatch());
    }
}
