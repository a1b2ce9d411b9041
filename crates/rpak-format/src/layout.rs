//! Table offsets derived from header counts.

use std::mem::size_of;
use std::ops::Range;

use crate::tables::{AssetEntry, PageHeader, PagePtr, PatchDataHeader, PatchFileHeader, SegmentHeader};
use crate::PakHeader;

/// Byte ranges of every table in the decoded stream.
///
/// ```
/// use rpak_format::{ContainerLayout, PakHeader};
///
/// let mut header = PakHeader::new();
/// header.segment_count = 1;
/// header.page_count = 2;
///
/// let layout = ContainerLayout::new(&header);
/// assert_eq!(layout.segments, 128..144);
/// assert_eq!(layout.pages, 144..168);
/// assert_eq!(layout.total_header_size, 168);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLayout {
    /// Patch sub-header, file headers and patch numbers. Empty for base containers.
    pub patch_area: Range<usize>,
    pub patch_files: Range<usize>,
    pub patch_numbers: Range<usize>,
    pub stream_names: Range<usize>,
    pub opt_stream_names: Range<usize>,
    pub segments: Range<usize>,
    pub pages: Range<usize>,
    pub pointers: Range<usize>,
    pub assets: Range<usize>,
    pub guid_descriptors: Range<usize>,
    pub relations: Range<usize>,
    pub total_header_size: usize,
}

impl ContainerLayout {
    pub fn new(header: &PakHeader) -> Self {
        let mut cursor = PakHeader::SIZE;
        let mut take = |len: usize| {
            let range = cursor..cursor + len;
            cursor += len;
            range
        };

        let patches = header.patch_index as usize;
        let patch_data = take(if patches > 0 { size_of::<PatchDataHeader>() } else { 0 });
        let patch_files = take(patches * size_of::<PatchFileHeader>());
        let patch_numbers = take(patches * size_of::<u16>());
        let patch_area = patch_data.start..patch_numbers.end;

        let stream_names = take(header.stream_names_size as usize);
        let opt_stream_names = take(header.opt_stream_names_size as usize);
        let segments = take(header.segment_count as usize * size_of::<SegmentHeader>());
        let pages = take(header.page_count as usize * size_of::<PageHeader>());
        let pointers = take(header.pointer_count as usize * size_of::<PagePtr>());
        let assets = take(header.asset_count as usize * size_of::<AssetEntry>());
        let guid_descriptors = take(header.guid_count as usize * size_of::<PagePtr>());
        let relations = take(header.relation_count as usize * size_of::<u32>());

        Self {
            patch_area,
            patch_files,
            patch_numbers,
            stream_names,
            opt_stream_names,
            segments,
            pages,
            pointers,
            assets,
            guid_descriptors,
            relations,
            total_header_size: cursor,
        }
    }

    /// First byte that a patch chain reconstructs.
    #[inline]
    pub fn tables_start(&self) -> usize {
        self.stream_names.start
    }

    /// Size of the table region a patch chain reconstructs.
    #[inline]
    pub fn tables_len(&self) -> usize {
        self.total_header_size - self.tables_start()
    }
}
