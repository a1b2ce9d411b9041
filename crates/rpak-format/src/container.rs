//! Parsed container tables and page addressing.

use rpak_common::{split_cstrings, BinaryReader};

use crate::layout::ContainerLayout;
use crate::tables::{AssetEntry, PageHeader, PagePtr, PatchDataHeader, PatchFileHeader, SegmentHeader, SegmentKind};
use crate::{FormatError, FormatLimits, PakHeader, Result};

/// The patch area of a patch container.
#[derive(Debug, Clone)]
pub struct PatchInfo {
    pub data: PatchDataHeader,
    pub files: Vec<PatchFileHeader>,
    /// Chain file numbers, oldest first.
    pub numbers: Vec<u16>,
}

impl PatchInfo {
    /// Parse the patch area from a decoded stream that holds at least the
    /// header and the patch area.
    pub fn parse(bytes: &[u8], header: &PakHeader) -> Result<Self> {
        let layout = ContainerLayout::new(header);
        let mut reader = BinaryReader::new_at(bytes, layout.patch_area.start);
        let patches = header.patch_index as usize;

        let data: PatchDataHeader = reader.read_struct()?;
        let files = reader.read_array::<PatchFileHeader>(patches)?;
        let mut numbers = Vec::with_capacity(patches);
        for _ in 0..patches {
            numbers.push(reader.read_u16()?);
        }

        if data.page_count != u32::from(header.page_count) {
            return Err(FormatError::PatchPageCountMismatch {
                expected: header.page_count,
                actual: data.page_count,
            });
        }

        Ok(Self { data, files, numbers })
    }

    /// Decoded size the patch container itself must have.
    pub fn expected_stream_size(&self, header: &PakHeader) -> u64 {
        ContainerLayout::new(header).patch_area.end as u64 + u64::from(self.data.edit_stream_size)
    }
}

/// A container's header and tables, with page offsets precomputed.
#[derive(Debug, Clone)]
pub struct PakContainer {
    header: PakHeader,
    layout: ContainerLayout,
    stream_names: Vec<String>,
    opt_stream_names: Vec<String>,
    segments: Vec<SegmentHeader>,
    pages: Vec<PageHeader>,
    pointers: Vec<PagePtr>,
    assets: Vec<AssetEntry>,
    guid_descriptors: Vec<PagePtr>,
    relations: Vec<u32>,
    /// Offset of each page within the page data region.
    page_offsets: Vec<u64>,
}

impl PakContainer {
    /// Parse the tables out of `meta`, which holds at least the first
    /// `total_header_size` bytes of the decoded stream.
    pub fn parse(meta: &[u8], limits: &FormatLimits) -> Result<Self> {
        let header = PakHeader::read(meta)?;
        header.validate(limits)?;

        let layout = ContainerLayout::new(&header);
        if meta.len() < layout.total_header_size {
            return Err(FormatError::SizeMismatch {
                what: "container tables",
                expected: layout.total_header_size as u64,
                actual: meta.len() as u64,
            });
        }

        let stream_names = owned_names(&meta[layout.stream_names.clone()])?;
        let opt_stream_names = owned_names(&meta[layout.opt_stream_names.clone()])?;

        let mut reader = BinaryReader::new_at(meta, layout.segments.start);
        let segments = reader.read_array::<SegmentHeader>(header.segment_count as usize)?;
        let pages = reader.read_array::<PageHeader>(header.page_count as usize)?;
        let pointers = reader.read_array::<PagePtr>(header.pointer_count as usize)?;
        let assets = reader.read_array::<AssetEntry>(header.asset_count as usize)?;
        let guid_descriptors = reader.read_array::<PagePtr>(header.guid_count as usize)?;
        let mut relations = Vec::with_capacity(header.relation_count as usize);
        for _ in 0..header.relation_count {
            relations.push(reader.read_u32()?);
        }

        let mut page_offsets = Vec::with_capacity(pages.len());
        let mut offset = 0u64;
        for page in &pages {
            page_offsets.push(offset);
            offset += u64::from(page.size);
        }

        let container = Self {
            header,
            layout,
            stream_names,
            opt_stream_names,
            segments,
            pages,
            pointers,
            assets,
            guid_descriptors,
            relations,
            page_offsets,
        };
        container.validate_tables()?;
        Ok(container)
    }

    fn validate_tables(&self) -> Result<()> {
        let page_count = self.pages.len();

        let mut required = vec![0u64; self.segments.len()];
        for (index, page) in self.pages.iter().enumerate() {
            let segment = page.segment as usize;
            if segment >= self.segments.len() {
                return Err(FormatError::InvalidTableRange {
                    table: "page",
                    index,
                    detail: format!("segment {} of {}", page.segment, self.segments.len()),
                });
            }
            if page.alignment != 0 && !page.alignment.is_power_of_two() {
                return Err(FormatError::InvalidTableRange {
                    table: "page",
                    index,
                    detail: format!("alignment {} is not a power of two", page.alignment),
                });
            }
            required[segment] += align_up(u64::from(page.size), u64::from(page.alignment.max(1)));
        }

        for (segment, (header, need)) in self.segments.iter().zip(&required).enumerate() {
            if *need > header.size {
                return Err(FormatError::SegmentOverflow {
                    segment,
                    declared: header.size,
                    required: *need,
                });
            }
        }

        for (index, asset) in self.assets.iter().enumerate() {
            let head = asset.head;
            if head.index as usize >= page_count {
                return Err(FormatError::InvalidTableRange {
                    table: "asset",
                    index,
                    detail: format!("head page {} of {page_count}", head.index),
                });
            }
            self.check_page_pointer(head, asset.header_size as usize)?;
            if (asset.page_end as usize) <= head.index as usize || asset.page_end as usize > page_count {
                return Err(FormatError::InvalidTableRange {
                    table: "asset",
                    index,
                    detail: format!("page end {} for head page {}", asset.page_end, head.index),
                });
            }
            if asset.remaining_dependencies as u32 > asset.dependencies_count {
                return Err(FormatError::InvalidTableRange {
                    table: "asset",
                    index,
                    detail: format!(
                        "{} remaining of {} dependencies",
                        asset.remaining_dependencies, asset.dependencies_count
                    ),
                });
            }
            check_range(
                "asset dependencies",
                index,
                asset.dependencies_start,
                asset.dependencies_count,
                self.guid_descriptors.len(),
            )?;
            check_range(
                "asset relations",
                index,
                asset.relations_start,
                asset.relations_count,
                self.relations.len(),
            )?;
        }

        for (index, relation) in self.relations.iter().enumerate() {
            if *relation as usize >= self.assets.len() {
                return Err(FormatError::InvalidTableRange {
                    table: "relation",
                    index,
                    detail: format!("asset {relation} of {}", self.assets.len()),
                });
            }
        }

        for (index, descriptor) in self.guid_descriptors.iter().enumerate() {
            if descriptor.index as usize >= page_count {
                return Err(FormatError::InvalidTableRange {
                    table: "guid descriptor",
                    index,
                    detail: format!("page {} of {page_count}", descriptor.index),
                });
            }
        }

        Ok(())
    }

    #[inline]
    pub fn header(&self) -> &PakHeader {
        &self.header
    }

    #[inline]
    pub fn layout(&self) -> &ContainerLayout {
        &self.layout
    }

    #[inline]
    pub fn total_header_size(&self) -> usize {
        self.layout.total_header_size
    }

    pub fn stream_names(&self) -> &[String] {
        &self.stream_names
    }

    pub fn opt_stream_names(&self) -> &[String] {
        &self.opt_stream_names
    }

    pub fn segments(&self) -> &[SegmentHeader] {
        &self.segments
    }

    pub fn pages(&self) -> &[PageHeader] {
        &self.pages
    }

    pub fn pointers(&self) -> &[PagePtr] {
        &self.pointers
    }

    pub fn assets(&self) -> &[AssetEntry] {
        &self.assets
    }

    pub fn guid_descriptors(&self) -> &[PagePtr] {
        &self.guid_descriptors
    }

    pub fn relations(&self) -> &[u32] {
        &self.relations
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Size in bytes of page `index`.
    pub fn page_size(&self, index: usize) -> Result<u32> {
        self.pages
            .get(index)
            .map(|page| page.size)
            .ok_or(FormatError::InvalidPagePointer {
                index: index as u32,
                offset: 0,
                page_count: self.header.page_count,
            })
    }

    /// Declared size in bytes of segment `index`.
    pub fn segment_size(&self, index: usize) -> Result<u64> {
        self.segments
            .get(index)
            .map(|segment| segment.size)
            .ok_or(FormatError::InvalidTableRange {
                table: "segment",
                index,
                detail: format!("out of {} segments", self.segments.len()),
            })
    }

    /// Kind of the segment that owns page `index`.
    pub fn page_kind(&self, index: usize) -> Option<SegmentKind> {
        let page = self.pages.get(index)?;
        self.segments.get(page.segment as usize).map(SegmentHeader::kind)
    }

    /// Offset of page `index` from the start of the decoded stream.
    pub fn page_stream_offset(&self, index: usize) -> Option<u64> {
        self.page_offsets
            .get(index)
            .map(|offset| self.layout.total_header_size as u64 + offset)
    }

    /// Total bytes of page data following the tables.
    pub fn page_data_size(&self) -> u64 {
        self.pages.iter().map(|page| u64::from(page.size)).sum()
    }

    /// Map a page pointer to its offset in the decoded stream.
    ///
    /// Only the page index is checked; use [`check_page_pointer`] before
    /// dereferencing.
    ///
    /// [`check_page_pointer`]: Self::check_page_pointer
    pub fn resolve_page_pointer(&self, ptr: PagePtr) -> Result<u64> {
        match self.page_stream_offset(ptr.index as usize) {
            Some(base) => Ok(base + u64::from(ptr.offset)),
            None => Err(FormatError::InvalidPagePointer {
                index: ptr.index,
                offset: ptr.offset,
                page_count: self.header.page_count,
            }),
        }
    }

    /// Verify that `len` bytes at `ptr` lie inside one page.
    pub fn check_page_pointer(&self, ptr: PagePtr, len: usize) -> Result<()> {
        let page_size = self.pages.get(ptr.index as usize).map(|page| page.size).ok_or(
            FormatError::InvalidPagePointer {
                index: ptr.index,
                offset: ptr.offset,
                page_count: self.header.page_count,
            },
        )?;

        let end = u64::from(ptr.offset) + len as u64;
        if end > u64::from(page_size) {
            return Err(FormatError::PageOffsetOutOfBounds {
                index: ptr.index,
                offset: ptr.offset,
                len,
                page_size,
            });
        }
        Ok(())
    }

    /// Position of the asset with `guid` in the asset table.
    pub fn find_asset(&self, guid: rpak_common::PakGuid) -> Option<usize> {
        self.assets.iter().position(|asset| asset.guid == guid)
    }
}

fn owned_names(buffer: &[u8]) -> Result<Vec<String>> {
    Ok(split_cstrings(buffer)?.into_iter().map(str::to_owned).collect())
}

fn check_range(table: &'static str, index: usize, start: u32, count: u32, len: usize) -> Result<()> {
    let end = start as u64 + count as u64;
    if end > len as u64 {
        return Err(FormatError::InvalidTableRange {
            table,
            index,
            detail: format!("range {start}..{end} exceeds {len} entries"),
        });
    }
    Ok(())
}

#[inline]
pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{AssetSpec, PakBuilder};
    use proptest::prelude::*;
    use rpak_common::{FourCc, PakGuid};

    fn two_page_container() -> PakContainer {
        let mut builder = PakBuilder::new();
        let head = builder.add_segment(SegmentKind::Head, 8);
        let cpu = builder.add_segment(SegmentKind::Cpu, 16);
        builder.add_page(head, 8, vec![0xAA; 48]);
        builder.add_page(cpu, 16, vec![0xBB; 100]);
        builder.add_asset(AssetSpec::new(
            PakGuid::new(0x10),
            FourCc::from_bytes(*b"txtr"),
            PagePtr::new(0, 0),
            32,
        ));
        builder.stream_names(&["paks/Win64/a.starpak"]);

        let bytes = builder.build();
        PakContainer::parse(&bytes, &FormatLimits::default()).unwrap()
    }

    #[test]
    fn test_parse_round_trips_tables() {
        let container = two_page_container();
        assert_eq!(container.page_count(), 2);
        assert_eq!(container.page_size(1).unwrap(), 100);
        assert_eq!(container.segment_size(0).unwrap(), 48);
        assert_eq!(container.segment_size(1).unwrap(), 112);
        assert_eq!(container.page_kind(1), Some(SegmentKind::Cpu));
        assert_eq!(container.stream_names(), &["paks/Win64/a.starpak".to_string()]);
        assert_eq!(container.assets()[0].tag, FourCc::from_bytes(*b"txtr"));
        assert_eq!(container.find_asset(PakGuid::new(0x10)), Some(0));
    }

    #[test]
    fn test_resolve_page_pointer_offsets() {
        let container = two_page_container();
        let base = container.total_header_size() as u64;
        assert_eq!(container.resolve_page_pointer(PagePtr::new(0, 4)).unwrap(), base + 4);
        assert_eq!(container.resolve_page_pointer(PagePtr::new(1, 0)).unwrap(), base + 48);
        assert!(matches!(
            container.resolve_page_pointer(PagePtr::new(2, 0)),
            Err(FormatError::InvalidPagePointer { index: 2, page_count: 2, .. })
        ));
    }

    #[test]
    fn test_strict_pointer_check() {
        let container = two_page_container();
        assert!(container.check_page_pointer(PagePtr::new(0, 40), 8).is_ok());
        assert!(matches!(
            container.check_page_pointer(PagePtr::new(0, 41), 8),
            Err(FormatError::PageOffsetOutOfBounds { page_size: 48, .. })
        ));
    }

    #[test]
    fn test_rejects_asset_header_outside_page() {
        let mut builder = PakBuilder::new();
        let head = builder.add_segment(SegmentKind::Head, 8);
        builder.add_page(head, 8, vec![0; 16]);
        builder.add_asset(AssetSpec::new(
            PakGuid::new(1),
            FourCc::from_bytes(*b"matl"),
            PagePtr::new(0, 8),
            16,
        ));

        let bytes = builder.build();
        assert!(matches!(
            PakContainer::parse(&bytes, &FormatLimits::default()),
            Err(FormatError::PageOffsetOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_rejects_truncated_tables() {
        let bytes = two_page_container_bytes();
        let cut = ContainerLayout::new(&PakHeader::read(&bytes).unwrap()).total_header_size - 1;
        assert!(matches!(
            PakContainer::parse(&bytes[..cut], &FormatLimits::default()),
            Err(FormatError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_patch_info_requires_matching_page_count() {
        let mut header = PakHeader::new();
        header.page_count = 3;
        header.patch_index = 1;

        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&1000u64.to_le_bytes());
        bytes.extend_from_slice(&2000u64.to_le_bytes());
        bytes.extend_from_slice(&7u16.to_le_bytes());

        let info = PatchInfo::parse(&bytes, &header).unwrap();
        assert_eq!(info.numbers, vec![7]);
        assert_eq!(info.files[0].decompressed_size, 2000);
        assert_eq!(info.expected_stream_size(&header), 128 + 26 + 16);

        header.page_count = 4;
        assert!(matches!(
            PatchInfo::parse(&bytes, &header),
            Err(FormatError::PatchPageCountMismatch { expected: 4, actual: 3 })
        ));
    }

    fn two_page_container_bytes() -> Vec<u8> {
        let mut builder = PakBuilder::new();
        let head = builder.add_segment(SegmentKind::Head, 8);
        builder.add_page(head, 8, vec![0; 8]);
        builder.add_page(head, 8, vec![0; 8]);
        builder.build()
    }

    proptest! {
        #[test]
        fn resolve_succeeds_iff_index_in_range(
            sizes in proptest::collection::vec(1u32..256, 0..8),
            index in 0u32..12,
            offset in 0u32..4096,
        ) {
            let mut builder = PakBuilder::new();
            let head = builder.add_segment(SegmentKind::Head, 1);
            for size in &sizes {
                builder.add_page(head, 1, vec![0; *size as usize]);
            }
            let container = PakContainer::parse(&builder.build(), &FormatLimits::default()).unwrap();

            let result = container.resolve_page_pointer(PagePtr::new(index, offset));
            prop_assert_eq!(result.is_ok(), (index as usize) < sizes.len());
        }
    }
}
