//! Authoring of uncompressed containers.
//!
//! Used by tests throughout the workspace and by the CLI's conversion
//! commands. Output is the decoded form; the codec crate compresses it.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use rpak_common::{FourCc, PakGuid};
use zerocopy::IntoBytes;

use crate::container::align_up;
use crate::tables::{AssetEntry, PageHeader, PagePtr, PatchDataHeader, PatchFileHeader, SegmentHeader, SegmentKind};
use crate::PakHeader;

/// Description of one asset to emit.
#[derive(Debug, Clone)]
pub struct AssetSpec {
    pub guid: PakGuid,
    pub tag: FourCc,
    pub version: u32,
    pub head: PagePtr,
    pub header_size: u32,
    pub data: PagePtr,
    /// Defaults to one past the head page.
    pub page_end: Option<u16>,
    /// Locations of GUID slots this asset depends on.
    pub dependencies: Vec<PagePtr>,
    /// Indices of assets that depend on this one.
    pub relations: Vec<u32>,
    pub stream_offset: u64,
    pub opt_stream_offset: u64,
}

impl AssetSpec {
    pub fn new(guid: PakGuid, tag: FourCc, head: PagePtr, header_size: u32) -> Self {
        Self {
            guid,
            tag,
            version: 1,
            head,
            header_size,
            data: AssetEntry::NO_DATA,
            page_end: None,
            dependencies: Vec::new(),
            relations: Vec::new(),
            stream_offset: 0,
            opt_stream_offset: 0,
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn data(mut self, data: PagePtr) -> Self {
        self.data = data;
        self
    }

    pub fn page_end(mut self, page_end: u16) -> Self {
        self.page_end = Some(page_end);
        self
    }

    pub fn dependencies(mut self, slots: impl IntoIterator<Item = PagePtr>) -> Self {
        self.dependencies.extend(slots);
        self
    }

    pub fn relations(mut self, assets: impl IntoIterator<Item = u32>) -> Self {
        self.relations.extend(assets);
        self
    }
}

/// Patch area and edit stream of a patch container.
#[derive(Debug, Clone, Default)]
pub struct PatchSpec {
    pub files: Vec<PatchFileHeader>,
    pub numbers: Vec<u16>,
    pub edit_stream: Vec<u8>,
}

/// Builds a container from segments, pages and assets.
///
/// ```
/// use rpak_common::{FourCc, PakGuid};
/// use rpak_format::{AssetSpec, FormatLimits, PagePtr, PakBuilder, PakContainer, SegmentKind};
///
/// let mut builder = PakBuilder::new();
/// let head = builder.add_segment(SegmentKind::Head, 8);
/// let page = builder.add_page(head, 8, vec![0; 64]);
/// builder.add_asset(AssetSpec::new(
///     PakGuid::from_name("ui/icons.rpak"),
///     FourCc::from_bytes(*b"uimg"),
///     PagePtr::new(page, 0),
///     64,
/// ));
///
/// let bytes = builder.build();
/// let container = PakContainer::parse(&bytes, &FormatLimits::default()).unwrap();
/// assert_eq!(container.assets().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PakBuilder {
    flags: u16,
    file_time: u64,
    segments: Vec<SegmentHeader>,
    pages: Vec<(PageHeader, Vec<u8>)>,
    pointers: Vec<PagePtr>,
    assets: Vec<AssetSpec>,
    stream_names: Vec<String>,
    opt_stream_names: Vec<String>,
    embedded: Vec<u8>,
    embedded_opt: Vec<u8>,
    patch: Option<PatchSpec>,
}

impl PakBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&mut self, flags: u16) -> &mut Self {
        self.flags = flags;
        self
    }

    pub fn file_time(&mut self, file_time: u64) -> &mut Self {
        self.file_time = file_time;
        self
    }

    /// Add a segment and return its index. Its size is computed from its pages.
    pub fn add_segment(&mut self, kind: SegmentKind, alignment: u32) -> u32 {
        self.segments.push(SegmentHeader {
            flags: kind.flags(),
            alignment,
            size: 0,
        });
        (self.segments.len() - 1) as u32
    }

    /// Add a page to `segment` and return its index.
    pub fn add_page(&mut self, segment: u32, alignment: u32, data: Vec<u8>) -> u32 {
        let header = PageHeader {
            segment,
            alignment,
            size: data.len() as u32,
        };
        self.pages.push((header, data));
        (self.pages.len() - 1) as u32
    }

    /// Mutable access to page contents added earlier.
    pub fn page_mut(&mut self, index: u32) -> Option<&mut Vec<u8>> {
        self.pages.get_mut(index as usize).map(|(_, data)| data)
    }

    pub fn add_pointer(&mut self, ptr: PagePtr) -> &mut Self {
        self.pointers.push(ptr);
        self
    }

    /// Add an asset and return its table index.
    pub fn add_asset(&mut self, asset: AssetSpec) -> u32 {
        self.assets.push(asset);
        (self.assets.len() - 1) as u32
    }

    pub fn stream_names(&mut self, names: &[&str]) -> &mut Self {
        self.stream_names = names.iter().map(|name| name.to_string()).collect();
        self
    }

    pub fn opt_stream_names(&mut self, names: &[&str]) -> &mut Self {
        self.opt_stream_names = names.iter().map(|name| name.to_string()).collect();
        self
    }

    /// Streaming payloads stored inside the container file after its body.
    pub fn embed_streaming(&mut self, mandatory: Vec<u8>, optional: Vec<u8>) -> &mut Self {
        self.embedded = mandatory;
        self.embedded_opt = optional;
        self
    }

    /// Emit a patch container instead of a base container. The tables and
    /// pages described by this builder are then the patch target.
    pub fn patch(&mut self, patch: PatchSpec) -> &mut Self {
        self.patch = Some(patch);
        self
    }

    /// Header with counts filled in; sizes are left for [`build`](Self::build).
    pub fn header(&self) -> PakHeader {
        let mut header = PakHeader::new();
        header.flags = self.flags;
        header.file_time = self.file_time;
        header.stream_names_size = names_buffer(&self.stream_names).len() as u16;
        header.opt_stream_names_size = names_buffer(&self.opt_stream_names).len() as u16;
        header.segment_count = self.segments.len() as u16;
        header.page_count = self.pages.len() as u16;
        header.pointer_count = self.pointers.len() as u32;
        header.asset_count = self.assets.len() as u32;
        header.guid_count = self.assets.iter().map(|a| a.dependencies.len() as u32).sum();
        header.relation_count = self.assets.iter().map(|a| a.relations.len() as u32).sum();
        header.patch_index = self.patch.as_ref().map_or(0, |patch| patch.files.len() as u32);
        header
    }

    /// Name buffers and tables, everything between the patch area and the pages.
    pub fn encode_tables(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&names_buffer(&self.stream_names));
        out.extend_from_slice(&names_buffer(&self.opt_stream_names));

        for (index, segment) in self.segments.iter().enumerate() {
            let size = self
                .pages
                .iter()
                .filter(|(page, _)| page.segment as usize == index)
                .map(|(page, _)| align_up(u64::from(page.size), u64::from(page.alignment.max(1))))
                .sum();
            let segment = SegmentHeader { size, ..*segment };
            out.extend_from_slice(segment.as_bytes());
        }

        for (page, _) in &self.pages {
            out.extend_from_slice(page.as_bytes());
        }
        for ptr in &self.pointers {
            out.extend_from_slice(ptr.as_bytes());
        }

        let mut dependencies_start = 0u32;
        let mut relations_start = 0u32;
        for spec in &self.assets {
            let entry = AssetEntry {
                guid: spec.guid,
                reserved: 0,
                head: spec.head,
                data: spec.data,
                stream_offset: spec.stream_offset,
                opt_stream_offset: spec.opt_stream_offset,
                page_end: spec.page_end.unwrap_or(spec.head.index as u16 + 1),
                remaining_dependencies: spec.dependencies.len() as u16,
                relations_start,
                dependencies_start,
                relations_count: spec.relations.len() as u32,
                dependencies_count: spec.dependencies.len() as u32,
                header_size: spec.header_size,
                version: spec.version,
                tag: spec.tag,
            };
            dependencies_start += entry.dependencies_count;
            relations_start += entry.relations_count;
            out.extend_from_slice(entry.as_bytes());
        }

        for spec in &self.assets {
            for slot in &spec.dependencies {
                out.extend_from_slice(slot.as_bytes());
            }
        }
        for spec in &self.assets {
            for relation in &spec.relations {
                // Writing into a Vec cannot fail.
                let _ = out.write_u32::<LittleEndian>(*relation);
            }
        }

        out
    }

    /// Page data, concatenated in page order.
    pub fn encode_pages(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (_, data) in &self.pages {
            out.extend_from_slice(data);
        }
        out
    }

    /// The byte range a patch chain must reconstruct: tables then pages.
    pub fn reconstructed_region(&self) -> Vec<u8> {
        let mut out = self.encode_tables();
        out.extend_from_slice(&self.encode_pages());
        out
    }

    /// Emit the decoded container, followed by any embedded streaming data.
    pub fn build(&self) -> Vec<u8> {
        let mut header = self.header();
        let mut body = Vec::new();

        match &self.patch {
            Some(patch) => {
                let data = PatchDataHeader {
                    edit_stream_size: patch.edit_stream.len() as u32,
                    page_count: u32::from(header.page_count),
                };
                body.extend_from_slice(data.as_bytes());
                for file in &patch.files {
                    body.extend_from_slice(file.as_bytes());
                }
                for number in &patch.numbers {
                    let _ = body.write_u16::<LittleEndian>(*number);
                }
                body.extend_from_slice(&patch.edit_stream);
            }
            None => body = self.reconstructed_region(),
        }

        let size = (PakHeader::SIZE + body.len()) as u64;
        header.compressed_size = size;
        header.decompressed_size = size;
        if !self.embedded.is_empty() {
            header.embedded_offset = size;
            header.embedded_size = self.embedded.len() as u64;
        }
        if !self.embedded_opt.is_empty() {
            header.embedded_opt_offset = size + self.embedded.len() as u64;
            header.embedded_opt_size = self.embedded_opt.len() as u64;
        }

        let mut out = Vec::with_capacity(size as usize + self.embedded.len() + self.embedded_opt.len());
        let _ = out.write_all(header.as_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(&self.embedded);
        out.extend_from_slice(&self.embedded_opt);
        out
    }
}

/// NUL-terminated names padded to a multiple of four bytes.
fn names_buffer(names: &[String]) -> Vec<u8> {
    let mut buffer = Vec::new();
    for name in names {
        buffer.extend_from_slice(name.as_bytes());
        buffer.push(0);
    }
    buffer.resize(buffer.len().next_multiple_of(4), 0);
    buffer
}
