//! Page storage for a loaded container.

use byteorder::{ByteOrder, LittleEndian};
use rpak_format::{FormatError, PagePtr, PakContainer};

use crate::alloc::{PageAllocator, PageBuffer};

/// A container's pages, one buffer per page, addressed by [`PagePtr`].
#[derive(Debug, Default)]
pub struct PageArena {
    pages: Vec<PageBuffer>,
}

impl PageArena {
    /// Allocate a zeroed buffer for every page of `container`.
    pub fn allocate(container: &PakContainer, allocator: &dyn PageAllocator) -> Self {
        let pages = container
            .pages()
            .iter()
            .map(|page| allocator.allocate(page.size as usize, page.alignment.max(1) as usize))
            .collect();
        Self { pages }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page(&self, index: usize) -> Option<&[u8]> {
        self.pages.get(index).map(PageBuffer::as_slice)
    }

    pub fn page_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        self.pages.get_mut(index).map(PageBuffer::as_mut_slice)
    }

    fn bounds(&self, ptr: PagePtr, len: usize) -> Result<(usize, std::ops::Range<usize>), FormatError> {
        let index = ptr.index as usize;
        let page = self.pages.get(index).ok_or(FormatError::InvalidPagePointer {
            index: ptr.index,
            offset: ptr.offset,
            page_count: self.pages.len().min(u16::MAX as usize) as u16,
        })?;

        let start = ptr.offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= page.len() => Ok((index, start..end)),
            _ => Err(FormatError::PageOffsetOutOfBounds {
                index: ptr.index,
                offset: ptr.offset,
                len,
                page_size: page.len() as u32,
            }),
        }
    }

    /// `len` bytes at `ptr`, bounds-checked against the page.
    pub fn read(&self, ptr: PagePtr, len: usize) -> Result<&[u8], FormatError> {
        let (index, range) = self.bounds(ptr, len)?;
        Ok(&self.pages[index].as_slice()[range])
    }

    pub fn read_u64(&self, ptr: PagePtr) -> Result<u64, FormatError> {
        self.read(ptr, 8).map(LittleEndian::read_u64)
    }

    pub fn write_u64(&mut self, ptr: PagePtr, value: u64) -> Result<(), FormatError> {
        let (index, range) = self.bounds(ptr, 8)?;
        LittleEndian::write_u64(&mut self.pages[index].as_mut_slice()[range], value);
        Ok(())
    }

    /// Every page concatenated, as laid out in the decoded stream.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pages.iter().map(PageBuffer::len).sum());
        for page in &self.pages {
            out.extend_from_slice(page.as_slice());
        }
        out
    }
}
