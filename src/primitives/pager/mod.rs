//! Virtual pagers: fixed-size pages carved out of segmented arenas.
//!
//! A pager owns an append-only list of segments, each `page_size ×
//! pages_per_segment` bytes. [`VirtualPager::get`] turns a page number into a
//! [`Page`] handle (segment index + byte offset); the bytes themselves are
//! borrowed from the pager through [`VirtualPager::page`] and
//! [`VirtualPager::page_mut`]. Growing the arena needs `&mut self`, so no
//! slice into a segment can be alive while a segment is appended, and a
//! handle stays valid until the pager is disposed.
//!
//! Segments are added lazily and one at a time: a request that would skip an
//! unallocated segment fails with [`VaultError::SegmentGap`] instead of
//! allocating several segments at once.

mod memory;
mod mmap;
mod segment;

pub use memory::MemoryPager;
pub use mmap::MmapPager;
pub use segment::SegmentLayout;

use crate::types::{
    page::{DEFAULT_PAGES_PER_SEGMENT, DEFAULT_PAGE_SIZE},
    PageId, Result, VaultError,
};

/// Sizing options shared by every pager.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PagerOptions {
    /// Size of each page in bytes (a power of two, e.g. 4096).
    pub page_size: usize,
    /// Number of pages allocated or mapped together as one segment.
    pub pages_per_segment: u64,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pages_per_segment: DEFAULT_PAGES_PER_SEGMENT,
        }
    }
}

impl PagerOptions {
    /// Validates the options and returns the derived segment layout.
    pub fn layout(&self) -> Result<SegmentLayout> {
        SegmentLayout::new(self.page_size, self.pages_per_segment)
    }
}

/// Allocation counters reported by a pager.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PagerStats {
    /// Segments allocated or mapped since the pager was created.
    pub segments_allocated: u64,
    /// Segments released by dispose.
    pub segments_released: u64,
    /// Segments currently owned.
    pub live_segments: u64,
    /// Bytes currently reserved by live segments.
    pub bytes_reserved: u64,
    /// Page handles handed out by `get`.
    pub pages_served: u64,
}

/// Handle to one page inside a pager's arena.
///
/// A `Page` owns nothing. It names a segment and an offset, and is only
/// meaningful for the pager that produced it, until that pager is disposed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Page {
    /// Page number this handle was produced for.
    pub id: PageId,
    segment: u32,
    offset: usize,
}

impl Page {
    pub(crate) fn new(id: PageId, segment: u32, offset: usize) -> Self {
        Self {
            id,
            segment,
            offset,
        }
    }

    /// Index of the segment holding the page.
    pub fn segment(&self) -> u32 {
        self.segment
    }

    /// Byte offset of the page inside its segment.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Contract every page source implements.
pub trait VirtualPager: Send {
    /// Bytes per page.
    fn page_size(&self) -> usize;

    /// Pages held by one segment.
    fn pages_per_segment(&self) -> u64;

    /// Returns the handle for `page_no`, allocating the next segment if the
    /// page falls exactly one segment past the allocated ones.
    fn get(&mut self, page_no: PageId) -> Result<Page>;

    /// Borrows the bytes of a page.
    fn page(&self, page: Page) -> Result<&[u8]>;

    /// Mutably borrows the bytes of a page.
    fn page_mut(&mut self, page: Page) -> Result<&mut [u8]>;

    /// Number of segments currently owned.
    fn segment_count(&self) -> u64;

    /// Flushes page contents to stable storage, when the pager has any.
    fn sync(&self) -> Result<()>;

    /// Allocation counters.
    fn stats(&self) -> PagerStats;

    /// Releases every segment. Handles produced earlier become invalid.
    /// Calling it more than once is a no-op.
    fn dispose(&mut self);

    /// Whether [`VirtualPager::dispose`] has run.
    fn is_disposed(&self) -> bool;

    /// Looks up `page_no` and borrows its bytes.
    fn read_page(&mut self, page_no: PageId) -> Result<&[u8]> {
        let page = self.get(page_no)?;
        self.page(page)
    }

    /// Copies `data` into page `page_no`. `data` must be exactly one page.
    fn write_page(&mut self, page_no: PageId, data: &[u8]) -> Result<()> {
        if data.len() != self.page_size() {
            return Err(VaultError::PageSizeMismatch {
                expected: self.page_size(),
                actual: data.len(),
            });
        }
        let page = self.get(page_no)?;
        self.page_mut(page)?.copy_from_slice(data);
        Ok(())
    }
}
