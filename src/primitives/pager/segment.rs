#![forbid(unsafe_code)]

use crate::types::{page::validate_page_size, PageId, Result, VaultError};

/// Page-number to segment arithmetic shared by every pager.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SegmentLayout {
    page_size: usize,
    pages_per_segment: u64,
    segment_size: usize,
}

impl SegmentLayout {
    /// Builds a layout, rejecting page sizes that are not powers of two and
    /// segments that do not fit in the address space.
    pub fn new(page_size: usize, pages_per_segment: u64) -> Result<Self> {
        validate_page_size(page_size)?;
        if pages_per_segment == 0 {
            return Err(VaultError::Invalid("pages per segment must be non-zero"));
        }
        let segment_size = usize::try_from(pages_per_segment)
            .ok()
            .and_then(|pages| pages.checked_mul(page_size))
            .ok_or(VaultError::Invalid("segment size overflows usize"))?;
        Ok(Self {
            page_size,
            pages_per_segment,
            segment_size,
        })
    }

    /// Bytes per page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Pages held by one segment.
    pub fn pages_per_segment(&self) -> u64 {
        self.pages_per_segment
    }

    /// Bytes per segment.
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Segment index that holds `page`.
    pub fn segment_of(&self, page: PageId) -> u64 {
        page.0 / self.pages_per_segment
    }

    /// Byte offset of `page` inside its segment.
    pub fn offset_in_segment(&self, page: PageId) -> usize {
        // Bounded by segment_size, which fits in usize.
        (page.0 % self.pages_per_segment) as usize * self.page_size
    }

    /// Byte offset of the first page of `segment` in the logical file.
    pub fn segment_start(&self, segment: u64) -> Result<u64> {
        segment
            .checked_mul(self.segment_size as u64)
            .ok_or(VaultError::Invalid("segment offset overflows u64"))
    }

    /// Segment index for `page` as an arena index.
    pub fn segment_index(&self, page: PageId) -> Result<u32> {
        u32::try_from(self.segment_of(page))
            .map_err(|_| VaultError::Invalid("segment index exceeds u32"))
    }

    /// Checks that serving `page` needs at most one new segment beyond the
    /// `allocated` ones. Returns the segment index of `page`.
    pub fn check_growth(&self, page: PageId, allocated: u64) -> Result<u64> {
        let segment = self.segment_of(page);
        if segment > allocated {
            return Err(VaultError::SegmentGap {
                page,
                requested_segment: segment,
                allocated_segments: allocated,
            });
        }
        Ok(segment)
    }
}
