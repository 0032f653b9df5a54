#![forbid(unsafe_code)]

use tracing::debug;

use super::{Page, PagerOptions, PagerStats, SegmentLayout, VirtualPager};
use crate::types::{PageId, Result, VaultError};

/// Pager backed entirely by heap segments.
///
/// Used for scratch space and for tests that need a pager without a file.
/// Segments are zeroed on allocation and never move, so a page handle keeps
/// naming the same bytes until [`VirtualPager::dispose`].
pub struct MemoryPager {
    layout: SegmentLayout,
    segments: Vec<Box<[u8]>>,
    disposed: bool,
    stats: PagerStats,
}

impl MemoryPager {
    /// Creates an empty pager. No memory is allocated until the first `get`.
    pub fn new(options: PagerOptions) -> Result<Self> {
        let layout = options.layout()?;
        Ok(Self {
            layout,
            segments: Vec::new(),
            disposed: false,
            stats: PagerStats::default(),
        })
    }

    /// Segment geometry in use.
    pub fn layout(&self) -> SegmentLayout {
        self.layout
    }

    fn add_segment(&mut self) -> Result<()> {
        let bytes = self.layout.segment_size();
        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(bytes)
            .map_err(|_| VaultError::AllocationFailed { bytes })?;
        buf.resize(bytes, 0);
        self.segments
            .try_reserve(1)
            .map_err(|_| VaultError::AllocationFailed {
                bytes: std::mem::size_of::<Box<[u8]>>(),
            })?;
        self.segments.push(buf.into_boxed_slice());
        self.stats.segments_allocated += 1;
        self.stats.live_segments += 1;
        self.stats.bytes_reserved += bytes as u64;
        debug!(
            segment = self.segments.len() - 1,
            bytes, "pager.memory.segment_alloc"
        );
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(VaultError::Disposed("memory pager"));
        }
        Ok(())
    }
}

impl VirtualPager for MemoryPager {
    fn page_size(&self) -> usize {
        self.layout.page_size()
    }

    fn pages_per_segment(&self) -> u64 {
        self.layout.pages_per_segment()
    }

    fn get(&mut self, page_no: PageId) -> Result<Page> {
        self.ensure_live()?;
        let allocated = self.segments.len() as u64;
        let segment = self.layout.check_growth(page_no, allocated)?;
        let index = self.layout.segment_index(page_no)?;
        if segment == allocated {
            self.add_segment()?;
        }
        self.stats.pages_served += 1;
        Ok(Page::new(
            page_no,
            index,
            self.layout.offset_in_segment(page_no),
        ))
    }

    fn page(&self, page: Page) -> Result<&[u8]> {
        self.ensure_live()?;
        let page_size = self.layout.page_size();
        self.segments
            .get(page.segment() as usize)
            .and_then(|seg| seg.get(page.offset()..page.offset() + page_size))
            .ok_or(VaultError::InvalidPage)
    }

    fn page_mut(&mut self, page: Page) -> Result<&mut [u8]> {
        self.ensure_live()?;
        let page_size = self.layout.page_size();
        self.segments
            .get_mut(page.segment() as usize)
            .and_then(|seg| seg.get_mut(page.offset()..page.offset() + page_size))
            .ok_or(VaultError::InvalidPage)
    }

    fn segment_count(&self) -> u64 {
        self.segments.len() as u64
    }

    fn sync(&self) -> Result<()> {
        self.ensure_live()
    }

    fn stats(&self) -> PagerStats {
        self.stats.clone()
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let released = self.segments.len() as u64;
        self.segments = Vec::new();
        self.disposed = true;
        self.stats.segments_released += released;
        self.stats.live_segments = 0;
        self.stats.bytes_reserved = 0;
        debug!(released, "pager.memory.dispose");
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}
