#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, info};

use super::{Page, PagerOptions, PagerStats, SegmentLayout, VirtualPager};
use crate::types::{PageId, Result, VaultError};

/// Pager over a memory-mapped file, one mapping per segment.
///
/// Segments that already lie inside the file are mapped on first touch, in
/// any order. Past the end of the file a growable pager behaves like
/// [`super::MemoryPager`]: only the segment directly after the file's last
/// one can be added, by extending the file and mapping the new range. A
/// fixed-length pager never changes the file length.
pub struct MmapPager {
    file: Option<File>,
    layout: SegmentLayout,
    segments: Vec<Option<MmapMut>>,
    file_len: u64,
    growable: bool,
    disposed: bool,
    stats: PagerStats,
}

impl MmapPager {
    /// Opens or creates `path` as a growable pager.
    pub fn open(path: impl AsRef<Path>, options: PagerOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(VaultError::from)?;
        let pager = Self::from_file(file, options, true)?;
        info!(
            path = %path.display(),
            file_len = pager.file_len,
            "pager.mmap.open"
        );
        Ok(pager)
    }

    /// Wraps an already-open file. The file must be readable and writable.
    pub fn from_file(file: File, options: PagerOptions, growable: bool) -> Result<Self> {
        let layout = options.layout()?;
        let file_len = file.metadata().map_err(VaultError::from)?.len();
        Ok(Self {
            file: Some(file),
            layout,
            segments: Vec::new(),
            file_len,
            growable,
            disposed: false,
            stats: PagerStats::default(),
        })
    }

    /// Wraps a file whose length must not change, such as a journal.
    pub fn with_fixed_len(file: File, options: PagerOptions) -> Result<Self> {
        Self::from_file(file, options, false)
    }

    /// Current length of the backing file in bytes.
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Whole pages available in the backing file.
    pub fn file_pages(&self) -> u64 {
        self.file_len / self.layout.page_size() as u64
    }

    fn ensure_live(&self) -> Result<&File> {
        match (&self.file, self.disposed) {
            (Some(file), false) => Ok(file),
            _ => Err(VaultError::Disposed("mmap pager")),
        }
    }

    fn segments_in_file(&self) -> u64 {
        let seg = self.layout.segment_size() as u64;
        self.file_len.div_ceil(seg)
    }

    fn out_of_range(&self, page: PageId) -> VaultError {
        VaultError::PageOutOfRange {
            page,
            available: self.file_pages(),
        }
    }

    fn map_segment(&mut self, page_no: PageId, segment: u64) -> Result<()> {
        let seg_size = self.layout.segment_size() as u64;
        let start = self.layout.segment_start(segment)?;
        let end = start
            .checked_add(seg_size)
            .ok_or(VaultError::Invalid("segment end overflows u64"))?;
        if start >= self.file_len {
            if !self.growable {
                return Err(self.out_of_range(page_no));
            }
            self.layout.check_growth(page_no, self.segments_in_file())?;
        }
        if self.growable && self.file_len < end {
            let file = self.ensure_live()?;
            file.set_len(end).map_err(VaultError::from)?;
            debug!(segment, from = self.file_len, to = end, "pager.mmap.extend");
            self.file_len = end;
        }
        let len = (self.file_len.min(end) - start) as usize;
        let file = self.ensure_live()?;
        // SAFETY: the mapping is owned by this pager and dropped before the
        // file handle; every access goes through bounds-checked slices.
        let map = unsafe { MmapOptions::new().offset(start).len(len).map_mut(file) }
            .map_err(VaultError::from)?;
        let index = segment as usize;
        if self.segments.len() <= index {
            self.segments.resize_with(index + 1, || None);
        }
        self.segments[index] = Some(map);
        self.stats.segments_allocated += 1;
        self.stats.live_segments += 1;
        self.stats.bytes_reserved += len as u64;
        debug!(segment, offset = start, len, "pager.mmap.segment_map");
        Ok(())
    }
}

impl VirtualPager for MmapPager {
    fn page_size(&self) -> usize {
        self.layout.page_size()
    }

    fn pages_per_segment(&self) -> u64 {
        self.layout.pages_per_segment()
    }

    fn get(&mut self, page_no: PageId) -> Result<Page> {
        self.ensure_live()?;
        let segment = self.layout.segment_of(page_no);
        let index = self.layout.segment_index(page_no)?;
        let mapped = matches!(self.segments.get(index as usize), Some(Some(_)));
        if !mapped {
            self.map_segment(page_no, segment)?;
        }
        let offset = self.layout.offset_in_segment(page_no);
        let map_len = self.segments[index as usize]
            .as_ref()
            .map(|map| map.len())
            .unwrap_or(0);
        if offset + self.layout.page_size() > map_len {
            return Err(self.out_of_range(page_no));
        }
        self.stats.pages_served += 1;
        Ok(Page::new(page_no, index, offset))
    }

    fn page(&self, page: Page) -> Result<&[u8]> {
        self.ensure_live()?;
        let page_size = self.layout.page_size();
        self.segments
            .get(page.segment() as usize)
            .and_then(|seg| seg.as_ref())
            .and_then(|map| map.get(page.offset()..page.offset() + page_size))
            .ok_or(VaultError::InvalidPage)
    }

    fn page_mut(&mut self, page: Page) -> Result<&mut [u8]> {
        self.ensure_live()?;
        let page_size = self.layout.page_size();
        self.segments
            .get_mut(page.segment() as usize)
            .and_then(|seg| seg.as_mut())
            .and_then(|map| map.get_mut(page.offset()..page.offset() + page_size))
            .ok_or(VaultError::InvalidPage)
    }

    fn segment_count(&self) -> u64 {
        self.segments.iter().filter(|seg| seg.is_some()).count() as u64
    }

    fn sync(&self) -> Result<()> {
        self.ensure_live()?;
        for map in self.segments.iter().flatten() {
            map.flush().map_err(VaultError::from)?;
        }
        Ok(())
    }

    fn stats(&self) -> PagerStats {
        self.stats.clone()
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let released = self.segment_count();
        self.segments = Vec::new();
        self.file = None;
        self.disposed = true;
        self.stats.segments_released += released;
        self.stats.live_segments = 0;
        self.stats.bytes_reserved = 0;
        debug!(released, "pager.mmap.dispose");
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for MmapPager {
    fn drop(&mut self) {
        // Unmap before the file handle closes.
        self.segments.clear();
    }
}
