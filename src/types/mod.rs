#![forbid(unsafe_code)]
//! Identifiers, errors, and page-size constants shared by every layer.

use std::fmt;
use std::io;

/// Zero-based page number within a pager or journal.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct PageId(pub u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageId {
    fn from(value: u64) -> Self {
        PageId(value)
    }
}

impl From<PageId> for u64 {
    fn from(value: PageId) -> Self {
        value.0
    }
}

/// Errors produced by pagers and journal writers.
#[derive(thiserror::Error, Debug)]
pub enum VaultError {
    /// Operating system I/O failure. The raw OS error code is kept in the
    /// wrapped `io::Error`.
    #[error("IO: {0}")]
    Io(#[from] io::Error),
    /// The allocator could not reserve a new segment.
    #[error("allocation of {bytes} bytes failed")]
    AllocationFailed {
        /// Size of the allocation that failed.
        bytes: usize,
    },
    /// A page request would skip over a segment that was never allocated.
    #[error(
        "page {page} lies in segment {requested_segment} but only {allocated_segments} segments are allocated"
    )]
    SegmentGap {
        /// Requested page.
        page: PageId,
        /// Segment the page falls into.
        requested_segment: u64,
        /// Segments allocated so far.
        allocated_segments: u64,
    },
    /// A page lies beyond the fixed length of a file-backed pager.
    #[error("page {page} is beyond the {available} pages available")]
    PageOutOfRange {
        /// Requested page.
        page: PageId,
        /// Number of addressable pages.
        available: u64,
    },
    /// A journal write position is not page aligned.
    #[error("position {position} is not aligned to page size {page_size}")]
    Misaligned {
        /// Byte offset supplied by the caller.
        position: u64,
        /// Page size of the journal.
        page_size: usize,
    },
    /// A journal write would run past the preallocated journal length.
    #[error("write of {len} bytes at {position} exceeds journal size {journal_size}")]
    WriteOutOfBounds {
        /// Byte offset supplied by the caller.
        position: u64,
        /// Total length of the write.
        len: u64,
        /// Preallocated journal length.
        journal_size: u64,
    },
    /// Two pagers or buffers disagree on page size.
    #[error("page size mismatch: expected {expected}, got {actual}")]
    PageSizeMismatch {
        /// Size required by the receiver.
        expected: usize,
        /// Size that was supplied.
        actual: usize,
    },
    /// Another writer holds the journal file lock.
    #[error("journal file is locked by another writer")]
    JournalLocked,
    /// The object was used after disposal.
    #[error("{0} used after dispose")]
    Disposed(&'static str),
    /// A page handle does not belong to this pager's arena.
    #[error("page handle does not belong to this pager")]
    InvalidPage,
    /// Invalid argument or configuration.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Invalid argument with an owned message.
    #[error("invalid argument: {0}")]
    InvalidOwned(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VaultError>;

pub mod page {
    //! Page and segment sizing shared by pagers and journals.

    use super::{Result, VaultError};

    /// Default page size in bytes.
    pub const DEFAULT_PAGE_SIZE: usize = 4096;
    /// Default number of pages per allocation segment.
    pub const DEFAULT_PAGES_PER_SEGMENT: u64 = 1024;
    /// Smallest accepted page size.
    pub const MIN_PAGE_SIZE: usize = 512;
    /// Largest accepted page size.
    pub const MAX_PAGE_SIZE: usize = 64 * 1024;

    /// Validates that `page_size` is a power of two within the supported range.
    pub fn validate_page_size(page_size: usize) -> Result<()> {
        if !page_size.is_power_of_two() {
            return Err(VaultError::Invalid("page size must be a power of two"));
        }
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(VaultError::InvalidOwned(format!(
                "page size {page_size} outside supported range {MIN_PAGE_SIZE}..={MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }

}
