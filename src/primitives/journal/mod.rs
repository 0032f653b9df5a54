//! Write-ahead journal for committed page images.
//!
//! A journal is a flat, preallocated file. Callers hand the writer a
//! page-aligned position and the page buffers of a commit; the writer issues
//! one vectored write-through write per request on a dedicated I/O worker and
//! resolves a [`WriteTicket`] when the device has the bytes. There is no
//! header, framing, or checksum at this layer: the transaction layer decides
//! where each commit goes and records which journal page holds which main-file
//! page. After a crash, [`replay::apply`] copies those pages from a pager over
//! the journal into the main file.

mod completion;
pub mod replay;
mod writer;

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

pub use completion::{WriteOutcome, WriteTicket};
pub use writer::FileJournalWriter;

use super::pager::{PagerOptions, VirtualPager};
use crate::types::{
    page::{validate_page_size, DEFAULT_PAGES_PER_SEGMENT, DEFAULT_PAGE_SIZE},
    Result, VaultError,
};

/// Default preallocated journal length: 64 MiB.
pub const DEFAULT_JOURNAL_SIZE: u64 = 64 * 1024 * 1024;

/// Appends committed page data to a journal and exposes it for recovery.
pub trait JournalWriter: Send + Sync {
    /// Queues one vectored write of `pages` starting at byte `position`.
    ///
    /// Every buffer must be exactly one page, `position` must be page
    /// aligned, and the whole range must lie inside the journal. Those checks
    /// fail synchronously; I/O failures are reported through the ticket.
    fn write_gather(&self, position: u64, pages: Vec<Bytes>) -> Result<WriteTicket>;

    /// Queues a write of one contiguous buffer at byte `position`.
    fn write(&self, position: u64, buffer: Bytes) -> Result<WriteTicket>;

    /// Pages the journal can hold.
    fn number_of_allocated_pages(&self) -> u64;

    /// Bytes per page.
    fn page_size(&self) -> usize;

    /// Opens a pager over the journal contents, for recovery.
    fn create_pager(&self) -> Result<Box<dyn VirtualPager>>;

    /// Stops accepting writes, cancels queued ones, waits for in-flight
    /// writes, and releases the file. Calling it again is a no-op.
    fn dispose(&self);

    /// Whether [`JournalWriter::dispose`] has run.
    fn is_disposed(&self) -> bool;
}

/// Configuration for [`FileJournalWriter::open`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JournalOptions {
    /// Bytes per page. Must be a power of two.
    pub page_size: usize,
    /// Preallocated journal length in bytes. A non-zero multiple of `page_size`.
    pub journal_size: u64,
    /// Open the file so every write is written through to the device.
    pub write_through: bool,
    /// Number of I/O worker threads executing writes.
    pub io_workers: usize,
    /// Segment size, in pages, of pagers created over the journal.
    pub pages_per_segment: u64,
}

impl Default for JournalOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            journal_size: DEFAULT_JOURNAL_SIZE,
            write_through: true,
            io_workers: 1,
            pages_per_segment: DEFAULT_PAGES_PER_SEGMENT,
        }
    }
}

impl JournalOptions {
    /// Checks the options for internal consistency.
    pub fn validate(&self) -> Result<()> {
        validate_page_size(self.page_size)?;
        if self.journal_size == 0 {
            return Err(VaultError::Invalid("journal size must be non-zero"));
        }
        if self.journal_size % self.page_size as u64 != 0 {
            return Err(VaultError::InvalidOwned(format!(
                "journal size {} is not a multiple of page size {}",
                self.journal_size, self.page_size
            )));
        }
        if self.io_workers == 0 {
            return Err(VaultError::Invalid("at least one I/O worker is required"));
        }
        self.pager_options().layout()?;
        Ok(())
    }

    /// Options for pagers created over the journal.
    pub fn pager_options(&self) -> PagerOptions {
        PagerOptions {
            page_size: self.page_size,
            pages_per_segment: self.pages_per_segment,
        }
    }
}

/// Counters describing writer activity.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct JournalStats {
    /// Requests accepted and queued.
    pub writes_submitted: u64,
    /// Requests that reached the device.
    pub writes_durable: u64,
    /// Requests that failed with an I/O error.
    pub writes_failed: u64,
    /// Requests canceled by dispose before they started.
    pub writes_canceled: u64,
    /// Bytes covered by durable writes.
    pub bytes_written: u64,
}

#[derive(Default)]
struct JournalCounters {
    writes_submitted: AtomicU64,
    writes_durable: AtomicU64,
    writes_failed: AtomicU64,
    writes_canceled: AtomicU64,
    bytes_written: AtomicU64,
}

impl JournalCounters {
    fn snapshot(&self) -> JournalStats {
        JournalStats {
            writes_submitted: self.writes_submitted.load(Ordering::Relaxed),
            writes_durable: self.writes_durable.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            writes_canceled: self.writes_canceled.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}
