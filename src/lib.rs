//! Pagevault: segmented virtual pagers and a write-through page journal.
//!
//! The crate provides the storage plumbing underneath a transactional page
//! store. [`primitives::pager`] serves fixed-size pages out of lazily grown
//! segments, either on the heap or over a memory-mapped file.
//! [`primitives::journal`] appends committed page images to a preallocated
//! journal with vectored write-through writes and replays them into the main
//! file after a crash.

#![warn(missing_docs)]

pub mod primitives;
pub mod types;

pub use primitives::journal::{
    FileJournalWriter, JournalOptions, JournalStats, JournalWriter, WriteOutcome, WriteTicket,
};
pub use primitives::pager::{MemoryPager, MmapPager, Page, PagerOptions, VirtualPager};
pub use types::{PageId, Result, VaultError};
