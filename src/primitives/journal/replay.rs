//! Recovery: copy committed pages from a journal into the main file.
//!
//! The journal itself carries no index of what it holds. The transaction
//! layer records, for every durable commit, which journal page carries which
//! main-file page, and hands those pairs to [`apply`] after a crash.

#![forbid(unsafe_code)]

use tracing::{debug, info};

use crate::primitives::pager::VirtualPager;
use crate::types::{PageId, Result, VaultError};

/// One page to copy during replay.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReplayEntry {
    /// Page number inside the journal.
    pub journal_page: PageId,
    /// Page number inside the main file.
    pub target_page: PageId,
}

impl ReplayEntry {
    /// Entries for a commit gathered into consecutive journal pages starting
    /// at `first_journal_page`, one per target page in order.
    pub fn contiguous(first_journal_page: PageId, targets: &[PageId]) -> Vec<ReplayEntry> {
        targets
            .iter()
            .zip(first_journal_page.0..)
            .map(|(&target_page, journal)| ReplayEntry {
                journal_page: PageId(journal),
                target_page,
            })
            .collect()
    }
}

/// Totals for one replay run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReplayStats {
    /// Pages copied into the target.
    pub pages_applied: u64,
    /// Bytes copied into the target.
    pub bytes_applied: u64,
}

/// Copies each entry's journal page over its target page, in order, then
/// syncs the target.
///
/// Later entries win when several name the same target page. Target pages
/// must be reachable by the target pager's growth rule, so a growable target
/// should be replayed in ascending target order when it is shorter than the
/// data being restored.
pub fn apply(
    journal: &mut dyn VirtualPager,
    target: &mut dyn VirtualPager,
    entries: &[ReplayEntry],
) -> Result<ReplayStats> {
    if journal.page_size() != target.page_size() {
        return Err(VaultError::PageSizeMismatch {
            expected: target.page_size(),
            actual: journal.page_size(),
        });
    }
    let mut stats = ReplayStats::default();
    for entry in entries {
        let source = journal.read_page(entry.journal_page)?;
        target.write_page(entry.target_page, source)?;
        stats.pages_applied += 1;
        stats.bytes_applied += source.len() as u64;
        debug!(
            journal_page = entry.journal_page.0,
            target_page = entry.target_page.0,
            "journal.replay.page"
        );
    }
    target.sync()?;
    info!(
        pages = stats.pages_applied,
        bytes = stats.bytes_applied,
        "journal.replay.apply"
    );
    Ok(stats)
}
