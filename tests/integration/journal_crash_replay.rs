#![allow(missing_docs)]

use bytes::Bytes;
use pagevault::primitives::journal::{
    replay::{self, ReplayEntry},
    FileJournalWriter, JournalOptions, JournalWriter,
};
use pagevault::primitives::pager::{MmapPager, PagerOptions, VirtualPager};
use pagevault::types::{PageId, Result};
use tempfile::tempdir;

const PAGE: usize = 4096;

fn journal_options() -> JournalOptions {
    JournalOptions {
        page_size: PAGE,
        journal_size: 128 * PAGE as u64,
        pages_per_segment: 16,
        ..JournalOptions::default()
    }
}

fn main_options() -> PagerOptions {
    PagerOptions {
        page_size: PAGE,
        pages_per_segment: 16,
    }
}

fn image(target: PageId, version: u8) -> Bytes {
    let mut buf = vec![version; PAGE];
    buf[..8].copy_from_slice(&target.0.to_le_bytes());
    Bytes::from(buf)
}

#[test]
fn journal_replays_commits_lost_before_main_file_update() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let journal_path = dir.path().join("main.journal");
    let main_path = dir.path().join("main.db");

    {
        let mut main = MmapPager::open(&main_path, main_options())?;
        for n in 0..4u64 {
            main.write_page(PageId(n), &image(PageId(n), 1))?;
        }
        main.sync()?;
    }

    let targets = [PageId(1), PageId(3), PageId(4)];
    let mut entries = Vec::new();
    {
        let writer = FileJournalWriter::open(&journal_path, journal_options())?;
        let first_commit: Vec<Bytes> = targets.iter().map(|&t| image(t, 2)).collect();
        writer.write_gather(0, first_commit)?.wait()?;
        entries.extend(ReplayEntry::contiguous(PageId(0), &targets));

        let second_start = targets.len() as u64;
        writer
            .write_gather(second_start * PAGE as u64, vec![image(PageId(3), 3)])?
            .wait()?;
        entries.extend(ReplayEntry::contiguous(PageId(second_start), &[PageId(3)]));
        // Simulated crash: the main file was never updated.
    }

    let writer = FileJournalWriter::open(&journal_path, journal_options())?;
    let mut journal = writer.create_pager()?;
    let mut main = MmapPager::open(&main_path, main_options())?;
    let stats = replay::apply(journal.as_mut(), &mut main, &entries)?;
    assert_eq!(stats.pages_applied, 4);
    drop(main);

    let mut main = MmapPager::open(&main_path, main_options())?;
    let expected = [(0u64, 1u8), (1, 2), (2, 1), (3, 3), (4, 2)];
    for (n, version) in expected {
        let data = main.read_page(PageId(n))?;
        assert_eq!(data, &image(PageId(n), version)[..], "page {n}");
    }
    Ok(())
}

#[test]
fn replay_is_idempotent() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let writer = FileJournalWriter::open(dir.path().join("j.journal"), journal_options())?;
    writer
        .write_gather(8 * PAGE as u64, vec![image(PageId(0), 5), image(PageId(1), 5)])?
        .wait()?;
    let entries = ReplayEntry::contiguous(PageId(8), &[PageId(0), PageId(1)]);
    let mut journal = writer.create_pager()?;
    let mut main = MmapPager::open(dir.path().join("main.db"), main_options())?;
    replay::apply(journal.as_mut(), &mut main, &entries)?;
    replay::apply(journal.as_mut(), &mut main, &entries)?;
    for n in 0..2u64 {
        assert_eq!(main.read_page(PageId(n))?, &image(PageId(n), 5)[..]);
    }
    assert_eq!(main.file_pages(), 16);
    Ok(())
}
