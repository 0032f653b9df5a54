#![allow(missing_docs)]

use std::fs;
use std::sync::{Arc, Once};

use bytes::Bytes;
use pagevault::primitives::journal::{
    FileJournalWriter, JournalOptions, JournalWriter, WriteOutcome,
};
use pagevault::types::{PageId, Result, VaultError};
use tempfile::tempdir;
use tracing_subscriber::EnvFilter;

const PAGE: usize = 4096;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pagevault::primitives::journal=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn options() -> JournalOptions {
    JournalOptions {
        page_size: PAGE,
        journal_size: 256 * PAGE as u64,
        pages_per_segment: 32,
        ..JournalOptions::default()
    }
}

fn page(fill: u8) -> Bytes {
    Bytes::from(vec![fill; PAGE])
}

#[test]
fn open_preallocates_full_journal() -> Result<()> {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.wal");
    let writer = FileJournalWriter::open(&path, options())?;
    assert_eq!(writer.number_of_allocated_pages(), 256);
    assert_eq!(writer.page_size(), PAGE);
    assert_eq!(fs::metadata(&path).unwrap().len(), 256 * PAGE as u64);
    Ok(())
}

#[test]
fn gathered_pages_read_back_through_journal_pager() -> Result<()> {
    init_tracing();
    let dir = tempdir().unwrap();
    let writer = FileJournalWriter::open(dir.path().join("journal.wal"), options())?;
    let position = 40 * PAGE as u64;
    let outcome = writer
        .write_gather(position, vec![page(0xA0), page(0xA1), page(0xA2)])?
        .wait()?;
    assert_eq!(outcome, WriteOutcome::Durable);

    let mut pager = writer.create_pager()?;
    assert_eq!(pager.page_size(), PAGE);
    for (offset, fill) in [(39u64, 0u8), (40, 0xA0), (41, 0xA1), (42, 0xA2), (43, 0)] {
        let data = pager.read_page(PageId(offset))?;
        assert!(data.iter().all(|&b| b == fill), "page {offset}");
    }
    assert!(matches!(
        pager.get(PageId(256)),
        Err(VaultError::PageOutOfRange { .. })
    ));
    Ok(())
}

#[test]
fn writes_after_dispose_fail_without_io() -> Result<()> {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.wal");
    let writer = FileJournalWriter::open(&path, options())?;
    writer.write_gather(0, vec![page(1)])?.wait()?;
    writer.dispose();
    let before = writer.stats();
    assert!(matches!(
        writer.write_gather(PAGE as u64, vec![page(2)]),
        Err(VaultError::Disposed(_))
    ));
    assert!(matches!(
        writer.write(PAGE as u64, page(2)),
        Err(VaultError::Disposed(_))
    ));
    assert_eq!(writer.stats(), before);
    let contents = fs::read(&path).unwrap();
    assert!(contents[PAGE..2 * PAGE].iter().all(|&b| b == 0));
    Ok(())
}

#[test]
fn second_writer_on_same_file_is_locked() -> Result<()> {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.wal");
    let _first = FileJournalWriter::open(&path, options())?;
    match FileJournalWriter::open(&path, options()) {
        Err(VaultError::JournalLocked) => {}
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("second writer opened a locked journal"),
    }
    Ok(())
}

#[test]
fn concurrent_submitters_share_one_writer() -> Result<()> {
    init_tracing();
    let dir = tempdir().unwrap();
    let writer: Arc<dyn JournalWriter> = Arc::new(FileJournalWriter::open(
        dir.path().join("journal.wal"),
        JournalOptions {
            io_workers: 2,
            ..options()
        },
    )?);
    let threads: Vec<_> = (0..4u64)
        .map(|t| {
            let writer = Arc::clone(&writer);
            std::thread::spawn(move || -> Result<()> {
                for i in 0..16u64 {
                    let slot = t * 16 + i;
                    let fill = slot as u8 + 1;
                    let outcome = writer
                        .write_gather(slot * 2 * PAGE as u64, vec![page(fill), page(fill)])?
                        .wait()?;
                    assert_eq!(outcome, WriteOutcome::Durable);
                }
                Ok(())
            })
        })
        .collect();
    for handle in threads {
        handle.join().expect("submitter thread")?;
    }
    let mut pager = writer.create_pager()?;
    for slot in 0..64u64 {
        for half in 0..2 {
            let data = pager.read_page(PageId(slot * 2 + half))?;
            assert!(data.iter().all(|&b| b == slot as u8 + 1), "slot {slot}");
        }
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_commit_awaits_durability() -> Result<()> {
    init_tracing();
    let dir = tempdir().unwrap();
    let writer = FileJournalWriter::open(dir.path().join("journal.wal"), options())?;
    let first = writer.write_gather(0, vec![page(7), page(8)])?;
    let second = writer.write(2 * PAGE as u64, page(9))?;
    let (a, b) = tokio::join!(first, second);
    assert_eq!(a?, WriteOutcome::Durable);
    assert_eq!(b?, WriteOutcome::Durable);
    assert_eq!(writer.stats().writes_durable, 2);
    Ok(())
}
