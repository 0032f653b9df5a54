#![allow(missing_docs)]

use std::sync::Once;

use pagevault::primitives::pager::{MemoryPager, MmapPager, PagerOptions, VirtualPager};
use pagevault::types::{PageId, Result, VaultError};
use proptest::prelude::*;
use tempfile::tempdir;
use tracing_subscriber::EnvFilter;

const PAGE: usize = 4096;
const PER_SEGMENT: u64 = 8;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pagevault=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn options() -> PagerOptions {
    PagerOptions {
        page_size: PAGE,
        pages_per_segment: PER_SEGMENT,
    }
}

fn stamp(page: PageId) -> Vec<u8> {
    let mut buf = vec![0u8; PAGE];
    buf[..8].copy_from_slice(&page.0.to_le_bytes());
    buf[PAGE - 8..].copy_from_slice(&(!page.0).to_le_bytes());
    buf
}

fn check_stamp(pager: &mut dyn VirtualPager, page: PageId) -> Result<()> {
    let data = pager.read_page(page)?;
    assert_eq!(data, stamp(page).as_slice(), "page {page}");
    Ok(())
}

#[test]
fn growth_is_one_segment_per_boundary() -> Result<()> {
    init_tracing();
    let mut pager = MemoryPager::new(options())?;
    for n in 0..(PER_SEGMENT * 5) {
        pager.get(PageId(n))?;
        assert_eq!(pager.segment_count(), n / PER_SEGMENT + 1, "after page {n}");
    }
    let stats = pager.stats();
    assert_eq!(stats.segments_allocated, 5);
    assert_eq!(stats.bytes_reserved, 5 * PER_SEGMENT * PAGE as u64);
    Ok(())
}

#[test]
fn repeated_lifecycles_leave_nothing_live() -> Result<()> {
    init_tracing();
    for round in 0..20u64 {
        let mut pager = MemoryPager::new(options())?;
        let pages = (round % 4 + 1) * PER_SEGMENT;
        for n in 0..pages {
            pager.write_page(PageId(n), &stamp(PageId(n)))?;
        }
        pager.dispose();
        let stats = pager.stats();
        assert_eq!(stats.live_segments, 0);
        assert_eq!(stats.bytes_reserved, 0);
        assert_eq!(stats.segments_released, stats.segments_allocated);
    }
    Ok(())
}

#[test]
fn mmap_pager_matches_memory_pager_growth_rule() -> Result<()> {
    init_tracing();
    let dir = tempdir().unwrap();
    let mut file_pager = MmapPager::open(dir.path().join("main.db"), options())?;
    let mut heap_pager = MemoryPager::new(options())?;
    let pagers: [&mut dyn VirtualPager; 2] = [&mut file_pager, &mut heap_pager];
    for pager in pagers {
        pager.get(PageId(0))?;
        let err = pager.get(PageId(2 * PER_SEGMENT)).unwrap_err();
        assert!(matches!(err, VaultError::SegmentGap { .. }), "{err:?}");
        assert_eq!(pager.segment_count(), 1);
        pager.get(PageId(PER_SEGMENT))?;
        pager.get(PageId(2 * PER_SEGMENT))?;
        assert_eq!(pager.segment_count(), 3);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn page_contents_survive_later_growth(
        touches in prop::collection::vec(0u64..(PER_SEGMENT * 6), 1..64)
    ) {
        let mut pager = MemoryPager::new(options()).unwrap();
        let mut written = Vec::new();
        for raw in touches {
            // Clamp into the reachable range so every request is valid.
            let reachable = (pager.segment_count() + 1) * PER_SEGMENT;
            let page = PageId(raw % reachable);
            pager.write_page(page, &stamp(page)).unwrap();
            written.push(page);
            for &earlier in &written {
                check_stamp(&mut pager, earlier).unwrap();
            }
        }
        prop_assert!(pager.segment_count() <= 6);
    }

    #[test]
    fn handles_stay_valid_across_growth(count in 1u64..(PER_SEGMENT * 4)) {
        let mut pager = MemoryPager::new(options()).unwrap();
        let first = pager.get(PageId(0)).unwrap();
        pager.page_mut(first).unwrap()[0] = 0x5A;
        for n in 1..=count {
            pager.get(PageId(n)).unwrap();
        }
        prop_assert_eq!(pager.page(first).unwrap()[0], 0x5A);
        prop_assert_eq!(first.segment(), 0);
    }
}
