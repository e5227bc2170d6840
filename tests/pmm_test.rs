//! Physical frame allocator integration tests.

use ferrite_kernel::memory::pmm::{FrameBitmap, MANAGED_BYTES, PAGE_SIZE, TOTAL_FRAMES};

#[test]
fn test_single_allocation() {
    let mut pmm = FrameBitmap::new();

    let frame = pmm.alloc_frame().expect("fresh bitmap must have frames");
    assert_eq!(frame.physical_address(), frame.pfn * PAGE_SIZE);

    let stats = pmm.stats();
    assert_eq!(stats.used, 1);
    assert_eq!(stats.free, TOTAL_FRAMES - 1);
    assert_eq!(stats.used + stats.free, stats.total);
}

#[test]
fn test_allocations_are_unique() {
    let mut pmm = FrameBitmap::new();

    let mut pfns = [0usize; 16];
    for slot in pfns.iter_mut() {
        *slot = pmm.alloc_frame().expect("allocation failed").pfn;
    }

    for i in 0..pfns.len() {
        for j in i + 1..pfns.len() {
            assert_ne!(pfns[i], pfns[j], "two live frames share a PFN");
        }
    }
}

#[test]
fn test_popcount_matches_used_counter() {
    let mut pmm = FrameBitmap::new();

    for _ in 0..37 {
        pmm.alloc_frame().expect("allocation failed");
    }
    pmm.free_frame(5 * PAGE_SIZE);
    pmm.free_frame(20 * PAGE_SIZE);

    let stats = pmm.stats();
    assert_eq!(pmm.popcount(), stats.used);
    assert_eq!(stats.used + stats.free, stats.total);
}

#[test]
fn test_free_then_alloc_round_trip() {
    let mut pmm = FrameBitmap::new();

    let frame = pmm.alloc_frame().expect("allocation failed");
    let before = pmm.stats();

    pmm.free_frame(frame.physical_address());
    let reused = pmm.alloc_frame().expect("allocation failed");

    // The freed frame is the lowest free bit again, so it comes right back.
    assert_eq!(reused.pfn, frame.pfn);
    assert_eq!(pmm.stats(), before);
}

#[test]
fn test_freed_middle_frame_is_reused_first() {
    let mut pmm = FrameBitmap::new();

    let f0 = pmm.alloc_frame().unwrap();
    let f1 = pmm.alloc_frame().unwrap();
    let f2 = pmm.alloc_frame().unwrap();
    assert!(f0.pfn < f1.pfn && f1.pfn < f2.pfn);

    pmm.free_frame(f1.physical_address());

    // The hint was tightened downward by the free.
    assert!(pmm.stats().first_free <= f1.pfn);
    let next = pmm.alloc_frame().unwrap();
    assert_eq!(next.pfn, f1.pfn);
}

#[test]
fn test_double_free_is_a_noop() {
    let mut pmm = FrameBitmap::new();

    let frame = pmm.alloc_frame().unwrap();
    pmm.free_frame(frame.physical_address());
    let stats = pmm.stats();

    pmm.free_frame(frame.physical_address());
    assert_eq!(pmm.stats(), stats, "freeing a free frame must change nothing");
}

#[test]
fn test_out_of_range_free_is_ignored() {
    let mut pmm = FrameBitmap::new();
    let stats = pmm.stats();

    pmm.free_frame(MANAGED_BYTES + PAGE_SIZE);
    assert_eq!(pmm.stats(), stats);
}

#[test]
fn test_reserved_ranges_are_skipped() {
    let mut pmm = FrameBitmap::new();

    // Fence off the first megabyte plus a kernel-sized stretch.
    pmm.reserve_range(0, 0x0010_0000);
    let reserved_frames = 0x0010_0000 / PAGE_SIZE;
    assert_eq!(pmm.stats().used, reserved_frames);

    let frame = pmm.alloc_frame().unwrap();
    assert!(
        frame.physical_address() >= 0x0010_0000,
        "allocation {:#x} landed in the reserved range",
        frame.physical_address()
    );
}

#[test]
fn test_exhaustion_returns_none() {
    let mut pmm = FrameBitmap::new();
    pmm.reserve_range(0, MANAGED_BYTES);

    assert_eq!(pmm.stats().free, 0);
    assert!(pmm.alloc_frame().is_none());

    // One released frame makes exactly one allocation possible again.
    pmm.free_frame(123 * PAGE_SIZE);
    let frame = pmm.alloc_frame().expect("released frame must be allocatable");
    assert_eq!(frame.pfn, 123);
    assert!(pmm.alloc_frame().is_none());
}
