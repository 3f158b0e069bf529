use super::*;
use crate::classes::{BIG_BASE, SMALL_STEP};

use std::collections::HashSet;

use tempfile::NamedTempFile;

/// Creates an arena on a fresh temp file. The file handle must stay alive
/// for as long as the path is reattached.
fn temp_arena(size: usize) -> (Arena, NamedTempFile) {
    let file = NamedTempFile::new().expect("temp file");
    let arena = Arena::create(file.path(), size, 0o600).expect("create");
    (arena, file)
}

#[test]
fn create_rejects_undersized_region() {
    let file = NamedTempFile::new().unwrap();
    assert!(matches!(
        Arena::create(file.path(), HEADER_SIZE, 0o600),
        Err(ArenaError::InvalidArgument(_))
    ));
}

#[test]
fn attach_rejects_foreign_file() {
    let file = NamedTempFile::new().unwrap();
    std::fs::write(file.path(), vec![0xAB_u8; HEADER_SIZE + 64]).unwrap();
    assert!(matches!(
        Arena::attach(file.path()),
        Err(ArenaError::BadMagic)
    ));
}

#[test]
fn attach_rejects_truncated_file() {
    let file = NamedTempFile::new().unwrap();
    std::fs::write(file.path(), b"_nshm_\0\0").unwrap();
    assert!(matches!(
        Arena::attach(file.path()),
        Err(ArenaError::BadMagic)
    ));
}

#[test]
fn attach_rejects_unknown_version() {
    let (arena, file) = temp_arena(1 << 16);
    unsafe { (*arena.header()).version = 99 };
    arena.detach();

    assert!(matches!(
        Arena::attach(file.path()),
        Err(ArenaError::VersionMismatch { found: 99, expected: FORMAT_VERSION })
    ));
}

#[test]
fn header_is_initialized_in_place() {
    let (arena, _file) = temp_arena(1 << 16);
    let hdr = arena.header();
    unsafe {
        assert_eq!((*hdr).magic, MAGIC);
        assert_eq!((*hdr).version, FORMAT_VERSION);
        assert_eq!((*hdr).bump, HEADER_SIZE as i64);
        assert!((*hdr).small_heads.iter().all(|o| o.is_none()));
        assert!((*hdr).big_heads.iter().all(|o| o.is_none()));
        assert!((*hdr).buckets.iter().all(|o| o.is_none()));
    }
    assert!(!arena.replaced());
    assert!(arena.creation_time() > 0);
    assert_eq!(arena.remaining_bytes(), (1 << 16) - HEADER_SIZE as i64);
}

/// Reads the class size stamped in the segment header preceding `ptr`.
fn stamped_class_size(ptr: NonNull<u8>) -> i32 {
    unsafe { (*ptr.as_ptr().cast::<SegmentHeader>().sub(1)).class_size }
}

#[test]
fn small_allocations_round_up_to_their_class() {
    let (arena, _file) = temp_arena(1 << 20);
    for size in [1, 15, 16, 17, 100, 1023, 1024] {
        let ptr = arena.allocate(size).expect("allocate");
        let expected = (16 * size.div_ceil(16)) as i32;
        assert_eq!(stamped_class_size(ptr), expected, "size {size}");
        assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0);
    }
}

#[test]
fn big_allocations_round_up_to_their_class() {
    let (arena, _file) = temp_arena(1 << 20);
    for (size, expected) in [(1025, 2048), (2048, 2048), (2049, 4096), (5000, 8192)] {
        let ptr = arena.allocate(size).expect("allocate");
        assert_eq!(stamped_class_size(ptr), expected, "size {size}");
    }
}

#[test]
fn zero_and_oversized_requests_are_rejected() {
    let (arena, _file) = temp_arena(1 << 16);
    assert!(arena.allocate(0).is_none());
    assert!(arena.allocate(MAX_ALLOC + 1).is_none());
    // In range but far beyond the region; the refill fails, not the class
    // selection.
    assert!(arena.allocate(MAX_ALLOC).is_none());
}

#[test]
fn freed_block_is_the_next_handed_out() {
    let (arena, _file) = temp_arena(1 << 20);
    for size in [1, 16, 1000, 1024, 2000, 4096] {
        let p = arena.allocate(size).unwrap();
        unsafe { arena.free(p) };
        let q = arena.allocate(size).unwrap();
        assert_eq!(p, q, "size {size}");
    }
}

#[test]
fn free_selects_the_list_by_stored_class_size() {
    let (arena, _file) = temp_arena(1 << 20);
    // Allocate with one size, free, and reallocate with a different size of
    // the same class: the freed block must come back.
    let p = arena.allocate(40).unwrap();
    unsafe { arena.free(p) };
    assert_eq!(arena.allocate(48).unwrap(), p);
    // A different class must not see it.
    let q = arena.allocate(64).unwrap();
    assert_ne!(q, p);
}

#[test]
fn refill_consumes_a_fixed_batch_from_the_bump_cursor() {
    let (arena, _file) = temp_arena(1 << 20);
    let before = arena.remaining_bytes();

    // First allocation of a class refills it with a whole batch.
    arena.allocate(16).unwrap();
    let per_segment = (SEG_HEADER_SIZE + 16) as i64;
    assert_eq!(
        before - arena.remaining_bytes(),
        SMALL_REFILL_BATCH as i64 * per_segment
    );

    // The next 7 come from the list without touching the cursor.
    let after_refill = arena.remaining_bytes();
    for _ in 1..SMALL_REFILL_BATCH {
        arena.allocate(16).unwrap();
    }
    assert_eq!(arena.remaining_bytes(), after_refill);

    // The 9th triggers another refill.
    arena.allocate(16).unwrap();
    assert_eq!(
        after_refill - arena.remaining_bytes(),
        SMALL_REFILL_BATCH as i64 * per_segment
    );
}

#[test]
fn big_refill_batch_is_smaller() {
    let (arena, _file) = temp_arena(1 << 20);
    let before = arena.remaining_bytes();
    arena.allocate(BIG_BASE).unwrap();
    let per_segment = (SEG_HEADER_SIZE + BIG_BASE) as i64;
    assert_eq!(
        before - arena.remaining_bytes(),
        BIG_REFILL_BATCH as i64 * per_segment
    );
}

#[test]
fn garbage_segment_header_is_ignored_by_free() {
    let (arena, _file) = temp_arena(1 << 20);
    let p = arena.allocate(16).unwrap();
    unsafe {
        (*p.as_ptr().cast::<SegmentHeader>().sub(1)).class_size = 0;
        arena.free(p);
    }
    // The poisoned block must not have reached the 16-byte class list.
    assert_ne!(arena.allocate(16).unwrap(), p);
}

#[test]
fn exhaustion_fails_the_triggering_call_but_keeps_partial_refills() {
    let region = 1 << 15;
    let (arena, _file) = temp_arena(region);
    let usable = region as i64 - HEADER_SIZE as i64;
    let per_segment = (SEG_HEADER_SIZE + 1024) as i64;
    // Two full refills fit; the third gets six segments in before the bump
    // cursor runs dry.
    assert_eq!(usable / per_segment, 22);

    let mut seen = HashSet::new();
    let mut handed_out = vec![];
    while let Some(ptr) = arena.allocate(1024) {
        assert!(seen.insert(ptr.as_ptr() as usize), "duplicate address");
        assert!(arena.remaining_bytes() >= 0);
        handed_out.push(ptr);
    }
    assert_eq!(handed_out.len(), 2 * SMALL_REFILL_BATCH);

    // The failed refill still pushed what it could; those segments drain
    // before allocation fails for good.
    let mut leftovers = 0;
    while let Some(ptr) = arena.allocate(1024) {
        assert!(seen.insert(ptr.as_ptr() as usize), "duplicate address");
        leftovers += 1;
    }
    assert_eq!(leftovers, 6);
    assert!(arena.allocate(1024).is_none());
    assert!(arena.remaining_bytes() >= 0);

    // Earlier blocks stay valid and writable.
    for (i, ptr) in handed_out.iter().enumerate() {
        unsafe { ptr.as_ptr().cast::<u64>().write(i as u64) };
    }
    for (i, ptr) in handed_out.iter().enumerate() {
        assert_eq!(unsafe { ptr.as_ptr().cast::<u64>().read() }, i as u64);
    }
}

#[test]
fn bump_cursor_is_monotonic() {
    let (arena, _file) = temp_arena(1 << 18);
    let mut last = arena.remaining_bytes();
    for size in (SMALL_STEP..=SMALL_MAX).step_by(SMALL_STEP * 7) {
        arena.allocate(size).unwrap();
        let now = arena.remaining_bytes();
        assert!(now <= last);
        assert!(now >= 0);
        last = now;
    }
}

#[test]
fn replaced_flag_round_trips() {
    let (arena, file) = temp_arena(1 << 16);
    assert!(!arena.replaced());
    arena.set_replaced(true);
    assert!(arena.replaced());

    let arena = Arena::reattach(file.path(), arena).unwrap();
    assert!(arena.replaced());
}
