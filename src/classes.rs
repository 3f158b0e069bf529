//! Size-class math for the segregated free lists.
//!
//! Two independent class systems cover the allocatable size range. Small
//! classes step by 16 bytes and serve requests up to 1024 bytes; big
//! classes double geometrically from 2048 bytes up to 1 GiB. A request
//! always rounds up to the size of its owning class, and that class size is
//! what gets stamped into the segment header so `free` can find the right
//! list without the caller remembering the requested size.

use static_assertions::const_assert_eq;

pub const SMALL_CLASS_COUNT: usize = 64;
pub const SMALL_STEP: usize = 16;
/// Largest size served by a small class.
pub const SMALL_MAX: usize = 1024;
/// Segments pushed per refill of a small class list.
pub const SMALL_REFILL_BATCH: usize = 8;

pub const BIG_CLASS_COUNT: usize = 20;
/// Size of the first big class.
pub const BIG_BASE: usize = 2 * SMALL_MAX;
/// Segments pushed per refill of a big class list.
pub const BIG_REFILL_BATCH: usize = 4;

/// Largest size a single allocation may request (1 GiB), which is also the
/// size of the last big class.
pub const MAX_ALLOC: usize = BIG_BASE << (BIG_CLASS_COUNT - 1);

const_assert_eq!(SMALL_MAX, SMALL_CLASS_COUNT * SMALL_STEP);
const_assert_eq!(MAX_ALLOC, 1 << 30);

/// Index of the small class serving `size`.
#[inline]
pub fn small_index(size: usize) -> usize {
    debug_assert!((1..=SMALL_MAX).contains(&size));
    (size - 1) / SMALL_STEP
}

/// Class size of the small class at `index`.
#[inline]
pub fn small_size(index: usize) -> usize {
    debug_assert!(index < SMALL_CLASS_COUNT);
    (index + 1) * SMALL_STEP
}

/// Index of the smallest big class whose size is at least `size`.
#[inline]
pub fn big_index(size: usize) -> usize {
    debug_assert!((SMALL_MAX + 1..=MAX_ALLOC).contains(&size));
    let mut index = 0;
    let mut boundary = BIG_BASE;
    while boundary < size {
        boundary <<= 1;
        index += 1;
    }
    index
}

/// Class size of the big class at `index`.
#[inline]
pub fn big_size(index: usize) -> usize {
    debug_assert!(index < BIG_CLASS_COUNT);
    BIG_BASE << index
}
