//! Persisted layouts: the arena header at offset 0 of the region, the
//! segment header that prefixes every allocator-managed block, and the
//! key/value entry node.
//!
//! These structs are the wire format. The mapping *is* the persistent form,
//! in the native byte order of the creating platform, so their `repr(C)`
//! layout is load-bearing: the static assertions and the offset tests below
//! pin it against accidental field reordering or size drift.

use std::mem::{align_of, size_of};

use static_assertions::{const_assert, const_assert_eq};

use crate::classes::{BIG_CLASS_COUNT, SMALL_CLASS_COUNT};
use crate::lock::RawShmLock;
use crate::offset::Offset;

/// Identity tag at byte 0 of every arena. Attach fails closed when the
/// mapped file does not start with it.
pub const MAGIC: [u8; 8] = *b"_nshm_\0\0";

/// Current format version. Attach refuses any other value; there is no
/// migration path.
pub const FORMAT_VERSION: i32 = 1;

/// Alignment of everything the bump allocator hands out.
pub const ALIGNMENT: usize = 8;

/// Slots in the key/value hash-bucket table.
pub const BUCKET_COUNT: usize = 1024;

pub const HEADER_SIZE: usize = size_of::<ArenaHeader>();
pub const SEG_HEADER_SIZE: usize = size_of::<SegmentHeader>();

/// The root record of the region, created once at region creation and
/// mutated under the interprocess lock for the life of the region.
///
/// All `Offset` fields are either a valid in-region offset or
/// [`Offset::NONE`]. The bump cursor is monotonically non-decreasing and
/// never exceeds the region size.
#[repr(C)]
pub struct ArenaHeader {
    pub magic: [u8; 8],
    pub lock: RawShmLock,
    /// Next free byte offset for the bump allocator.
    pub bump: i64,
    pub small_heads: [Offset; SMALL_CLASS_COUNT],
    pub big_heads: [Offset; BIG_CLASS_COUNT],
    pub buckets: [Offset; BUCKET_COUNT],
    /// Informational flag, defaulted to 0 at creation and caller-managed
    /// afterwards.
    pub replaced: i32,
    pub version: i32,
    /// Creation time, seconds since the Unix epoch.
    pub ctime: i64,
}

/// Prefixed immediately before every block the allocator returns.
///
/// `class_size` always holds the owning class size, not the size the caller
/// requested; `free` selects the right list from it alone. While the
/// segment sits on a free list, `next` chains to another free segment of
/// the identical class or is [`Offset::NONE`].
#[repr(C)]
pub struct SegmentHeader {
    pub next: Offset,
    pub class_size: i32,
}

/// One key/value entry, linked into its hash bucket's chain at insertion
/// and immutable afterwards.
///
/// `key` points at a private copy of the key bytes; `value` is the offset
/// of a caller-supplied address inside the region, never a copy.
#[repr(C)]
pub struct EntryNode {
    pub key: Offset,
    pub klen: i32,
    pub value: Offset,
    pub next: Offset,
}

const_assert_eq!(align_of::<ArenaHeader>(), ALIGNMENT);
const_assert_eq!(HEADER_SIZE % ALIGNMENT, 0);
const_assert_eq!(SEG_HEADER_SIZE, 16);
const_assert_eq!(size_of::<EntryNode>(), 32);
const_assert_eq!(size_of::<RawShmLock>(), 4);
const_assert!(size_of::<Offset>() == 8);
