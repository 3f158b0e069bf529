//! A multi-process shared-memory arena with a size-classed offset
//! allocator and an append-only key/value index.
//!
//! The arena lives in a single fixed-size file-backed region. Independent
//! processes map the same file — usually at different virtual addresses —
//! and still share one consistent logical structure, because nothing inside
//! the region ever stores a native pointer.
//!
//! # Usage
//! ```no_run
//! use shmarena::{Arena, SetOutcome};
//!
//! let arena = Arena::create("/dev/shm/example.arena", 1 << 20, 0o600)?;
//!
//! let value = arena.allocate(8).expect("arena out of space");
//! unsafe { value.as_ptr().cast::<u64>().write(42) };
//!
//! assert_eq!(arena.set(b"answer", value)?, SetOutcome::Inserted);
//! assert_eq!(arena.get(b"answer"), Some(value));
//! # Ok::<(), shmarena::ArenaError>(())
//! ```
//!
//! Another process (or the same one, later) calls [`Arena::attach`] on the
//! same path and sees every key and block, rebased onto its own mapping.
//!
//! # Mode of operation
//! Three mechanisms carry the whole design:
//!
//! ## Offsets
//! Every cross-reference inside the region — free-list links, bucket
//! chains, key and value references — is an [`Offset`]: a signed byte
//! distance from the mapping base, with `-1` meaning "none". Offsets are
//! translated to addresses at the region boundary and nowhere else, which
//! is the single mechanism that makes the structure valid after remapping
//! at a different base, across processes or across restarts.
//!
//! ## Size-classed free lists
//! Allocation is served from two families of intrusive free lists embedded
//! in the region: 64 small classes stepping by 16 bytes up to 1 KiB, and
//! 20 big classes doubling from 2 KiB up to 1 GiB. An empty class refills
//! in a fixed batch (8 small, 4 big) from a bump allocator whose cursor
//! only moves forward; freed blocks go back to their class list and never
//! to the cursor, so the region's only true out-of-space condition is the
//! cursor reaching the end. Each block is prefixed by a segment header
//! stamped with its class size, which is how `free` finds the right list
//! without being told the original request size.
//!
//! ## The interprocess lock
//! All mutations of shared header state — the bump cursor, free-list
//! heads, bucket heads — happen under a spinlock that itself lives in the
//! region, so unrelated processes contend on the same word. While the lock
//! is held all signals are deferred: a handler that never returned control
//! would otherwise leave the lock held forever and wedge every attached
//! process. Each locked step is a single head or cursor mutation;
//! multi-step sequences such as [`set`](Arena::set)'s check-then-link are
//! deliberately *not* atomic as a whole (see `set`'s documentation for the
//! resulting race).
//!
//! # Persistence
//! The mapping is the persistent form: the header at offset 0 carries an
//! identity tag and format version that [`Arena::attach`] verifies, in the
//! native byte order of the creating platform. Cross-architecture sharing
//! is unsupported, and there is no migration between format versions.

pub use crate::arena::Arena;
pub use crate::error::ArenaError;
pub use crate::index::SetOutcome;
pub use crate::offset::Offset;

mod arena;
mod classes;
mod error;
mod header;
mod index;
mod lock;
mod offset;
