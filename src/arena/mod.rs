//! Arena lifecycle and the allocator core.
//!
//! An [`Arena`] is one process's handle to a fixed-size shared region
//! backed by a file. The region starts with the [`ArenaHeader`]; everything
//! behind it is handed out by a bump allocator whose cursor only ever moves
//! forward. Freed blocks return to per-class free lists embedded in the
//! header, never to the bump cursor, and every link between blocks is a
//! base-relative [`Offset`] so the structure survives being mapped at a
//! different address by another process.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::{self, addr_of_mut, NonNull};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, instrument, Level};

use crate::classes::{
    big_index, big_size, small_index, small_size, BIG_REFILL_BATCH, MAX_ALLOC, SMALL_MAX,
    SMALL_REFILL_BATCH,
};
use crate::error::{ArenaError, Result};
use crate::header::{
    ArenaHeader, SegmentHeader, ALIGNMENT, FORMAT_VERSION, HEADER_SIZE, MAGIC, SEG_HEADER_SIZE,
};
use crate::lock::ShmLockGuard;
use crate::offset::Offset;

#[cfg(test)]
mod tests;

/// Which of the two class systems a segment belongs to.
#[derive(Copy, Clone, Debug)]
enum ClassKind {
    Small,
    Big,
}

/// A handle to one process's mapping of a shared arena.
///
/// The handle owns the mapping and the file descriptor; dropping it (or
/// calling [`detach`](Arena::detach)) unmaps the region. The shared state
/// in the region itself outlives any handle and is only discarded with the
/// backing file.
///
/// All methods take `&self`: the arena is a single shared-write resource
/// and mutations to header state are serialized by the interprocess lock,
/// not by Rust ownership. Pointers returned by [`allocate`](Arena::allocate)
/// and [`get`](Arena::get) are only valid while this handle's mapping is
/// alive.
pub struct Arena {
    file: File,
    base: NonNull<u8>,
    size: usize,
}

// The mapping is shared mutable state guarded by the interprocess lock;
// the handle itself holds no thread-affine resources.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("fd", &self.file.as_raw_fd())
            .field("base", &self.base)
            .field("size", &self.size)
            .finish()
    }
}

impl Arena {
    /// Creates a new arena of exactly `size` bytes backed by `path`,
    /// truncating any existing file there. `mode` is the unix permission
    /// bits for the new file.
    ///
    /// Fails unless `size` exceeds the arena header's own size, or if any
    /// storage or mapping step fails.
    #[instrument(level = "info", skip(path), fields(path = %path.as_ref().display()), err(Debug, level = Level::ERROR))]
    pub fn create<P: AsRef<Path>>(path: P, size: usize, mode: u32) -> Result<Arena> {
        if size <= HEADER_SIZE {
            return Err(ArenaError::InvalidArgument(
                "region size must exceed the arena header",
            ));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path.as_ref())?;
        file.set_len(size as u64)?;

        let base = map_shared(&file, size)?;
        let arena = Arena { file, base, size };

        let hdr = arena.header();
        unsafe {
            (*hdr).magic = MAGIC;
            (*hdr).version = FORMAT_VERSION;
            (*hdr).replaced = 0;
            (*hdr).ctime = unix_now();
            (*hdr).lock.init();
            (*hdr).bump = HEADER_SIZE as i64;
            (*hdr).small_heads = [Offset::NONE; crate::classes::SMALL_CLASS_COUNT];
            (*hdr).big_heads = [Offset::NONE; crate::classes::BIG_CLASS_COUNT];
            (*hdr).buckets = [Offset::NONE; crate::header::BUCKET_COUNT];
        }

        info!(version = FORMAT_VERSION, size, "created arena");
        Ok(arena)
    }

    /// Attaches to an existing arena at `path`, mapping the file at its
    /// current length.
    ///
    /// Fails closed if the file does not carry the arena identity tag or
    /// was written by a different format version.
    #[instrument(level = "info", skip(path), fields(path = %path.as_ref().display()), err(Debug, level = Level::ERROR))]
    pub fn attach<P: AsRef<Path>>(path: P) -> Result<Arena> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let size = file.metadata()?.len() as usize;
        if size <= HEADER_SIZE {
            return Err(ArenaError::BadMagic);
        }

        let base = map_shared(&file, size)?;
        let arena = Arena { file, base, size };

        let hdr = arena.header();
        unsafe {
            if (*hdr).magic != MAGIC {
                return Err(ArenaError::BadMagic);
            }
            if (*hdr).version != FORMAT_VERSION {
                return Err(ArenaError::VersionMismatch {
                    found: (*hdr).version,
                    expected: FORMAT_VERSION,
                });
            }
        }

        info!(version = FORMAT_VERSION, size, "attached arena");
        Ok(arena)
    }

    /// Unmaps and closes the region. Dropping the handle does the same;
    /// taking `self` by value makes a double detach unrepresentable.
    pub fn detach(self) {}

    /// Detaches `handle` and attaches to `path` again, yielding a fresh
    /// mapping. Useful when a handle is suspected to be stale.
    pub fn reattach<P: AsRef<Path>>(path: P, handle: Arena) -> Result<Arena> {
        drop(handle);
        Arena::attach(path)
    }

    /// Allocates `size` bytes from the arena's size-classed free lists,
    /// refilling the class from the bump cursor when it is empty.
    ///
    /// Returns `None` for a zero size, for sizes above 1 GiB, and when the
    /// region is out of space. The returned pointer is 8-byte aligned,
    /// valid in this handle's mapping only, and stays allocated until
    /// passed to [`free`](Arena::free).
    #[instrument(level = "debug", ret(level = Level::DEBUG))]
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            None
        } else if size <= SMALL_MAX {
            self.allocate_classed(ClassKind::Small, size)
        } else if size <= MAX_ALLOC {
            self.allocate_classed(ClassKind::Big, size)
        } else {
            None
        }
    }

    /// Returns a previously allocated block to the head of its class free
    /// list, selected by the class size stamped in the segment header. A
    /// header whose stored class size is not positive is ignored.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`allocate`](Arena::allocate) on a
    /// handle mapping this same region and not freed since.
    #[instrument(level = "debug")]
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        let seg = ptr.as_ptr().cast::<SegmentHeader>().sub(1);
        let class_size = (*seg).class_size;
        if class_size <= 0 {
            return;
        }

        let class_size = class_size as usize;
        let (kind, index) = if class_size <= SMALL_MAX {
            (ClassKind::Small, small_index(class_size))
        } else if class_size <= MAX_ALLOC {
            (ClassKind::Big, big_index(class_size))
        } else {
            return;
        };
        let slot = self.head_slot(kind, index);

        let _guard = self.lock();
        (*seg).next = *slot;
        *slot = Offset::from_ptr(self.base(), seg.cast());
    }

    /// Creation time of the region, seconds since the Unix epoch.
    pub fn creation_time(&self) -> i64 {
        unsafe { (*self.header()).ctime }
    }

    /// The caller-managed "replaced" flag, false at creation.
    pub fn replaced(&self) -> bool {
        unsafe { (*self.header()).replaced != 0 }
    }

    pub fn set_replaced(&self, replaced: bool) {
        unsafe { (*self.header()).replaced = replaced as i32 };
    }

    /// Bytes the bump allocator can still hand out. Freed segments sitting
    /// on the class lists are not counted.
    pub fn remaining_bytes(&self) -> i64 {
        unsafe { self.size as i64 - (*self.header()).bump }
    }

    #[inline]
    pub(crate) fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline]
    pub(crate) fn header(&self) -> *mut ArenaHeader {
        self.base.as_ptr().cast()
    }

    /// Acquires the interprocess lock embedded in the header.
    pub(crate) fn lock(&self) -> ShmLockGuard<'_> {
        unsafe { (*self.header()).lock.lock() }
    }

    /// Hands out `size` bytes from the bump cursor, rounded up to
    /// [`ALIGNMENT`], or [`Offset::NONE`] once the cursor would pass the
    /// region end. This is the only way the arena runs out of space.
    ///
    /// Callers must hold the interprocess lock.
    fn raw_alloc(&self, size: usize) -> Offset {
        let rounded = (size + ALIGNMENT - 1) & !(ALIGNMENT - 1);
        let hdr = self.header();
        unsafe {
            let bump = (*hdr).bump;
            if bump + rounded as i64 > self.size as i64 {
                return Offset::NONE;
            }
            (*hdr).bump = bump + rounded as i64;
            Offset::new(bump)
        }
    }

    fn allocate_classed(&self, kind: ClassKind, size: usize) -> Option<NonNull<u8>> {
        let (index, class_size, batch) = match kind {
            ClassKind::Small => {
                let index = small_index(size);
                (index, small_size(index), SMALL_REFILL_BATCH)
            }
            ClassKind::Big => {
                let index = big_index(size);
                (index, big_size(index), BIG_REFILL_BATCH)
            }
        };
        let slot = self.head_slot(kind, index);

        let _guard = self.lock();
        unsafe {
            if (*slot).is_none() && !self.refill(slot, class_size, batch) {
                return None;
            }

            let seg = (*slot).to_ptr(self.base()).cast::<SegmentHeader>();
            *slot = (*seg).next;
            (*seg).next = Offset::NONE;
            NonNull::new(seg.add(1).cast())
        }
    }

    /// Replenishes one class free list with a fixed batch of fresh
    /// segments from the bump cursor, stamping the class size into each.
    /// Returns `false` if the cursor ran dry mid-batch; segments pushed
    /// before the failure stay on the list.
    ///
    /// Callers must hold the interprocess lock.
    unsafe fn refill(&self, slot: *mut Offset, class_size: usize, batch: usize) -> bool {
        for _ in 0..batch {
            let offset = self.raw_alloc(SEG_HEADER_SIZE + class_size);
            if offset.is_none() {
                debug!(class_size, "bump cursor exhausted mid-refill");
                return false;
            }

            let seg = offset.to_ptr(self.base()).cast::<SegmentHeader>();
            (*seg).class_size = class_size as i32;
            (*seg).next = *slot;
            *slot = offset;
        }
        true
    }

    /// Pointer to the free-list head slot for `kind`/`index` inside the
    /// header.
    fn head_slot(&self, kind: ClassKind, index: usize) -> *mut Offset {
        let hdr = self.header();
        unsafe {
            let heads: *mut Offset = match kind {
                ClassKind::Small => addr_of_mut!((*hdr).small_heads).cast(),
                ClassKind::Big => addr_of_mut!((*hdr).big_heads).cast(),
            };
            heads.add(index)
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.size);
        }
        info!("detached arena");
    }
}

/// Maps `size` bytes of `file` shared and read-write.
fn map_shared(file: &File, size: usize) -> Result<NonNull<u8>> {
    let base = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            0,
        )
    };
    if base == libc::MAP_FAILED {
        return Err(ArenaError::Storage(std::io::Error::last_os_error()));
    }
    NonNull::new(base.cast()).ok_or_else(|| {
        ArenaError::Storage(std::io::Error::other("mmap returned a null mapping"))
    })
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}
