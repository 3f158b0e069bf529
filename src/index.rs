//! Append-only key/value index over the arena allocator.
//!
//! A fixed table of 1024 hash buckets lives in the arena header; each
//! bucket heads a singly linked chain of [`EntryNode`]s in insertion order.
//! Keys are copied into arena-owned buffers; values are stored as the
//! offset of a caller-supplied address inside the region, never as a copy.
//! There is no deletion and no update: the first write of a key wins.

use std::mem::size_of;
use std::ptr::{addr_of_mut, NonNull};
use std::slice;

use tracing::{instrument, Level};

use crate::arena::Arena;
use crate::error::{ArenaError, Result};
use crate::header::{EntryNode, BUCKET_COUNT};
use crate::offset::Offset;

/// Outcome of a successful [`set`](Arena::set) call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SetOutcome {
    /// The key was absent and a new entry was linked in.
    Inserted,
    /// The key already had an entry; first write wins and nothing changed.
    AlreadyPresent,
}

/// Wrapping sum of the key bytes modulo the bucket count.
///
/// Deliberately weak: collisions are absorbed by bucket chains, and the
/// persisted format fixes the scheme, so this is a placeholder rather than
/// anything resembling a cryptographic hash.
fn bucket_of(key: &[u8]) -> usize {
    key.iter()
        .fold(0usize, |acc, &b| acc.wrapping_add(b as usize))
        % BUCKET_COUNT
}

impl Arena {
    /// Looks up `key`, returning the address stored by the first matching
    /// [`set`](Arena::set). An empty key is never found.
    ///
    /// The bucket chain is walked without taking the lock: chains are
    /// append-only, so a concurrent writer can only prepend entries this
    /// walk does not see.
    pub fn get(&self, key: &[u8]) -> Option<NonNull<u8>> {
        if key.is_empty() {
            return None;
        }

        let base = self.base();
        let mut offset = unsafe { *self.bucket_slot(bucket_of(key)) };
        while offset.is_some() {
            unsafe {
                let node = offset.to_ptr(base).cast::<EntryNode>();
                if (*node).klen as usize == key.len() {
                    let stored = slice::from_raw_parts((*node).key.to_ptr(base), key.len());
                    if stored == key {
                        return NonNull::new((*node).value.to_ptr(base));
                    }
                }
                offset = (*node).next;
            }
        }
        None
    }

    /// Inserts `key` → `value`, where `value` must be an address inside
    /// this same mapped region (typically from a prior
    /// [`allocate`](Arena::allocate) on this arena). Only the offset of
    /// `value` is stored; the bytes behind it are never copied and are not
    /// protected by the arena lock.
    ///
    /// If the key is already present nothing changes and
    /// [`AlreadyPresent`](SetOutcome::AlreadyPresent) is reported. On an
    /// allocation failure everything allocated by this call is freed again
    /// and the bucket is left untouched.
    ///
    /// The absence check and the link step are not atomic as a whole: two
    /// racing writers can both observe the key absent and both link an
    /// entry for it. `get` then always returns the first entry reached, so
    /// the duplicate is unreachable but does occupy arena space.
    #[instrument(level = "debug", skip_all, fields(klen = key.len()), ret(level = Level::DEBUG), err(Debug, level = Level::DEBUG))]
    pub fn set(&self, key: &[u8], value: NonNull<u8>) -> Result<SetOutcome> {
        if key.is_empty() {
            return Err(ArenaError::InvalidArgument("key must not be empty"));
        }
        if self.get(key).is_some() {
            return Ok(SetOutcome::AlreadyPresent);
        }

        let node_ptr = self
            .allocate(size_of::<EntryNode>())
            .ok_or(ArenaError::Exhausted)?;
        let key_ptr = match self.allocate(key.len()) {
            Some(ptr) => ptr,
            None => {
                unsafe { self.free(node_ptr) };
                return Err(ArenaError::Exhausted);
            }
        };

        let base = self.base();
        unsafe {
            std::ptr::copy_nonoverlapping(key.as_ptr(), key_ptr.as_ptr(), key.len());

            let node = node_ptr.as_ptr().cast::<EntryNode>();
            (*node).key = Offset::from_ptr(base, key_ptr.as_ptr());
            (*node).klen = key.len() as i32;
            (*node).value = Offset::from_ptr(base, value.as_ptr());

            let slot = self.bucket_slot(bucket_of(key));
            let _guard = self.lock();
            (*node).next = *slot;
            *slot = Offset::from_ptr(base, node.cast());
        }
        Ok(SetOutcome::Inserted)
    }

    /// Pointer to the bucket head slot inside the header.
    fn bucket_slot(&self, bucket: usize) -> *mut Offset {
        debug_assert!(bucket < BUCKET_COUNT);
        let hdr = self.header();
        unsafe { addr_of_mut!((*hdr).buckets).cast::<Offset>().add(bucket) }
    }
}
