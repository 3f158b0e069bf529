//! Interprocess spinlock with signal deferral.
//!
//! The lock word lives inside the mapped region itself, so every process
//! sharing the mapping contends on the same cell. Acquisition blocks all
//! deliverable signals for the calling thread before spinning: a signal
//! handler that never returns control (terminating the process, or jumping
//! out non-locally) while the lock is held would leave it held forever and
//! wedge every other attached process. The guard restores the previous
//! signal mask on release, on every exit path.

use core::sync::atomic::{AtomicU32, Ordering};
use std::hint;
use std::mem::MaybeUninit;
use std::ptr;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// Spin-wait mutual exclusion word, embedded in the arena header.
///
/// Safe to contend from unrelated processes as long as they map the region
/// with shared (not private) semantics.
#[repr(transparent)]
pub struct RawShmLock {
    state: AtomicU32,
}

impl RawShmLock {
    /// Resets the lock word to unlocked. Only valid while initializing a
    /// freshly created header, before any other process can attach.
    pub(crate) fn init(&self) {
        self.state.store(UNLOCKED, Ordering::Release);
    }

    /// Defers signals, then spins until the lock is held.
    pub(crate) fn lock(&self) -> ShmLockGuard<'_> {
        let backup = block_all_signals();
        self.acquire();
        ShmLockGuard { lock: self, backup }
    }

    fn acquire(&self) {
        loop {
            if self
                .state
                .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            while self.state.load(Ordering::Relaxed) == LOCKED {
                hint::spin_loop();
            }
        }
    }

    fn release(&self) {
        self.state.store(UNLOCKED, Ordering::Release);
    }
}

/// Scoped ownership of a [`RawShmLock`]. Dropping the guard releases the
/// lock and restores the signal mask that was in effect before acquisition.
pub struct ShmLockGuard<'a> {
    lock: &'a RawShmLock,
    backup: libc::sigset_t,
}

impl Drop for ShmLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
        restore_signals(&self.backup);
    }
}

/// Blocks every deliverable signal for the calling thread and returns the
/// prior mask.
fn block_all_signals() -> libc::sigset_t {
    unsafe {
        let mut full = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigfillset(full.as_mut_ptr());
        let mut backup = MaybeUninit::<libc::sigset_t>::uninit();
        libc::pthread_sigmask(libc::SIG_BLOCK, full.as_ptr(), backup.as_mut_ptr());
        backup.assume_init()
    }
}

fn restore_signals(backup: &libc::sigset_t) {
    unsafe {
        libc::pthread_sigmask(libc::SIG_SETMASK, backup, ptr::null_mut());
    }
}
