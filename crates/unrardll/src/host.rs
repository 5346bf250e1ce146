//! Host exclusivity lock.
//!
//! Caller-owned objects handed to the bridge (callbacks, output files) are
//! only touched while the process-wide host lock is held. Every primitive
//! operation receives a [`HostGuard`] and releases it around the blocking
//! native call; the callback bridge acquires it again for each excursion into
//! caller code, so other threads can make progress while the native library
//! works.
//!
//! The lock is re-entrant: code already holding a guard on the current thread
//! (including caller code running inside a callback) may acquire it again.

use parking_lot::{const_reentrant_mutex, ReentrantMutex, ReentrantMutexGuard};

static HOST_LOCK: ReentrantMutex<()> = const_reentrant_mutex(());

/// Proof that the current thread holds host exclusivity.
pub struct HostGuard {
    guard: ReentrantMutexGuard<'static, ()>,
}

/// Acquire host exclusivity, blocking until it is available.
pub fn acquire() -> HostGuard {
    HostGuard {
        guard: HOST_LOCK.lock(),
    }
}

impl HostGuard {
    /// Run `f` with this guard's hold on the lock released, re-acquiring it
    /// before returning.
    ///
    /// Only one level of a re-entrant hold is released; an outer guard on the
    /// same thread keeps the lock held.
    pub fn allow_threads<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        ReentrantMutexGuard::unlocked(&mut self.guard, f)
    }
}
