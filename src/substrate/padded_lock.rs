//! A cache-padded test-and-test-and-set spin lock.
//!
//! Critical sections in the runtime are short (a handful of pointer moves),
//! so a spin lock padded to its own cache line beats a full mutex. The
//! `CONCURRENT` parameter selects between the real atomic protocol and a
//! debug-checked no-op for queues that are only ever touched by their owning
//! worker.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use super::cache_padded::CachePadded;

/// A spin lock holding `T`, padded so the lock word sits on its own cache
/// line.
///
/// With `CONCURRENT = false` the acquire/release protocol degrades to a
/// debug assertion; callers promise that all accesses come from one thread
/// at a time (the owning worker of a per-thread slot). The type is still
/// `Sync` in that configuration so it can live inside shared per-thread
/// storage; the exclusivity discipline is the caller's.
pub struct PaddedLock<T, const CONCURRENT: bool = true> {
    state: CachePadded<AtomicBool>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send, const C: bool> Send for PaddedLock<T, C> {}
unsafe impl<T: Send, const C: bool> Sync for PaddedLock<T, C> {}

impl<T, const CONCURRENT: bool> PaddedLock<T, CONCURRENT> {
    /// Creates a new unlocked `PaddedLock`.
    pub const fn new(value: T) -> Self {
        Self {
            state: CachePadded::new(AtomicBool::new(false)),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, spinning until it is available.
    #[inline]
    pub fn lock(&self) -> PaddedLockGuard<'_, T, CONCURRENT> {
        if CONCURRENT {
            while self
                .state
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                // Spin on a plain load to keep the line shared until release.
                while self.state.load(Ordering::Relaxed) {
                    core::hint::spin_loop();
                }
            }
        } else {
            let was_locked = self.state.swap(true, Ordering::Relaxed);
            debug_assert!(!was_locked, "non-concurrent lock entered twice");
        }
        PaddedLockGuard { lock: self }
    }

    /// Attempts to acquire the lock without spinning.
    #[inline]
    pub fn try_lock(&self) -> Option<PaddedLockGuard<'_, T, CONCURRENT>> {
        if CONCURRENT {
            if self
                .state
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                Some(PaddedLockGuard { lock: self })
            } else {
                None
            }
        } else {
            Some(self.lock())
        }
    }

    /// Returns a mutable reference to the inner value.
    ///
    /// No locking is needed: `&mut self` proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Unwraps the inner value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default, const C: bool> Default for PaddedLock<T, C> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII guard for [`PaddedLock`]; releases on drop.
pub struct PaddedLockGuard<'a, T, const CONCURRENT: bool> {
    lock: &'a PaddedLock<T, CONCURRENT>,
}

impl<T, const C: bool> Deref for PaddedLockGuard<'_, T, C> {
    type Target = T;
    fn deref(&self) -> &T {
        // Safety: the guard holds the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, const C: bool> DerefMut for PaddedLockGuard<'_, T, C> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard holds the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, const CONCURRENT: bool> Drop for PaddedLockGuard<'_, T, CONCURRENT> {
    fn drop(&mut self) {
        if CONCURRENT {
            self.lock.state.store(false, Ordering::Release);
        } else {
            self.lock.state.store(false, Ordering::Relaxed);
        }
    }
}
