//! Per-worker storage slots.
//!
//! One cache-padded slot per worker, indexed by worker id. The owning worker
//! reaches its slot through [`PerThread::local`]; other workers may peek (or
//! push into a lock-protected slot) through [`PerThread::remote`]. Mutation
//! is by interior mutability of the slot type.

use super::cache_padded::CachePadded;
use super::pool::current_tid;

/// An array of per-worker values, one cache line each.
pub struct PerThread<T> {
    slots: Box<[CachePadded<T>]>,
}

impl<T> PerThread<T> {
    /// Creates `threads` slots, initializing each with `init(tid)`.
    pub fn new_with(threads: usize, mut init: impl FnMut(usize) -> T) -> Self {
        assert!(threads > 0, "per-thread storage needs at least one slot");
        let slots = (0..threads).map(|tid| CachePadded::new(init(tid))).collect();
        Self { slots }
    }

    /// The slot of the calling worker.
    ///
    /// # Panics
    /// Panics if the calling thread's worker id is outside this storage,
    /// i.e. the storage is used from a pool larger than it was sized for.
    #[inline]
    pub fn local(&self) -> &T {
        &self.slots[current_tid()]
    }

    /// The slot of worker `tid`.
    #[inline]
    pub fn remote(&self, tid: usize) -> &T {
        &self.slots[tid]
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slots (never true for a constructed storage).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates over all slots in worker order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().map(|s| &**s)
    }

    /// Iterates mutably; `&mut self` proves no worker is running.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().map(|s| &mut **s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn remote_peek_sees_owner_writes() {
        let pts: PerThread<AtomicUsize> = PerThread::new_with(3, |tid| AtomicUsize::new(tid));
        pts.local().store(42, Ordering::Relaxed);
        assert_eq!(pts.remote(0).load(Ordering::Relaxed), 42);
        assert_eq!(pts.remote(2).load(Ordering::Relaxed), 2);
        assert_eq!(pts.iter().count(), 3);
    }
}
