//! Isolation of hot shared words onto their own cache lines.
//!
//! The runtime's contended state is tiny: lock words, termination token
//! slots, per-worker worklist cursors. Left adjacent in memory, two workers
//! hammering neighboring words would invalidate each other's cache line on
//! every store. Wrapping each in [`CachePadded`] spends a line of memory per
//! value to keep that traffic independent.

use core::ops::{Deref, DerefMut};

// 128 rather than 64: covers the spatial prefetcher's pair-of-lines
// granularity on recent x86 and the larger line size of some ARM parts.
const LINE: usize = 128;

/// A `T` alone on its cache line(s).
///
/// Transparent to use: derefs to the inner value, so atomics wrapped in it
/// keep their normal call syntax.
#[repr(align(128))]
#[derive(Debug, Default)]
pub struct CachePadded<T> {
    inner: T,
}

impl<T> CachePadded<T> {
    /// Wraps `value` in its own line.
    pub const fn new(value: T) -> Self {
        Self { inner: value }
    }

    /// Unwraps the inner value.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for CachePadded<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

const _: () = assert!(core::mem::align_of::<CachePadded<u8>>() == LINE);
