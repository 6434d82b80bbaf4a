//! Priority-approximating worklists ordered by an integer metric.
//!
//! Instead of one locked heap, these spread items over an array of
//! sub-worklists ("buckets") indexed by a user-supplied metric, with a
//! per-worker cursor remembering the best-known non-empty bucket. A push
//! below the cursor pulls the cursor down; a pop tries the cursor's bucket
//! and otherwise rescans. Workers may momentarily disagree on the best
//! bucket, which is the point: no global lock, approximate priority order.
//!
//! After a failed cursor probe the ascending rescan leaves the cursor at the
//! first bucket it found non-empty, so dense re-insertion at high indices
//! does not make the cursor oscillate back to zero.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::substrate::{PerThread, Topology};

use super::simple::Fifo;
use super::{Worklist, WorklistSpec};

/// Maps a work item to its scheduling index; lower is sooner.
pub trait Indexer<T>: Send + Sync {
    /// The item's integer metric.
    fn index(&self, item: &T) -> usize;
}

impl<T, F> Indexer<T> for F
where
    F: Fn(&T) -> usize + Send + Sync,
{
    fn index(&self, item: &T) -> usize {
        self(item)
    }
}

/// Ordered-by-integer-metric worklist: `range + 1` FIFO buckets and a
/// per-worker cursor. Indices at or above `range` share the last bucket.
pub struct OrderedByMetric<T, I> {
    buckets: Box<[Fifo<T>]>,
    cursor: PerThread<AtomicUsize>,
    indexer: I,
}

impl<T: Send, I: Indexer<T>> OrderedByMetric<T, I> {
    /// Creates a worklist with buckets `0..=range`.
    pub fn new(topo: &Topology, indexer: I, range: usize) -> Self {
        Self {
            buckets: (0..=range).map(|_| Fifo::new()).collect(),
            cursor: PerThread::new_with(topo.threads(), |_| AtomicUsize::new(0)),
            indexer,
        }
    }

    fn scan(&self, cursor: &AtomicUsize) -> Option<T> {
        for (i, bucket) in self.buckets.iter().enumerate() {
            if let Some(item) = bucket.pop() {
                cursor.store(i, Ordering::Relaxed);
                return Some(item);
            }
        }
        cursor.store(0, Ordering::Relaxed);
        None
    }
}

impl<T: Send, I: Indexer<T>> Worklist<T> for OrderedByMetric<T, I> {
    fn push(&self, item: T) {
        let index = self.indexer.index(&item).min(self.buckets.len() - 1);
        self.buckets[index].push(item);
        let cursor = self.cursor.local();
        if index < cursor.load(Ordering::Relaxed) {
            cursor.store(index, Ordering::Relaxed);
        }
    }

    fn pop(&self) -> Option<T> {
        let cursor = self.cursor.local();
        let current = cursor.load(Ordering::Relaxed).min(self.buckets.len() - 1);
        if let Some(item) = self.buckets[current].pop() {
            return Some(item);
        }
        self.scan(cursor)
    }

    fn empty(&self) -> bool {
        self.buckets.iter().all(|b| b.empty())
    }
}

/// Number of buckets in [`ApproxOrderByMetric`].
const APPROX_BUCKETS: usize = 2048;

/// Approximate variant: a fixed bucket count, index modulo the count, and a
/// circular scan. No ordering guarantee; bounded scan cost.
pub struct ApproxOrderByMetric<T, I> {
    buckets: Box<[Fifo<T>]>,
    cursor: PerThread<AtomicUsize>,
    indexer: I,
}

impl<T: Send, I: Indexer<T>> ApproxOrderByMetric<T, I> {
    /// Creates the worklist for `topo`.
    pub fn new(topo: &Topology, indexer: I) -> Self {
        Self {
            buckets: (0..APPROX_BUCKETS).map(|_| Fifo::new()).collect(),
            cursor: PerThread::new_with(topo.threads(), |_| AtomicUsize::new(0)),
            indexer,
        }
    }
}

impl<T: Send, I: Indexer<T>> Worklist<T> for ApproxOrderByMetric<T, I> {
    fn push(&self, item: T) {
        let index = self.indexer.index(&item) % APPROX_BUCKETS;
        self.buckets[index].push(item);
    }

    fn pop(&self) -> Option<T> {
        let cursor = self.cursor.local();
        let start = cursor.load(Ordering::Relaxed) % APPROX_BUCKETS;
        for step in 0..APPROX_BUCKETS {
            let i = (start + step) % APPROX_BUCKETS;
            if let Some(item) = self.buckets[i].pop() {
                cursor.store(i, Ordering::Relaxed);
                return Some(item);
            }
        }
        None
    }

    fn empty(&self) -> bool {
        self.buckets.iter().all(|b| b.empty())
    }
}

/// Logarithmic variant: buckets keyed by the most-significant-bit position
/// of the index, giving exponentially spaced priority classes.
pub struct LogOrderByMetric<T, I> {
    buckets: Box<[Fifo<T>]>,
    cursor: PerThread<AtomicUsize>,
    indexer: I,
}

const LOG_BUCKETS: usize = usize::BITS as usize + 1;

fn log_bin(index: usize) -> usize {
    (usize::BITS - index.leading_zeros()) as usize
}

impl<T: Send, I: Indexer<T>> LogOrderByMetric<T, I> {
    /// Creates the worklist for `topo`.
    pub fn new(topo: &Topology, indexer: I) -> Self {
        Self {
            buckets: (0..LOG_BUCKETS).map(|_| Fifo::new()).collect(),
            cursor: PerThread::new_with(topo.threads(), |_| AtomicUsize::new(0)),
            indexer,
        }
    }
}

impl<T: Send, I: Indexer<T>> Worklist<T> for LogOrderByMetric<T, I> {
    fn push(&self, item: T) {
        let bin = log_bin(self.indexer.index(&item));
        self.buckets[bin].push(item);
        let cursor = self.cursor.local();
        if bin < cursor.load(Ordering::Relaxed) {
            cursor.store(bin, Ordering::Relaxed);
        }
    }

    fn pop(&self) -> Option<T> {
        let cursor = self.cursor.local();
        let current = cursor.load(Ordering::Relaxed);
        if let Some(item) = self.buckets[current].pop() {
            return Some(item);
        }
        for (i, bucket) in self.buckets.iter().enumerate() {
            if let Some(item) = bucket.pop() {
                cursor.store(i, Ordering::Relaxed);
                return Some(item);
            }
        }
        cursor.store(0, Ordering::Relaxed);
        None
    }

    fn empty(&self) -> bool {
        self.buckets.iter().all(|b| b.empty())
    }
}

/// Builds an [`OrderedByMetric`].
#[derive(Debug, Clone)]
pub struct ObimSpec<I> {
    /// The scheduling metric.
    pub indexer: I,
    /// Bucket range; indices clamp to `range`.
    pub range: usize,
}

impl<T: Send, I: Indexer<T> + Clone> WorklistSpec<T> for ObimSpec<I> {
    type Wl = OrderedByMetric<T, I>;

    fn build(&self, topo: &Topology) -> Self::Wl {
        OrderedByMetric::new(topo, self.indexer.clone(), self.range)
    }
}

/// Builds an [`ApproxOrderByMetric`].
#[derive(Debug, Clone)]
pub struct ApproxObimSpec<I> {
    /// The scheduling metric.
    pub indexer: I,
}

impl<T: Send, I: Indexer<T> + Clone> WorklistSpec<T> for ApproxObimSpec<I> {
    type Wl = ApproxOrderByMetric<T, I>;

    fn build(&self, topo: &Topology) -> Self::Wl {
        ApproxOrderByMetric::new(topo, self.indexer.clone())
    }
}

/// Builds a [`LogOrderByMetric`].
#[derive(Debug, Clone)]
pub struct LogObimSpec<I> {
    /// The scheduling metric.
    pub indexer: I,
}

impl<T: Send, I: Indexer<T> + Clone> WorklistSpec<T> for LogObimSpec<I> {
    type Wl = LogOrderByMetric<T, I>;

    fn build(&self, topo: &Topology) -> Self::Wl {
        LogOrderByMetric::new(topo, self.indexer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::log_bin;

    #[test]
    fn log_bins_are_msb_positions() {
        assert_eq!(log_bin(0), 0);
        assert_eq!(log_bin(1), 1);
        assert_eq!(log_bin(2), 2);
        assert_eq!(log_bin(3), 2);
        assert_eq!(log_bin(4), 3);
        assert_eq!(log_bin(usize::MAX), usize::BITS as usize);
    }
}
