//! Globally ordered single-lock worklists.
//!
//! Simple, strongly ordered, and contended: one padded lock around one
//! standard container. They are the baseline the scalable variants are
//! measured against, and the building blocks the composite variants stack
//! per worker.

use std::collections::{BinaryHeap, VecDeque};

use crate::substrate::{PaddedLock, Topology};

use super::{Worklist, WorklistSpec};

/// Last-in-first-out worklist: one locked vector.
pub struct Lifo<T, const CONCURRENT: bool = true> {
    items: PaddedLock<Vec<T>, CONCURRENT>,
}

impl<T, const C: bool> Lifo<T, C> {
    /// Creates an empty LIFO.
    pub fn new() -> Self {
        Self {
            items: PaddedLock::new(Vec::new()),
        }
    }
}

impl<T, const C: bool> Default for Lifo<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send, const C: bool> Worklist<T> for Lifo<T, C> {
    fn push(&self, item: T) {
        self.items.lock().push(item);
    }

    fn push_batch<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.items.lock().extend(items);
    }

    fn pop(&self) -> Option<T> {
        self.items.lock().pop()
    }

    fn empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// First-in-first-out worklist: one locked deque.
pub struct Fifo<T, const CONCURRENT: bool = true> {
    items: PaddedLock<VecDeque<T>, CONCURRENT>,
}

impl<T, const C: bool> Fifo<T, C> {
    /// Creates an empty FIFO.
    pub fn new() -> Self {
        Self {
            items: PaddedLock::new(VecDeque::new()),
        }
    }
}

impl<T, const C: bool> Default for Fifo<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send, const C: bool> Worklist<T> for Fifo<T, C> {
    fn push(&self, item: T) {
        self.items.lock().push_back(item);
    }

    fn push_batch<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.items.lock().extend(items);
    }

    fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    fn empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// Priority worklist: one locked binary max-heap.
///
/// The item's `Ord` impl is the priority; wrap items in `core::cmp::Reverse`
/// for min-first order.
pub struct OrderedQueue<T: Ord, const CONCURRENT: bool = true> {
    items: PaddedLock<BinaryHeap<T>, CONCURRENT>,
}

impl<T: Ord, const C: bool> OrderedQueue<T, C> {
    /// Creates an empty priority queue.
    pub fn new() -> Self {
        Self {
            items: PaddedLock::new(BinaryHeap::new()),
        }
    }
}

impl<T: Ord, const C: bool> Default for OrderedQueue<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord + Send, const C: bool> Worklist<T> for OrderedQueue<T, C> {
    fn push(&self, item: T) {
        self.items.lock().push(item);
    }

    fn push_batch<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.items.lock().extend(items);
    }

    fn pop(&self) -> Option<T> {
        self.items.lock().pop()
    }

    fn empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// Builds a [`Lifo`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LifoSpec;

impl<T: Send> WorklistSpec<T> for LifoSpec {
    type Wl = Lifo<T>;

    fn build(&self, _topo: &Topology) -> Self::Wl {
        Lifo::new()
    }
}

/// Builds a [`Fifo`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoSpec;

impl<T: Send> WorklistSpec<T> for FifoSpec {
    type Wl = Fifo<T>;

    fn build(&self, _topo: &Topology) -> Self::Wl {
        Fifo::new()
    }
}

/// Builds an [`OrderedQueue`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedSpec;

impl<T: Ord + Send> WorklistSpec<T> for OrderedSpec {
    type Wl = OrderedQueue<T>;

    fn build(&self, _topo: &Topology) -> Self::Wl {
        OrderedQueue::new()
    }
}
