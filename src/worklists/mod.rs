//! Worklists: concurrency-safe bags of work items.
//!
//! Every variant satisfies one contract ([`Worklist`]) and differs only in
//! ordering (LIFO, FIFO, priority, approximate priority, none) and locality
//! (one global structure, per-worker queues, chunks). The executor is
//! written against the contract alone, so variants compose: a
//! [`LocalQueues`] can wrap any global worklist, an [`OrderedByMetric`] can
//! sit over any bucket container.
//!
//! Operations never fail visibly and [`Worklist::empty`] is advisory: it may
//! report empty while a concurrent push is in flight. Termination detection
//! compensates, so consumers must not treat a single `empty()` as proof of
//! quiescence.

mod chunked;
mod local;
mod obim;
mod simple;

pub use chunked::{ChunkedFifo, ChunkedFifoSpec};
pub use local::{
    LocalFilter, LocalFilterSpec, LocalQueues, LocalQueuesSpec, StealingLocal, StealingSpec,
};
pub use obim::{
    ApproxObimSpec, ApproxOrderByMetric, Indexer, LogObimSpec, LogOrderByMetric, ObimSpec,
    OrderedByMetric,
};
pub use simple::{Fifo, FifoSpec, Lifo, LifoSpec, OrderedQueue, OrderedSpec};

use crate::substrate::Topology;

/// A bag of work items shared by all workers.
///
/// Implementations route per-worker state by the calling thread's worker id,
/// so a worklist built for a topology must only be used from workers of a
/// pool with that topology (or from a single unregistered thread, which
/// counts as worker 0).
pub trait Worklist<T: Send>: Send + Sync {
    /// Adds one item.
    fn push(&self, item: T);

    /// Adds a batch of items; the default forwards to [`push`](Self::push).
    fn push_batch<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        for item in items {
            self.push(item);
        }
    }

    /// Removes some item, or `None` if nothing was found.
    fn pop(&self) -> Option<T>;

    /// Best-effort emptiness probe; false positives are allowed under
    /// concurrent pushes.
    fn empty(&self) -> bool;

    /// Seeds the worklist with a worker's slice of the initial range,
    /// making the items globally visible.
    fn push_initial<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.push_batch(items);
    }

    /// Re-enqueues an item whose iteration aborted.
    ///
    /// The executor routes aborted work through its own retry handler and
    /// does not call this hook; it exists for user-driven worklists that
    /// want abort-aware placement (see [`LocalQueues`]).
    fn aborted(&self, item: T) {
        self.push(item);
    }
}

/// A recipe for building a worklist of any item type.
///
/// Every variant is constructed from the same shape — a spec value plus the
/// runtime topology — so loop call sites can name a worklist family without
/// committing to an item type.
pub trait WorklistSpec<T: Send> {
    /// The worklist this spec builds.
    type Wl: Worklist<T>;

    /// Builds the worklist for `topo`.
    fn build(&self, topo: &Topology) -> Self::Wl;
}

/// The default worklist family: chunked FIFO, whose shared chunk list gives
/// cross-worker stealing for free.
pub type DefaultSpec = ChunkedFifoSpec;
