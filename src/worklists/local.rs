//! Composite worklists with per-worker locality.
//!
//! These stack an inner worklist per worker over a shared global one. The
//! inner queues hold the hot, locally produced work; the global structure is
//! the overflow and exchange channel. Which traffic goes where is the only
//! difference between the variants.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::substrate::{PerThread, Topology};

use super::obim::Indexer;
use super::{Worklist, WorklistSpec};

/// Per-worker inner worklists over a shared global worklist.
///
/// Pushes stay local and pops prefer local work; aborted items go to the
/// global worklist so a conflict hotspot drains away from the worker that
/// keeps losing it. Seeding goes global so initial work is visible to all.
pub struct LocalQueues<T: Send, L: Worklist<T>, G: Worklist<T>> {
    local: PerThread<L>,
    global: G,
    _items: core::marker::PhantomData<fn(T) -> T>,
}

impl<T: Send, L: Worklist<T>, G: Worklist<T>> LocalQueues<T, L, G> {
    /// Creates the composite from per-worker inner lists and a global list.
    pub fn new(local: PerThread<L>, global: G) -> Self {
        Self {
            local,
            global,
            _items: core::marker::PhantomData,
        }
    }
}

impl<T: Send, L: Worklist<T>, G: Worklist<T>> Worklist<T> for LocalQueues<T, L, G> {
    fn push(&self, item: T) {
        self.local.local().push(item);
    }

    fn pop(&self) -> Option<T> {
        self.local.local().pop().or_else(|| self.global.pop())
    }

    fn empty(&self) -> bool {
        self.local.local().empty() && self.global.empty()
    }

    fn push_initial<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.global.push_initial(items);
    }

    fn aborted(&self, item: T) {
        self.global.push(item);
    }
}

/// Per-worker worklists with neighbor stealing.
///
/// A pop that finds the local queue dry falls back to the rotating "next"
/// worker's queue, so the inner worklist must be concurrency-safe.
pub struct StealingLocal<T: Send, L: Worklist<T>> {
    data: PerThread<L>,
    topo: Topology,
    _items: core::marker::PhantomData<fn(T) -> T>,
}

impl<T: Send, L: Worklist<T>> StealingLocal<T, L> {
    /// Creates the composite from per-worker lists.
    pub fn new(data: PerThread<L>, topo: Topology) -> Self {
        Self {
            data,
            topo,
            _items: core::marker::PhantomData,
        }
    }
}

impl<T: Send, L: Worklist<T>> Worklist<T> for StealingLocal<T, L> {
    fn push(&self, item: T) {
        self.data.local().push(item);
    }

    fn pop(&self) -> Option<T> {
        self.data.local().pop().or_else(|| {
            let victim = self.topo.next(crate::substrate::current_tid());
            self.data.remote(victim).pop()
        })
    }

    fn empty(&self) -> bool {
        self.data.local().empty()
    }
}

/// OBIM overlay: local queues filtered by a last-seen index.
///
/// Each worker remembers the index of the last item it took from the global
/// overlay. Items at or below that index stay local (they would be picked
/// next anyway); items above it go global so a better-positioned worker can
/// take them.
pub struct LocalFilter<T: Send, I, L: Worklist<T>, G: Worklist<T>> {
    locals: PerThread<FilterSlot<L>>,
    global: G,
    indexer: I,
    _items: core::marker::PhantomData<fn(T) -> T>,
}

/// One worker's filtered queue and threshold.
struct FilterSlot<L> {
    queue: L,
    current: AtomicUsize,
}

impl<T: Send, I: Indexer<T>, L: Worklist<T>, G: Worklist<T>> LocalFilter<T, I, L, G> {
    /// Creates the overlay, building one inner queue per worker.
    pub fn new(
        topo: &Topology,
        global: G,
        indexer: I,
        mut make_local: impl FnMut() -> L,
    ) -> Self {
        let locals = PerThread::new_with(topo.threads(), |_| FilterSlot {
            queue: make_local(),
            current: AtomicUsize::new(0),
        });
        Self {
            locals,
            global,
            indexer,
            _items: core::marker::PhantomData,
        }
    }
}

impl<T: Send, I: Indexer<T>, L: Worklist<T>, G: Worklist<T>> Worklist<T>
    for LocalFilter<T, I, L, G>
{
    fn push(&self, item: T) {
        let slot = self.locals.local();
        if self.indexer.index(&item) <= slot.current.load(Ordering::Relaxed) {
            slot.queue.push(item);
        } else {
            self.global.push(item);
        }
    }

    fn pop(&self) -> Option<T> {
        let slot = self.locals.local();
        slot.queue.pop().or_else(|| {
            let item = self.global.pop()?;
            slot.current.store(self.indexer.index(&item), Ordering::Relaxed);
            Some(item)
        })
    }

    fn empty(&self) -> bool {
        self.locals.local().queue.empty() && self.global.empty()
    }

    fn push_initial<It>(&self, items: It)
    where
        It: IntoIterator<Item = T>,
    {
        self.global.push_initial(items);
    }
}

/// Builds a [`LocalQueues`] from inner specs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalQueuesSpec<LS, GS> {
    /// Per-worker inner worklist spec.
    pub local: LS,
    /// Shared global worklist spec.
    pub global: GS,
}

impl<T, LS, GS> WorklistSpec<T> for LocalQueuesSpec<LS, GS>
where
    T: Send,
    LS: WorklistSpec<T>,
    GS: WorklistSpec<T>,
{
    type Wl = LocalQueues<T, LS::Wl, GS::Wl>;

    fn build(&self, topo: &Topology) -> Self::Wl {
        let local = PerThread::new_with(topo.threads(), |_| self.local.build(topo));
        LocalQueues::new(local, self.global.build(topo))
    }
}

/// Builds a [`StealingLocal`] from an inner spec.
#[derive(Debug, Clone, Copy, Default)]
pub struct StealingSpec<LS> {
    /// Per-worker inner worklist spec.
    pub inner: LS,
}

impl<T, LS> WorklistSpec<T> for StealingSpec<LS>
where
    T: Send,
    LS: WorklistSpec<T>,
{
    type Wl = StealingLocal<T, LS::Wl>;

    fn build(&self, topo: &Topology) -> Self::Wl {
        let data = PerThread::new_with(topo.threads(), |_| self.inner.build(topo));
        StealingLocal::new(data, *topo)
    }
}

/// Builds a [`LocalFilter`] from inner specs and an indexer.
#[derive(Debug, Clone)]
pub struct LocalFilterSpec<I, LS, GS> {
    /// The scheduling metric.
    pub indexer: I,
    /// Per-worker inner worklist spec.
    pub local: LS,
    /// Shared overlay worklist spec.
    pub global: GS,
}

impl<T, I, LS, GS> WorklistSpec<T> for LocalFilterSpec<I, LS, GS>
where
    T: Send,
    I: Indexer<T> + Clone,
    LS: WorklistSpec<T>,
    GS: WorklistSpec<T>,
{
    type Wl = LocalFilter<T, I, LS::Wl, GS::Wl>;

    fn build(&self, topo: &Topology) -> Self::Wl {
        LocalFilter::new(topo, self.global.build(topo), self.indexer.clone(), || {
            self.local.build(topo)
        })
    }
}
