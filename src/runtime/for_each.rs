//! The `for_each` executor.
//!
//! One executor instance drives one loop: it seeds the worklist from the
//! input range (one slice per worker), then each worker repeatedly pops,
//! runs the operator inside a speculative iteration, commits or rolls back,
//! drains its abort queue, and asks the termination detector whether anyone
//! still has work. Quiescence plus an empty worklist ends the loop; a break
//! request ends it early without failing the run.
//!
//! Variant points are resolved before the first iteration: whether aborts
//! are possible and whether this worker leads its socket are monomorphized
//! into the worker body; pushes, breaks, per-iteration allocation and extra
//! stats are booleans read once per loop, never looked up per item.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::substrate::{
    pause, Barrier, CachePadded, PaddedLock, Termination, ThreadPool, Topology, TopologyError,
    Worker,
};
use crate::worklists::{ChunkedFifoSpec, Fifo, Worklist, WorklistSpec};

use super::abort::{AbortHandler, AbortPolicy, Retry};
use super::context::{self, Conflict, IterationContext};
use super::stats::{LoopReport, LoopStat, PhaseTimer};
use super::user::{BulkSink, UserContext, WorklistSink};

/// Batch cap between termination checks for leaders and breakable loops.
const BATCH: usize = 64;

/// Properties of one loop, all resolved before it starts.
#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    pub(crate) name: &'static str,
    pub(crate) detect_conflicts: bool,
    pub(crate) pushes: bool,
    pub(crate) breakable: bool,
    pub(crate) per_iter_alloc: bool,
    pub(crate) more_stats: bool,
    pub(crate) abort_policy: Option<AbortPolicy>,
}

impl LoopOptions {
    /// Options under `name` with the defaults: conflict detection on,
    /// pushes allowed, no break flag, no per-iteration arena.
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            detect_conflicts: true,
            pushes: true,
            breakable: false,
            per_iter_alloc: false,
            more_stats: false,
            abort_policy: None,
        }
    }

    /// Declares the operator conflict-free; iterations run without the
    /// speculative bracket.
    #[must_use]
    pub fn no_conflict_detection(mut self) -> Self {
        self.detect_conflicts = false;
        self
    }

    /// Declares that the operator never pushes; elides the push buffer.
    #[must_use]
    pub fn no_pushes(mut self) -> Self {
        self.pushes = false;
        self
    }

    /// Allows the operator to stop the loop early.
    #[must_use]
    pub fn breakable(mut self) -> Self {
        self.breakable = true;
        self
    }

    /// Gives the operator a per-iteration arena.
    #[must_use]
    pub fn per_iter_alloc(mut self) -> Self {
        self.per_iter_alloc = true;
        self
    }

    /// Collects init/exec phase timings alongside the counters.
    #[must_use]
    pub fn more_stats(mut self) -> Self {
        self.more_stats = true;
        self
    }

    /// Overrides the topology-derived retry placement policy.
    #[must_use]
    pub fn abort_policy(mut self, policy: AbortPolicy) -> Self {
        self.abort_policy = Some(policy);
        self
    }
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self::named("for_each")
    }
}

/// A parallel runtime instance: topology, worker pool, barrier and
/// termination detector. The runtime outlives every loop it runs; loops on
/// distinct runtimes may run concurrently, loops on one runtime are
/// serialized by `&mut self`.
pub struct Runtime {
    topo: Topology,
    pool: ThreadPool,
    barrier: Barrier,
    term: Termination,
}

impl Runtime {
    /// A runtime with `threads` workers on one socket.
    ///
    /// # Errors
    /// Returns [`TopologyError::ZeroThreads`] for `threads == 0`.
    pub fn new(threads: usize) -> Result<Self, TopologyError> {
        Ok(Self::with_topology(Topology::flat(threads)?))
    }

    /// A runtime over an explicit topology.
    pub fn with_topology(topo: Topology) -> Self {
        Self {
            topo,
            pool: ThreadPool::new(topo),
            barrier: Barrier::new(topo.threads()),
            term: Termination::new(topo.threads()),
        }
    }

    /// This runtime's topology.
    pub fn topology(&self) -> &Topology {
        &self.topo
    }

    /// Runs `op` over every item of `range` (and every item pushed by
    /// committed iterations) on the default worklist.
    pub fn for_each<T, I, F>(&mut self, range: I, op: F, opts: &LoopOptions) -> LoopReport
    where
        T: Send,
        I: IntoIterator<Item = T>,
        F: FnMut(&T, &UserContext<'_, T>) -> Result<(), Conflict> + Clone + Send + Sync,
    {
        self.for_each_in(ChunkedFifoSpec, range, op, opts)
    }

    /// Runs `op` with an explicitly chosen worklist family.
    pub fn for_each_in<S, T, I, F>(
        &mut self,
        spec: S,
        range: I,
        op: F,
        opts: &LoopOptions,
    ) -> LoopReport
    where
        S: WorklistSpec<T>,
        T: Send,
        I: IntoIterator<Item = T>,
        F: FnMut(&T, &UserContext<'_, T>) -> Result<(), Conflict> + Clone + Send + Sync,
    {
        let span = tracing::debug_span!("for_each", name = opts.name);
        let _enter = span.enter();

        // No workers are running yet, so clearing a previous loop's
        // quiescence cannot race anyone.
        self.term.reset();

        let items: Vec<T> = range.into_iter().collect();
        let executor = ForEachExecutor {
            topo: self.topo,
            term: &self.term,
            barrier: &self.barrier,
            wl: spec.build(&self.topo),
            aborted: AbortHandler::new(&self.topo, opts.abort_policy),
            op,
            opts: *opts,
            broke: CachePadded::new(AtomicBool::new(false)),
            seeds: partition(items, self.topo.threads()),
        };

        let per_worker = self.pool.run(|w| executor.worker(w));
        let mut total = LoopStat::default();
        for stat in &per_worker {
            total.merge(stat);
        }
        let report = LoopReport {
            name: opts.name,
            threads: self.topo.threads(),
            iterations: total.iterations,
            conflicts: total.conflicts,
            pushes: total.pushes,
        };
        tracing::info!(
            target: "amorph::stats",
            name = report.name,
            threads = report.threads,
            iterations = report.iterations,
            commits = report.commits(),
            conflicts = report.conflicts,
            pushes = report.pushes,
            "loop finished"
        );
        report
    }
}

fn partition<T>(items: Vec<T>, workers: usize) -> Box<[PaddedLock<Vec<T>>]> {
    let len = items.len();
    let mut items = items.into_iter();
    (0..workers)
        .map(|i| {
            let take = len * (i + 1) / workers - len * i / workers;
            PaddedLock::new(items.by_ref().take(take).collect())
        })
        .collect()
}

/// Worker-thread state for one loop; lives on the worker's stack. The
/// iteration context is kept outside so it is only ever reached through
/// shared references (the thread-local slot aliases it).
struct Tld<'l, T, F> {
    op: F,
    facing: UserContext<'l, T>,
    stat: LoopStat,
}

/// Something the inner loop can pop work from, with retry counts attached.
trait RetrySource<T> {
    fn pop_with_retries(&self) -> Option<(T, u32)>;
}

struct MainSource<'a, W>(&'a W);

impl<T: Send, W: Worklist<T>> RetrySource<T> for MainSource<'_, W> {
    fn pop_with_retries(&self) -> Option<(T, u32)> {
        self.0.pop().map(|item| (item, 0))
    }
}

struct AbortSource<'a, T: Send>(&'a Fifo<Retry<T>>);

impl<T: Send> RetrySource<T> for AbortSource<'_, T> {
    fn pop_with_retries(&self) -> Option<(T, u32)> {
        self.0.pop().map(|record| (record.item, record.retries))
    }
}

struct ForEachExecutor<'rt, T: Send, W, F> {
    topo: Topology,
    term: &'rt Termination,
    barrier: &'rt Barrier,
    wl: W,
    aborted: AbortHandler<T>,
    op: F,
    opts: LoopOptions,
    broke: CachePadded<AtomicBool>,
    seeds: Box<[PaddedLock<Vec<T>>]>,
}

impl<T, W, F> ForEachExecutor<'_, T, W, F>
where
    T: Send,
    W: Worklist<T>,
    F: FnMut(&T, &UserContext<'_, T>) -> Result<(), Conflict> + Clone + Send + Sync,
{
    fn worker(&self, w: &Worker) -> LoopStat {
        let mut init_timer = PhaseTimer::new(self.opts.more_stats);
        let mut exec_timer = PhaseTimer::new(self.opts.more_stats);

        init_timer.start();
        let seed = core::mem::take(&mut *self.seeds[w.tid].lock());
        self.wl.push_initial(seed);
        self.term.init_thread();
        init_timer.stop();
        self.barrier.wait();

        let could_abort = self.opts.detect_conflicts && self.topo.threads() > 1;
        let sink = WorklistSink {
            wl: &self.wl,
            _items: PhantomData,
        };
        let fast: Option<&dyn BulkSink<T>> =
            (self.opts.pushes && !could_abort).then_some(&sink as &dyn BulkSink<T>);
        let break_flag: Option<&AtomicBool> = self.opts.breakable.then_some(&*self.broke);

        let ctx = IterationContext::new();
        let mut tld = Tld {
            op: self.op.clone(),
            facing: UserContext::new(self.opts.pushes, self.opts.per_iter_alloc, break_flag, fast),
            stat: LoopStat::default(),
        };

        exec_timer.start();
        match (could_abort, w.is_leader) {
            (true, true) => self.go::<true, true>(&ctx, &mut tld),
            (true, false) => self.go::<true, false>(&ctx, &mut tld),
            (false, true) => self.go::<false, true>(&ctx, &mut tld),
            (false, false) => self.go::<false, false>(&ctx, &mut tld),
        }
        exec_timer.stop();

        tracing::debug!(
            target: "amorph::stats",
            name = self.opts.name,
            tid = w.tid,
            iterations = tld.stat.iterations,
            conflicts = tld.stat.conflicts,
            pushes = tld.stat.pushes,
            init_us = init_timer.total_micros(),
            exec_us = exec_timer.total_micros(),
        );
        tld.stat
    }

    fn go<const COULD_ABORT: bool, const IS_LEADER: bool>(
        &self,
        ctx: &IterationContext,
        tld: &mut Tld<'_, T, F>,
    ) {
        if COULD_ABORT {
            context::set_current(ctx);
        }
        loop {
            loop {
                let mut did_work = false;
                if COULD_ABORT || self.opts.breakable {
                    let limit = if self.opts.breakable || IS_LEADER { BATCH } else { 0 };
                    did_work |=
                        self.run_queue::<COULD_ABORT, _>(&MainSource(&self.wl), limit, ctx, tld);
                    if COULD_ABORT {
                        did_work |= self.run_queue::<COULD_ABORT, _>(
                            &AbortSource(self.aborted.local_queue()),
                            0,
                            ctx,
                            tld,
                        );
                    }
                } else {
                    did_work |= self.run_simple(ctx, tld);
                }

                self.term.signal_worked(did_work);
                pause();

                if !self.term.working() {
                    break;
                }
                if self.opts.breakable && self.broke.load(Ordering::Relaxed) {
                    break;
                }
            }

            if self.wl.empty() {
                break;
            }
            if self.opts.breakable && self.broke.load(Ordering::Relaxed) {
                break;
            }
            // Quiescence was declared against stale emptiness; another
            // round is needed. The first barrier quiets every worker's
            // detector traffic, one worker clears the verdict, and the
            // second barrier holds everyone until all slots are re-armed.
            if self.barrier.wait() {
                self.term.reset();
            }
            self.term.init_thread();
            self.barrier.wait();
        }
        if COULD_ABORT {
            context::clear_current();
        }
    }

    fn run_simple(&self, ctx: &IterationContext, tld: &mut Tld<'_, T, F>) -> bool {
        let mut did_work = false;
        while let Some(item) = self.wl.pop() {
            did_work = true;
            self.process::<false>(item, 0, ctx, tld);
        }
        did_work
    }

    /// Runs up to `limit` items from `src` (zero means unbounded).
    fn run_queue<const COULD_ABORT: bool, S: RetrySource<T>>(
        &self,
        src: &S,
        limit: usize,
        ctx: &IterationContext,
        tld: &mut Tld<'_, T, F>,
    ) -> bool {
        let mut num = 0usize;
        while limit == 0 || num < limit {
            let Some((item, retries)) = src.pop_with_retries() else {
                break;
            };
            num += 1;
            self.process::<COULD_ABORT>(item, retries, ctx, tld);
            if self.opts.breakable && self.broke.load(Ordering::Relaxed) {
                break;
            }
        }
        num > 0
    }

    fn process<const COULD_ABORT: bool>(
        &self,
        item: T,
        retries: u32,
        ctx: &IterationContext,
        tld: &mut Tld<'_, T, F>,
    ) {
        if COULD_ABORT {
            ctx.start_iteration();
        }
        tld.stat.iterations += 1;
        tld.facing.set_first_pass(retries == 0);
        match (tld.op)(&item, &tld.facing) {
            Ok(()) => self.commit_iteration::<COULD_ABORT>(item, ctx, tld),
            Err(Conflict) => {
                assert!(
                    COULD_ABORT,
                    "operator reported a conflict, but the loop cannot abort \
                     (conflict detection off or a single worker)"
                );
                self.abort_iteration(item, retries, ctx, tld);
            }
        }
    }

    fn commit_iteration<const COULD_ABORT: bool>(
        &self,
        item: T,
        ctx: &IterationContext,
        tld: &mut Tld<'_, T, F>,
    ) {
        if self.opts.pushes {
            tld.stat.pushes += tld.facing.drain_pushes(&self.wl);
        }
        if self.opts.per_iter_alloc {
            tld.facing.reset_alloc();
        }
        if COULD_ABORT {
            ctx.commit_iteration();
        }
        drop(item);
    }

    #[cold]
    fn abort_iteration(&self, item: T, retries: u32, ctx: &IterationContext, tld: &mut Tld<'_, T, F>) {
        ctx.cancel_iteration();
        tld.stat.conflicts += 1;
        if retries == 0 {
            self.aborted.push_new(item);
        } else {
            self.aborted.push_retry(item, retries);
        }
        if self.opts.pushes {
            tld.facing.clear_pushes();
        }
        if self.opts.per_iter_alloc {
            tld.facing.reset_alloc();
        }
    }
}
