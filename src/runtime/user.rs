//! The handle an operator sees during one iteration.

use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::mem::IterArena;
use crate::worklists::Worklist;

/// How many buffered pushes trigger the fast-push drain.
const FAST_FLUSH: usize = 64;

/// Drains a push buffer straight into a worklist; installed only when
/// iterations cannot abort, so there is nothing to roll back.
pub(crate) trait BulkSink<T>: Sync {
    fn absorb(&self, buf: &mut Vec<T>);
}

pub(crate) struct WorklistSink<'w, T: Send, W: Worklist<T>> {
    pub wl: &'w W,
    pub _items: core::marker::PhantomData<fn(T) -> T>,
}

impl<T: Send, W: Worklist<T>> BulkSink<T> for WorklistSink<'_, T, W> {
    fn absorb(&self, buf: &mut Vec<T>) {
        self.wl.push_batch(buf.drain(..));
    }
}

/// Per-iteration view handed to the user operator.
///
/// Pushes are buffered and published only if the iteration commits; the
/// arena is scratch memory reclaimed wholesale after every commit or abort;
/// the break flag asks all workers to wind down after their current
/// iteration.
pub struct UserContext<'l, T> {
    pushes: RefCell<Vec<T>>,
    pushes_enabled: bool,
    arena: Option<IterArena>,
    break_flag: Option<&'l AtomicBool>,
    fast: Option<&'l dyn BulkSink<T>>,
    first_pass: Cell<bool>,
    pushed_total: Cell<u64>,
}

impl<'l, T> UserContext<'l, T> {
    pub(crate) fn new(
        pushes_enabled: bool,
        per_iter_alloc: bool,
        break_flag: Option<&'l AtomicBool>,
        fast: Option<&'l dyn BulkSink<T>>,
    ) -> Self {
        Self {
            pushes: RefCell::new(Vec::new()),
            pushes_enabled,
            arena: per_iter_alloc.then(IterArena::new),
            break_flag,
            fast,
            first_pass: Cell::new(true),
            pushed_total: Cell::new(0),
        }
    }

    /// Enqueues `item` to be published when this iteration commits.
    ///
    /// # Panics
    /// Panics if the loop was configured with pushes disabled.
    pub fn push(&self, item: T) {
        assert!(
            self.pushes_enabled,
            "loop was configured with pushes disabled"
        );
        let mut buf = self.pushes.borrow_mut();
        buf.push(item);
        if let Some(sink) = self.fast {
            if buf.len() >= FAST_FLUSH {
                self.pushed_total.set(self.pushed_total.get() + buf.len() as u64);
                sink.absorb(&mut buf);
            }
        }
    }

    /// The per-iteration arena.
    ///
    /// # Panics
    /// Panics if the loop was not configured with per-iteration allocation.
    pub fn alloc(&self) -> &IterArena {
        self.arena
            .as_ref()
            .expect("loop was not configured with per-iteration allocation")
    }

    /// Requests loop termination after the current iteration; the iteration
    /// itself still commits.
    ///
    /// # Panics
    /// Panics if the loop was not configured as breakable.
    pub fn breakout(&self) {
        self.break_flag
            .expect("loop was not configured as breakable")
            .store(true, Ordering::Relaxed);
    }

    /// Whether this invocation is the item's first attempt (no prior abort).
    pub fn is_first_pass(&self) -> bool {
        self.first_pass.get()
    }

    pub(crate) fn set_first_pass(&self, first: bool) {
        self.first_pass.set(first);
    }

    /// Publishes buffered pushes into `wl`; returns how many items this
    /// iteration pushed (including fast-flushed ones).
    pub(crate) fn drain_pushes<W: Worklist<T>>(&self, wl: &W) -> u64
    where
        T: Send,
    {
        let mut buf = self.pushes.borrow_mut();
        let mut n = self.pushed_total.replace(0);
        if !buf.is_empty() {
            n += buf.len() as u64;
            wl.push_batch(buf.drain(..));
        }
        n
    }

    /// Discards buffered pushes after an abort.
    pub(crate) fn clear_pushes(&self) {
        self.pushes.borrow_mut().clear();
        self.pushed_total.set(0);
    }

    /// Reclaims the arena between iterations.
    pub(crate) fn reset_alloc(&mut self) {
        if let Some(arena) = self.arena.as_mut() {
            arena.reset();
        }
    }
}
