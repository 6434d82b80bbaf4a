//! Distributed termination detection.
//!
//! Ring token passing in the style of Dijkstra's algorithm: worker 0 launches
//! a white token; a worker that performed work since it last held the token
//! blackens the token as it forwards it. When worker 0 sees the token come
//! back white on two consecutive circuits, no work existed anywhere during a
//! full circuit and no push could have crossed the boundary, so the system is
//! quiescent.
//!
//! The detector is level-triggered: a worker that crosses a barrier to start
//! another round must call [`Termination::init_thread`] again first.

use core::sync::atomic::{AtomicBool, Ordering};

use super::cache_padded::CachePadded;
use super::pool::current_tid;

struct TokenSlot {
    has_token: AtomicBool,
    token_black: AtomicBool,
    // Set when this worker did work since it last forwarded the token.
    dirty: AtomicBool,
    // Leader only: whether the previous circuit came back white.
    last_white: AtomicBool,
}

impl TokenSlot {
    fn new() -> Self {
        Self {
            has_token: AtomicBool::new(false),
            token_black: AtomicBool::new(false),
            dirty: AtomicBool::new(true),
            last_white: AtomicBool::new(false),
        }
    }
}

/// Quiescence detector over `threads` workers.
pub struct Termination {
    slots: Box<[CachePadded<TokenSlot>]>,
    done: CachePadded<AtomicBool>,
}

impl Termination {
    /// Creates a detector for `threads` workers.
    pub fn new(threads: usize) -> Self {
        assert!(threads > 0, "termination detection needs at least one worker");
        Self {
            slots: (0..threads).map(|_| CachePadded::new(TokenSlot::new())).collect(),
            done: CachePadded::new(AtomicBool::new(false)),
        }
    }

    /// Clears a previously certified quiescence so a new work phase can
    /// start.
    ///
    /// Must not race [`signal_worked`](Self::signal_worked) or
    /// [`working`](Self::working): call it with no workers between their
    /// init and their work loop — from the setup thread before workers
    /// start, or from exactly one worker between two barrier crossings.
    pub fn reset(&self) {
        self.done.store(false, Ordering::Relaxed);
    }

    /// Re-arms the calling worker's detector state.
    ///
    /// Must be called on entry to a work phase and again after every barrier
    /// crossing. Starting dirty forces at least one full black circuit, so a
    /// stale white token can never certify a fresh round.
    pub fn init_thread(&self) {
        let tid = current_tid();
        let slot = &self.slots[tid];
        slot.dirty.store(true, Ordering::Relaxed);
        slot.token_black.store(false, Ordering::Relaxed);
        slot.last_white.store(false, Ordering::Relaxed);
        slot.has_token.store(tid == 0, Ordering::Relaxed);
    }

    /// Records whether the calling worker found any work this round and
    /// forwards the token if this worker holds it.
    pub fn signal_worked(&self, worked: bool) {
        let tid = current_tid();
        let slot = &self.slots[tid];
        if worked {
            slot.dirty.store(true, Ordering::Relaxed);
        }
        if self.done.load(Ordering::Acquire) {
            return;
        }
        if !slot.has_token.load(Ordering::Acquire) {
            return;
        }

        let mut black = slot.token_black.load(Ordering::Relaxed) || slot.dirty.load(Ordering::Relaxed);

        if tid == 0 {
            if slot.last_white.load(Ordering::Relaxed) && !black {
                self.done.store(true, Ordering::Release);
                return;
            }
            slot.last_white.store(!black, Ordering::Relaxed);
            // The leader launders the token: each circuit starts white.
            black = false;
        }

        slot.dirty.store(false, Ordering::Relaxed);
        slot.token_black.store(false, Ordering::Relaxed);
        // Drop our copy before publishing to the successor, otherwise a fast
        // full circuit could hand the token back while we still appear to
        // hold it.
        slot.has_token.store(false, Ordering::Relaxed);

        let next = (tid + 1) % self.slots.len();
        let succ = &self.slots[next];
        succ.token_black.store(black, Ordering::Relaxed);
        succ.has_token.store(true, Ordering::Release);
    }

    /// Whether any worker may still have work. Once this returns `false`
    /// after a round of `signal_worked(false)` from everyone, it stays false
    /// until the next [`init_thread`](Self::init_thread).
    #[inline]
    pub fn working(&self) -> bool {
        !self.done.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_worker_quiesces_after_two_idle_rounds() {
        let term = Termination::new(1);
        term.reset();
        term.init_thread();
        term.signal_worked(true);
        assert!(term.working());
        term.signal_worked(false);
        assert!(term.working(), "one white circuit is not enough");
        term.signal_worked(false);
        assert!(!term.working());
    }

    #[test]
    fn work_resets_the_white_streak() {
        let term = Termination::new(1);
        term.reset();
        term.init_thread();
        term.signal_worked(false);
        term.signal_worked(true);
        term.signal_worked(false);
        assert!(term.working());
        term.signal_worked(false);
        assert!(!term.working());
    }

    #[test]
    fn reinit_rearms_detection() {
        let term = Termination::new(1);
        term.reset();
        term.init_thread();
        // The re-armed dirty bit blackens the first circuit.
        term.signal_worked(false);
        term.signal_worked(false);
        term.signal_worked(false);
        assert!(!term.working());
        term.reset();
        term.init_thread();
        assert!(term.working());
    }
}
