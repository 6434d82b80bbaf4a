//! Reusable worker rendezvous.

use std::sync::Barrier as StdBarrier;

/// A barrier sized to the worker pool.
///
/// Thin wrapper over `std::sync::Barrier`; exists so the executor depends on
/// a runtime-local type and so the leader result has a domain name. The
/// barrier is reusable: workers cross it between termination rounds.
pub struct Barrier {
    inner: StdBarrier,
}

impl Barrier {
    /// Creates a barrier for `threads` workers.
    pub fn new(threads: usize) -> Self {
        Self {
            inner: StdBarrier::new(threads),
        }
    }

    /// Blocks until all workers have arrived. Returns `true` on exactly one
    /// worker per crossing.
    pub fn wait(&self) -> bool {
        self.inner.wait().is_leader()
    }
}
