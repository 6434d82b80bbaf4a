//! Low-level runtime substrate: padding, locks, per-worker storage,
//! topology, the worker pool, barriers and termination detection.
//!
//! Everything above this module (worklists, the executor) treats these as
//! given; nothing here knows about work items or operators.

mod barrier;
mod cache_padded;
mod padded_lock;
mod per_thread;
mod pool;
mod termination;
mod topology;

pub use barrier::Barrier;
pub use cache_padded::CachePadded;
pub use padded_lock::{PaddedLock, PaddedLockGuard};
pub use per_thread::PerThread;
pub use pool::{current_tid, ThreadPool, Worker};
pub use termination::Termination;
pub use topology::{Topology, TopologyError};

/// Hint the CPU that we are spinning, e.g. while a termination token
/// propagates.
#[inline]
pub fn pause() {
    core::hint::spin_loop();
}
