//! Scoped worker pool.
//!
//! `ThreadPool::run` spawns one OS thread per worker inside a
//! `std::thread::scope`, registers each thread's worker id in thread-local
//! storage, optionally pins it to a CPU, and joins all workers before
//! returning their results. Worker bodies may borrow from the caller's stack;
//! panics from any worker are re-raised on the calling thread.

use core::cell::Cell;
use std::thread;

use super::topology::Topology;

thread_local! {
    // Threads outside any pool (the main thread, test threads) read as
    // worker 0, which lets single-threaded code exercise per-worker
    // structures without a pool.
    static WORKER_ID: Cell<usize> = const { Cell::new(0) };
}

/// The id of the worker running the current thread; `0` outside a pool.
#[inline]
pub fn current_tid() -> usize {
    WORKER_ID.with(Cell::get)
}

struct TidGuard {
    prev: usize,
}

impl TidGuard {
    fn register(tid: usize) -> Self {
        let prev = WORKER_ID.with(|c| c.replace(tid));
        Self { prev }
    }
}

impl Drop for TidGuard {
    fn drop(&mut self) {
        WORKER_ID.with(|c| c.set(self.prev));
    }
}

/// Identity of one worker within a running pool.
#[derive(Debug, Clone, Copy)]
pub struct Worker {
    /// Worker id, `0..threads`.
    pub tid: usize,
    /// Socket housing this worker.
    pub socket: usize,
    /// Whether this worker leads its socket.
    pub is_leader: bool,
}

/// A pool of workers sized by a [`Topology`].
///
/// The pool itself is cheap; threads are spawned per [`run`](ThreadPool::run)
/// and torn down when it returns. The pool and any barrier sized to it must
/// outlive executors that borrow them.
#[derive(Debug, Clone, Copy)]
pub struct ThreadPool {
    topo: Topology,
}

impl ThreadPool {
    /// Creates a pool over `topo`.
    pub fn new(topo: Topology) -> Self {
        Self { topo }
    }

    /// The pool's topology.
    pub fn topology(&self) -> &Topology {
        &self.topo
    }

    /// Runs `body` once per worker and returns the per-worker results,
    /// indexed by worker id.
    ///
    /// # Panics
    /// Re-raises the first worker panic on the calling thread.
    pub fn run<R, F>(&self, body: F) -> Vec<R>
    where
        R: Send,
        F: Fn(&Worker) -> R + Sync,
    {
        let topo = self.topo;
        thread::scope(|scope| {
            let body = &body;
            let handles: Vec<_> = (0..topo.threads())
                .map(|tid| {
                    scope.spawn(move || {
                        let _guard = TidGuard::register(tid);
                        if topo.pin() {
                            pin_to_cpu(tid);
                        }
                        let worker = Worker {
                            tid,
                            socket: topo.socket_of(tid),
                            is_leader: topo.is_leader(tid),
                        };
                        body(&worker)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }
}

#[cfg(target_os = "linux")]
fn pin_to_cpu(tid: usize) {
    // Best effort; a failed pin costs locality, not correctness.
    unsafe {
        let mut set: libc::cpu_set_t = core::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(tid % libc::CPU_SETSIZE as usize, &mut set);
        if libc::sched_setaffinity(0, core::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            tracing::debug!(tid, "sched_setaffinity failed; leaving thread unpinned");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_cpu(_tid: usize) {}
