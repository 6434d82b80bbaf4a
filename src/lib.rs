//! # `amorph` - Speculative Parallel Runtime
//!
//! A runtime for irregular, graph-structured computations: a `for_each`
//! executor drives a user operator over a dynamic collection of work items,
//! tolerating speculative conflicts between iterations that touch the same
//! shared data.
//!
//! ## Execution Model
//!
//! - **Workers**: one OS thread per worker, pinned to the runtime's
//!   [`Topology`](substrate::Topology). Work items run to commit or to
//!   abort; they never suspend.
//! - **Worklists**: pluggable bags of work ([`worklists`]) differing in
//!   ordering and locality; the executor is written against one trait, so
//!   variants compose.
//! - **Speculation**: every acquisition of a conflict-lockable resource is
//!   logged per iteration; losing a race surfaces as a typed [`Conflict`]
//!   error that rolls the iteration back and routes the item through the
//!   abort handler's placement policy.
//! - **Quiescence**: a ring-token termination detector certifies that no
//!   worker holds work and no push is in flight before the loop exits.
//!
//! ## Guarantees
//!
//! - Every seeded or pushed item is committed exactly once.
//! - An aborted iteration publishes nothing: pushes are discarded, the
//!   per-iteration arena is reset, and logged acquisitions are released in
//!   reverse order.
//! - Pushes from a committed iteration become visible before termination is
//!   declared.
//!
//! ## Example
//!
//! ```rust
//! use amorph::{LoopOptions, Runtime};
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! let mut rt = Runtime::new(4).expect("nonzero thread count");
//! let sum = AtomicU64::new(0);
//! rt.for_each(
//!     1u64..=100,
//!     |&v, _ctx| {
//!         sum.fetch_add(v, Ordering::Relaxed);
//!         Ok(())
//!     },
//!     &LoopOptions::named("sum").no_pushes().no_conflict_detection(),
//! );
//! assert_eq!(sum.load(Ordering::Relaxed), 5050);
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]

pub mod mem;
pub mod runtime;
pub mod substrate;
pub mod worklists;

pub use runtime::{
    acquire, AbortPolicy, Conflict, Lockable, LoopOptions, LoopReport, Runtime, UserContext,
};
pub use substrate::{Topology, TopologyError};
pub use worklists::Worklist;

// Compile-time layout checks for the hot-path types.
const _: () = {
    use core::mem;
    use core::sync::atomic::AtomicUsize;

    use crate::substrate::{CachePadded, PaddedLock};

    // Padding must actually separate cache lines.
    assert!(mem::align_of::<CachePadded<AtomicUsize>>() == 128);
    assert!(mem::size_of::<CachePadded<u8>>() == 128);

    // The lock word and the data it guards stay on separate lines.
    assert!(mem::size_of::<PaddedLock<usize>>() >= 2 * mem::size_of::<CachePadded<u8>>());

    // Retry records stay word-packed for queue traffic.
    assert!(mem::size_of::<runtime::Retry<u64>>() <= 2 * mem::size_of::<u64>());
};
