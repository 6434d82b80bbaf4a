//! Speculative conflict detection.
//!
//! Shared structures embed a [`Lockable`] owner word per protected resource
//! (a graph node, a bucket). During an iteration, every acquisition is
//! logged in the worker's [`IterationContext`]; committing releases the log,
//! cancelling releases it in reverse order. Losing an acquisition race
//! surfaces as a [`Conflict`] error that the operator propagates with `?`;
//! the executor turns it into a rollback and a retry, so conflicts never
//! escape the loop.
//!
//! The executor installs the running context in thread-local storage, so
//! shared-structure code calls the free function [`acquire`] without any
//! plumbing. When no context is installed (conflict detection disabled, or
//! a single worker), acquisition trivially succeeds.

use core::cell::{Cell, RefCell};
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

/// An iteration lost an acquisition race on a shared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("speculative conflict on a shared resource")]
pub struct Conflict;

/// Owner word embedded in a conflict-lockable resource.
///
/// Zero means unowned; otherwise it holds the address of the owning
/// iteration context. The resource must outlive the loop that acquires it;
/// acquiring a temporary is a usage error.
#[derive(Debug, Default)]
pub struct Lockable {
    owner: AtomicUsize,
}

impl Lockable {
    /// Creates an unowned lockable.
    pub const fn new() -> Self {
        Self {
            owner: AtomicUsize::new(0),
        }
    }

    /// Whether some iteration currently owns this resource.
    pub fn is_held(&self) -> bool {
        self.owner.load(Ordering::Acquire) != 0
    }
}

/// Per-worker acquisition log for one speculative iteration.
pub struct IterationContext {
    log: RefCell<Vec<*const Lockable>>,
}

impl IterationContext {
    /// Creates a context with an empty log.
    pub fn new() -> Self {
        Self {
            log: RefCell::new(Vec::new()),
        }
    }

    fn id(&self) -> usize {
        ptr::from_ref(self) as usize
    }

    /// Opens an iteration.
    pub fn start_iteration(&self) {
        debug_assert!(
            self.log.borrow().is_empty(),
            "previous iteration was neither committed nor cancelled"
        );
    }

    /// Acquires `lockable` for the current iteration.
    ///
    /// Idempotent for the holder; a fresh acquisition is logged for release
    /// at commit or cancel.
    ///
    /// # Errors
    /// [`Conflict`] if another iteration owns the resource.
    pub fn try_acquire(&self, lockable: &Lockable) -> Result<(), Conflict> {
        let me = self.id();
        match lockable
            .owner
            .compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.log.borrow_mut().push(ptr::from_ref(lockable));
                Ok(())
            }
            Err(current) if current == me => Ok(()),
            Err(_) => Err(Conflict),
        }
    }

    /// Closes the iteration successfully, releasing every logged
    /// acquisition.
    pub fn commit_iteration(&self) {
        let mut log = self.log.borrow_mut();
        for &lockable in log.iter() {
            // Safety: logged resources outlive the loop (usage contract on
            // `Lockable`).
            unsafe { (*lockable).owner.store(0, Ordering::Release) };
        }
        log.clear();
    }

    /// Rolls the iteration back, releasing logged acquisitions in reverse
    /// order.
    pub fn cancel_iteration(&self) {
        let mut log = self.log.borrow_mut();
        for &lockable in log.iter().rev() {
            // Safety: as in `commit_iteration`.
            unsafe { (*lockable).owner.store(0, Ordering::Release) };
        }
        log.clear();
    }

    /// Number of live acquisitions; used by rollback assertions.
    pub fn held(&self) -> usize {
        self.log.borrow().len()
    }
}

impl Default for IterationContext {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static CURRENT: Cell<*const IterationContext> = const { Cell::new(ptr::null()) };
}

/// Installs `ctx` as the calling worker's running context.
pub(crate) fn set_current(ctx: &IterationContext) {
    CURRENT.with(|c| c.set(ptr::from_ref(ctx)));
}

/// Clears the calling worker's running context.
pub(crate) fn clear_current() {
    CURRENT.with(|c| c.set(ptr::null()));
}

/// Acquires `lockable` for the calling worker's running iteration.
///
/// Succeeds trivially when no context is installed (conflict detection
/// disabled, or outside a loop).
///
/// # Errors
/// [`Conflict`] if another iteration owns the resource.
pub fn acquire(lockable: &Lockable) -> Result<(), Conflict> {
    let ctx = CURRENT.with(Cell::get);
    if ctx.is_null() {
        return Ok(());
    }
    // Safety: the executor clears the slot before its context goes away.
    unsafe { (*ctx).try_acquire(lockable) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_context_conflicts_until_release() {
        let node = Lockable::new();
        let a = IterationContext::new();
        let b = IterationContext::new();

        a.start_iteration();
        a.try_acquire(&node).unwrap();
        b.start_iteration();
        assert_eq!(b.try_acquire(&node), Err(Conflict));

        a.commit_iteration();
        assert_eq!(a.held(), 0);
        b.try_acquire(&node).unwrap();
        b.cancel_iteration();
        assert!(!node.is_held());
    }

    #[test]
    fn reacquire_is_idempotent() {
        let node = Lockable::new();
        let ctx = IterationContext::new();
        ctx.start_iteration();
        ctx.try_acquire(&node).unwrap();
        ctx.try_acquire(&node).unwrap();
        assert_eq!(ctx.held(), 1);
        ctx.cancel_iteration();
        assert!(!node.is_held());
    }

    #[test]
    fn acquire_without_context_succeeds() {
        let node = Lockable::new();
        assert!(acquire(&node).is_ok());
        assert!(!node.is_held());
    }
}
