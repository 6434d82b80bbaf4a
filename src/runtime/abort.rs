//! Retry placement for conflicted iterations.
//!
//! Each worker owns a FIFO of retry records. The placement policy decides
//! where a record goes as its retry count grows: keep a light burst of
//! conflicts local, and funnel persistently conflicting items toward a
//! single serialization point (the leader of the socket tree) where they
//! stop racing anything.

use crate::substrate::{current_tid, PerThread, Topology};
use crate::worklists::{Fifo, Worklist};

/// A conflicted item and how many times it has been tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry<T> {
    /// The work item.
    pub item: T,
    /// Attempts so far; at least 1 once the item has aborted.
    pub retries: u32,
}

/// Where a retry record should be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// The current worker's own queue.
    Local,
    /// Another worker's queue.
    Remote(usize),
}

/// Retry placement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortPolicy {
    /// Serialize immediately through the socket tree.
    Basic,
    /// Odd retries stay local; even retries climb half-way to the socket
    /// leader, then up the socket tree.
    Double,
    /// Two local retries, then the intra-socket tree while retries are
    /// below five, then the socket tree.
    Bounded,
    /// Always retain locally; no escalation.
    Eager,
}

/// Per-worker retry queues plus the placement policy.
pub struct AbortHandler<T: Send> {
    queues: PerThread<Fifo<Retry<T>>>,
    policy: AbortPolicy,
    topo: Topology,
}

impl<T: Send> AbortHandler<T> {
    /// Creates a handler for `topo`. Without an override, small machines
    /// serialize through the socket tree directly and larger ones use the
    /// distance-halving escalation.
    pub fn new(topo: &Topology, policy: Option<AbortPolicy>) -> Self {
        let policy = policy.unwrap_or(if topo.sockets() <= 2 {
            AbortPolicy::Basic
        } else {
            AbortPolicy::Double
        });
        Self {
            queues: PerThread::new_with(topo.threads(), |_| Fifo::new()),
            policy,
            topo: *topo,
        }
    }

    /// The policy in force.
    pub fn policy(&self) -> AbortPolicy {
        self.policy
    }

    /// Enqueues a first-time abort on the current worker.
    pub fn push_new(&self, item: T) {
        self.queues.local().push(Retry { item, retries: 1 });
    }

    /// Re-enqueues an item that aborted again; `prev_retries` is the count
    /// it carried into this attempt.
    pub fn push_retry(&self, item: T, prev_retries: u32) {
        let record = Retry {
            item,
            retries: prev_retries + 1,
        };
        match self.placement(current_tid(), record.retries) {
            Placement::Local => self.queues.local().push(record),
            Placement::Remote(tid) => self.queues.remote(tid).push(record),
        }
    }

    /// The current worker's retry queue, drained by the executor.
    pub fn local_queue(&self) -> &Fifo<Retry<T>> {
        self.queues.local()
    }

    /// Decides where a record with `retries` goes when worker `tid` aborts
    /// it. Pure, so placement is deterministic given topology and count.
    pub(crate) fn placement(&self, tid: usize, retries: u32) -> Placement {
        match self.policy {
            AbortPolicy::Basic => self.socket_tree(tid),
            AbortPolicy::Double => {
                // The record enters with an incremented count; look at the
                // attempts completed before this one.
                let completed = retries - 1;
                if completed & 1 == 1 {
                    return Placement::Local;
                }
                let leader = self.topo.leader_of(tid);
                if tid != leader {
                    Placement::Remote(leader + (tid - leader) / 2)
                } else {
                    self.socket_tree(tid)
                }
            }
            AbortPolicy::Bounded => {
                let completed = retries - 1;
                if completed < 2 {
                    return Placement::Local;
                }
                let leader = self.topo.leader_of(tid);
                if completed < 5 && tid != leader {
                    Placement::Remote(leader + (tid - leader) / 2)
                } else {
                    self.socket_tree(tid)
                }
            }
            AbortPolicy::Eager => Placement::Local,
        }
    }

    /// One step up the inter-socket tree: the leader of socket `s / 2`.
    fn socket_tree(&self, tid: usize) -> Placement {
        let socket = self.topo.socket_of(tid);
        let target = self.topo.leader_of_socket(socket / 2);
        if target == tid {
            Placement::Local
        } else {
            Placement::Remote(target)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(threads: usize, sockets: usize, policy: AbortPolicy) -> AbortHandler<u32> {
        let topo = Topology::with_sockets(threads, sockets).unwrap();
        AbortHandler::new(&topo, Some(policy))
    }

    #[test]
    fn default_policy_follows_socket_count() {
        let small = Topology::with_sockets(8, 2).unwrap();
        assert_eq!(
            AbortHandler::<u32>::new(&small, None).policy(),
            AbortPolicy::Basic
        );
        let big = Topology::with_sockets(16, 4).unwrap();
        assert_eq!(
            AbortHandler::<u32>::new(&big, None).policy(),
            AbortPolicy::Double
        );
    }

    #[test]
    fn basic_funnels_through_the_socket_tree() {
        let h = handler(16, 4, AbortPolicy::Basic);
        // Socket 3 (workers 12..16) funnels to the leader of socket 1.
        assert_eq!(h.placement(13, 2), Placement::Remote(4));
        // Socket 1 funnels to worker 0.
        assert_eq!(h.placement(5, 2), Placement::Remote(0));
        // The root keeps its own work.
        assert_eq!(h.placement(0, 9), Placement::Local);
    }

    #[test]
    fn double_alternates_local_and_climbing() {
        let h = handler(16, 4, AbortPolicy::Double);
        // Odd completed counts stay local.
        assert_eq!(h.placement(7, 2), Placement::Local);
        assert_eq!(h.placement(7, 4), Placement::Local);
        // Even completed counts halve the distance to the socket leader:
        // worker 7's leader is 4, midpoint is 4 + (7-4)/2 = 5.
        assert_eq!(h.placement(7, 3), Placement::Remote(5));
        // At the leader, climb the socket tree: socket 1 -> worker 0.
        assert_eq!(h.placement(4, 3), Placement::Remote(0));
    }

    #[test]
    fn bounded_escalates_in_three_stages() {
        let h = handler(16, 4, AbortPolicy::Bounded);
        assert_eq!(h.placement(7, 1), Placement::Local);
        assert_eq!(h.placement(7, 2), Placement::Local);
        assert_eq!(h.placement(7, 3), Placement::Remote(5));
        assert_eq!(h.placement(7, 4), Placement::Remote(5));
        // From retry five on, straight up the socket tree.
        assert_eq!(h.placement(7, 6), Placement::Remote(0));
    }

    #[test]
    fn eager_never_escalates() {
        let h = handler(16, 4, AbortPolicy::Eager);
        assert_eq!(h.placement(13, 50), Placement::Local);
    }

    #[test]
    fn queues_carry_incremented_counts() {
        let h = handler(1, 1, AbortPolicy::Eager);
        h.push_new(7);
        h.push_retry(7, 1);
        let q = h.local_queue();
        assert_eq!(q.pop(), Some(Retry { item: 7, retries: 1 }));
        assert_eq!(q.pop(), Some(Retry { item: 7, retries: 2 }));
        assert!(q.empty());
    }
}
