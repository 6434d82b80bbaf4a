use amorph::substrate::{PerThread, ThreadPool, Topology};
use amorph::worklists::{
    ChunkedFifo, Fifo, Lifo, LifoSpec, LocalFilter, LocalQueues, OrderedByMetric, OrderedQueue,
    StealingLocal, Worklist, WorklistSpec,
};

use proptest::prelude::*;

fn solo() -> Topology {
    Topology::flat(1).unwrap()
}

#[test]
fn lifo_pops_in_reverse_order() {
    let wl: Lifo<u32> = Lifo::new();
    wl.push_batch([1, 2, 3]);
    assert_eq!(wl.pop(), Some(3));
    assert_eq!(wl.pop(), Some(2));
    assert_eq!(wl.pop(), Some(1));
    assert_eq!(wl.pop(), None);
    assert!(wl.empty());
}

#[test]
fn fifo_pops_in_arrival_order() {
    let wl: Fifo<u32> = Fifo::new();
    wl.push_batch([1, 2, 3]);
    assert_eq!(wl.pop(), Some(1));
    assert_eq!(wl.pop(), Some(2));
    assert_eq!(wl.pop(), Some(3));
    assert_eq!(wl.pop(), None);
}

#[test]
fn ordered_queue_pops_largest_first() {
    let wl: OrderedQueue<u32> = OrderedQueue::new();
    wl.push_batch([5, 1, 9, 3]);
    assert_eq!(wl.pop(), Some(9));
    assert_eq!(wl.pop(), Some(5));
    assert_eq!(wl.pop(), Some(3));
    assert_eq!(wl.pop(), Some(1));
}

#[test]
fn obim_single_worker_drains_in_metric_order() {
    let topo = solo();
    let wl = OrderedByMetric::new(&topo, |v: &usize| *v, 16);
    for v in [5usize, 3, 8, 1, 4] {
        wl.push(v);
    }
    let mut popped = Vec::new();
    while let Some(v) = wl.pop() {
        popped.push(v);
    }
    assert_eq!(popped, vec![1, 3, 4, 5, 8]);
    assert!(wl.empty());
}

#[test]
fn obim_clamps_indices_to_the_last_bucket() {
    let topo = solo();
    let wl = OrderedByMetric::new(&topo, |v: &usize| *v, 4);
    wl.push(1_000_000);
    wl.push(2);
    assert_eq!(wl.pop(), Some(2));
    assert_eq!(wl.pop(), Some(1_000_000));
    assert_eq!(wl.pop(), None);
}

proptest! {
    // Single-worker multiset round-trip: everything pushed comes back out,
    // nothing else does.
    #[test]
    fn obim_round_trips_any_multiset(values in proptest::collection::vec(0usize..64, 0..200)) {
        let topo = solo();
        let wl = OrderedByMetric::new(&topo, |v: &usize| *v, 64);
        for &v in &values {
            wl.push(v);
        }
        let mut drained = Vec::new();
        while let Some(v) = wl.pop() {
            drained.push(v);
        }
        let mut expected = values.clone();
        expected.sort_unstable();
        // A single worker additionally sees weakly increasing metrics.
        prop_assert!(drained.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(drained, expected);
    }

    #[test]
    fn chunked_fifo_round_trips_any_multiset(values in proptest::collection::vec(any::<u16>(), 0..500)) {
        let topo = solo();
        let wl: ChunkedFifo<u16> = ChunkedFifo::new(&topo);
        for &v in &values {
            wl.push(v);
        }
        let mut drained = Vec::new();
        while let Some(v) = wl.pop() {
            drained.push(v);
        }
        let mut expected = values.clone();
        expected.sort_unstable();
        drained.sort_unstable();
        prop_assert_eq!(drained, expected);
    }
}

#[test]
fn local_queues_route_aborts_to_the_global_list() {
    let topo = solo();
    let local = PerThread::new_with(topo.threads(), |_| Lifo::<u32>::new());
    let global = Fifo::<u32>::new();
    let wl = LocalQueues::new(local, global);

    wl.push(1);
    wl.aborted(2);
    // Local work first, then the global overflow.
    assert_eq!(wl.pop(), Some(1));
    assert_eq!(wl.pop(), Some(2));
    assert_eq!(wl.pop(), None);
    assert!(wl.empty());
}

#[test]
fn stealing_local_falls_back_to_the_neighbor() {
    let topo = Topology::flat(2).unwrap();
    let data = PerThread::new_with(topo.threads(), |_| Fifo::<u32>::new());
    data.remote(1).push_batch([10, 11]);
    let wl = StealingLocal::new(data, topo);

    let pool = ThreadPool::new(topo);
    let got = pool.run(|w| {
        if w.tid == 0 {
            // Worker 0's own queue is dry; it steals from worker 1.
            wl.pop()
        } else {
            None
        }
    });
    assert_eq!(got[0], Some(10));
}

#[test]
fn local_filter_keeps_low_indices_local() {
    let topo = solo();
    let wl: LocalFilter<usize, _, Fifo<usize>, Fifo<usize>> =
        LocalFilter::new(&topo, Fifo::new(), |v: &usize| *v, Fifo::new);

    // Threshold starts at zero, so everything above it goes global.
    wl.push(7);
    wl.push(0);
    // Local first.
    assert_eq!(wl.pop(), Some(0));
    // Global pop raises the threshold to the popped index.
    assert_eq!(wl.pop(), Some(7));
    wl.push(5);
    assert_eq!(wl.pop(), Some(5), "5 <= 7 now stays local");
    assert!(wl.empty());
}

#[test]
fn specs_build_usable_worklists() {
    let topo = solo();
    let wl = <LifoSpec as WorklistSpec<u32>>::build(&LifoSpec, &topo);
    wl.push_initial([1, 2, 3]);
    assert_eq!(wl.pop(), Some(3));
}
