use amorph::substrate::{ThreadPool, Topology};
use amorph::worklists::{ChunkedFifo, Worklist};

use rand::seq::SliceRandom;
use rand::SeedableRng;

#[test]
fn push_heavy_then_pop_heavy_recovers_everything() {
    let topo = Topology::flat(1).unwrap();
    let wl: ChunkedFifo<u32> = ChunkedFifo::new(&topo);

    let mut values: Vec<u32> = (0..10_000).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    values.shuffle(&mut rng);

    for &v in &values {
        wl.push(v);
    }
    let mut seen = vec![false; values.len()];
    while let Some(v) = wl.pop() {
        assert!(!seen[v as usize], "duplicate item {v}");
        seen[v as usize] = true;
    }
    assert!(seen.iter().all(|&b| b), "all items recovered");
    assert!(wl.empty());
}

#[test]
fn chunks_do_not_leak() {
    let topo = Topology::flat(1).unwrap();
    let wl: ChunkedFifo<u64> = ChunkedFifo::new(&topo);
    for round in 0..3 {
        for v in 0..5_000u64 {
            wl.push(v + round * 5_000);
        }
        while wl.pop().is_some() {}
    }
    let allocated = wl.chunks_allocated();
    let freed = wl.chunks_freed();
    // Only chunks still parked as the worker's consumer/producer slots may
    // remain live while the list is logically empty.
    assert!(allocated - freed <= 2, "allocated {allocated}, freed {freed}");
    drop(wl);
}

#[test]
fn idle_worker_steals_published_chunks() {
    const ITEMS: usize = 100_000;
    let topo = Topology::flat(2).unwrap();
    let pool = ThreadPool::new(topo);
    let wl: ChunkedFifo<usize> = ChunkedFifo::new(&topo);

    let producer_done = std::sync::atomic::AtomicBool::new(false);
    let counts = pool.run(|w| {
        if w.tid == 0 {
            // Producer: publish everything, including the partial tail
            // chunk, then drain whatever worker 1 leaves behind.
            wl.push_initial(0..ITEMS);
            let mut mine = 0usize;
            while wl.pop().is_some() {
                mine += 1;
            }
            producer_done.store(true, std::sync::atomic::Ordering::SeqCst);
            mine
        } else {
            // Thief: drain shared chunks as they appear.
            let mut stolen = 0usize;
            loop {
                if wl.pop().is_some() {
                    stolen += 1;
                } else if producer_done.load(std::sync::atomic::Ordering::SeqCst) {
                    while wl.pop().is_some() {
                        stolen += 1;
                    }
                    break;
                } else {
                    std::hint::spin_loop();
                }
            }
            stolen
        }
    });

    assert_eq!(counts[0] + counts[1], ITEMS, "both counts reconcile");
    assert!(counts[1] > 0, "the idle worker stole some chunks");
}
