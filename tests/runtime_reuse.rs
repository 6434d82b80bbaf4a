use std::sync::atomic::{AtomicU64, Ordering};

use amorph::{LoopOptions, Runtime};

#[test]
fn one_runtime_runs_many_loops() {
    let mut rt = Runtime::new(3).unwrap();
    let total = AtomicU64::new(0);

    for round in 0..5u64 {
        let report = rt.for_each(
            0..100u64,
            |&v, _ctx| {
                total.fetch_add(v, Ordering::Relaxed);
                Ok(())
            },
            &LoopOptions::named("reuse").no_pushes().no_conflict_detection(),
        );
        assert_eq!(report.commits(), 100);
        assert_eq!(total.load(Ordering::Relaxed), 4950 * (round + 1));
    }
}

#[test]
fn more_stats_does_not_change_results() {
    let mut rt = Runtime::new(2).unwrap();
    let report = rt.for_each(
        0..500u32,
        |_v, _ctx| Ok(()),
        &LoopOptions::named("timed").no_pushes().more_stats(),
    );
    assert_eq!(report.commits(), 500);
}
