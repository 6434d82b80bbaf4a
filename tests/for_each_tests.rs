use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use amorph::substrate::{current_tid, Topology};
use amorph::worklists::ObimSpec;
use amorph::{AbortPolicy, Conflict, LoopOptions, Runtime};

/// Route loop stats to the console when `RUST_LOG` asks for them.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

#[test]
fn counting_commits_every_seeded_item_once() {
    init_tracing();
    let mut rt = Runtime::new(4).unwrap();
    let seen: Vec<AtomicUsize> = (0..10_000).map(|_| AtomicUsize::new(0)).collect();
    let sum = AtomicU64::new(0);

    let report = rt.for_each(
        0usize..10_000,
        |&v, _ctx| {
            seen[v].fetch_add(1, Ordering::Relaxed);
            sum.fetch_add(1, Ordering::Relaxed);
            Ok(())
        },
        &LoopOptions::named("counting").no_pushes().no_conflict_detection(),
    );

    assert_eq!(report.commits(), 10_000);
    assert_eq!(report.conflicts, 0);
    assert_eq!(sum.load(Ordering::Relaxed), 10_000);
    assert!(
        seen.iter().all(|c| c.load(Ordering::Relaxed) == 1),
        "every item committed exactly once"
    );
}

#[test]
fn empty_range_returns_immediately() {
    let mut rt = Runtime::new(4).unwrap();
    let report = rt.for_each(
        std::iter::empty::<u32>(),
        |_v, _ctx| Ok(()),
        &LoopOptions::named("empty").no_pushes(),
    );
    assert_eq!(report.iterations, 0);
    assert_eq!(report.pushes, 0);
}

/// Commit count of the fan-out recursion seeded at 0: each value below `k`
/// spawns `v + 1` and `v + 2`.
fn fanout_size(k: usize) -> u64 {
    // count[v]: tree size rooted at value v; values at or past k are leaves.
    let mut count = vec![1u64; k + 3];
    for v in (0..k).rev() {
        count[v] = 1 + count[v + 1] + count[v + 2];
    }
    count[0]
}

#[test]
fn fanout_commit_count_is_exact() {
    const K: u64 = 20;
    let mut rt = Runtime::new(4).unwrap();
    let invocations = AtomicU64::new(0);

    let report = rt.for_each(
        [0u64],
        |&v, ctx| {
            invocations.fetch_add(1, Ordering::Relaxed);
            if v < K {
                ctx.push(v + 1);
                ctx.push(v + 2);
            }
            Ok(())
        },
        &LoopOptions::named("fanout"),
    );

    let expected = fanout_size(K as usize);
    assert_eq!(report.commits(), expected);
    assert_eq!(invocations.load(Ordering::Relaxed), expected);
    assert_eq!(report.pushes, expected - 1, "every commit but the seed was pushed");
}

#[test]
fn fanout_with_fast_push_matches() {
    const K: u64 = 20;
    let mut rt = Runtime::new(4).unwrap();
    let report = rt.for_each(
        [0u64],
        |&v, ctx| {
            if v < K {
                ctx.push(v + 1);
                ctx.push(v + 2);
            }
            Ok(())
        },
        &LoopOptions::named("fanout-fast").no_conflict_detection(),
    );
    assert_eq!(report.commits(), fanout_size(K as usize));
}

#[test]
fn long_dependency_chain_survives_quiescence_rounds() {
    const N: u64 = 10_000;
    let mut rt = Runtime::new(4).unwrap();
    let report = rt.for_each(
        [0u64],
        |&v, ctx| {
            if v < N {
                ctx.push(v + 1);
            }
            Ok(())
        },
        &LoopOptions::named("chain").no_conflict_detection(),
    );
    assert_eq!(report.commits(), N + 1);
}

#[test]
fn forced_conflict_retries_and_commits_exactly_once() {
    let mut rt = Runtime::new(2).unwrap();
    let commits: Vec<AtomicUsize> = (0..2).map(|_| AtomicUsize::new(0)).collect();

    let report = rt.for_each(
        0usize..2,
        |&v, ctx| {
            if v == 1 && ctx.is_first_pass() {
                // Simulates losing an acquisition race on the first try.
                return Err(Conflict);
            }
            commits[v].fetch_add(1, Ordering::Relaxed);
            Ok(())
        },
        &LoopOptions::named("forced-conflict").no_pushes(),
    );

    assert_eq!(report.conflicts, 1);
    assert_eq!(report.commits(), 2);
    assert_eq!(report.iterations, 3);
    assert!(commits.iter().all(|c| c.load(Ordering::Relaxed) == 1));
}

#[test]
fn lockable_race_commits_both_items_exactly_once() {
    use amorph::{acquire, Lockable};

    let mut rt = Runtime::new(2).unwrap();
    let node = Lockable::new();
    let commits: Vec<AtomicUsize> = (0..2).map(|_| AtomicUsize::new(0)).collect();

    let report = rt.for_each(
        0usize..2,
        |&v, _ctx| {
            acquire(&node)?;
            // Hold the node long enough for the other item to race us.
            for _ in 0..10_000 {
                std::hint::spin_loop();
            }
            commits[v].fetch_add(1, Ordering::Relaxed);
            Ok(())
        },
        &LoopOptions::named("lockable-race").no_pushes(),
    );

    assert!(commits.iter().all(|c| c.load(Ordering::Relaxed) == 1));
    assert_eq!(report.commits(), 2);
    assert_eq!(report.iterations, 2 + report.conflicts);
    assert!(!node.is_held(), "all acquisitions released");
}

#[test]
fn aborted_iteration_publishes_no_pushes() {
    let mut rt = Runtime::new(2).unwrap();
    let stray = AtomicUsize::new(0);

    let report = rt.for_each(
        0usize..2,
        |&v, ctx| {
            if v >= 100 {
                stray.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            if ctx.is_first_pass() {
                // These must be rolled back with the abort.
                ctx.push(v + 100);
                return Err(Conflict);
            }
            Ok(())
        },
        &LoopOptions::named("rollback"),
    );

    assert_eq!(stray.load(Ordering::Relaxed), 0, "aborted pushes never ran");
    assert_eq!(report.pushes, 0);
    assert_eq!(report.conflicts, 2);
    assert_eq!(report.commits(), 2);
}

#[test]
fn break_stops_the_loop_early() {
    let mut rt = Runtime::new(4).unwrap();
    let ran = AtomicU64::new(0);

    let report = rt.for_each(
        1u32..=1000,
        |&v, ctx| {
            ran.fetch_add(1, Ordering::Relaxed);
            if v == 42 {
                ctx.breakout();
            }
            Ok(())
        },
        &LoopOptions::named("break").no_pushes().breakable(),
    );

    assert!(report.commits() <= 1000);
    assert!(report.commits() >= 1, "the breaking iteration itself commits");
    assert_eq!(ran.load(Ordering::Relaxed), report.commits());
}

#[test]
fn break_on_first_iteration_stops_a_single_worker_immediately() {
    let mut rt = Runtime::new(1).unwrap();
    let report = rt.for_each(
        1u32..=100,
        |_v, ctx| {
            ctx.breakout();
            Ok(())
        },
        &LoopOptions::named("break-first").no_pushes().breakable(),
    );
    assert_eq!(report.iterations, 1, "no invocations after the break");
}

#[test]
fn single_worker_behaves_sequentially() {
    let mut rt = Runtime::new(1).unwrap();
    let order = Mutex::new(Vec::new());
    let report = rt.for_each_in(
        ObimSpec {
            indexer: |v: &usize| *v,
            range: 16,
        },
        vec![5usize, 3, 8, 1, 4],
        |&v, _ctx| {
            order.lock().unwrap().push(v);
            Ok(())
        },
        &LoopOptions::named("obim-order").no_pushes(),
    );
    assert_eq!(report.commits(), 5);
    assert_eq!(*order.lock().unwrap(), vec![1, 3, 4, 5, 8]);
}

#[test]
fn persistent_conflicts_funnel_to_the_tree_root() {
    const RETRIES: usize = 6;
    init_tracing();
    let topo = Topology::with_sockets(4, 2).unwrap();
    let mut rt = Runtime::with_topology(topo);
    let attempts = AtomicUsize::new(0);
    let commit_tid = AtomicUsize::new(usize::MAX);

    let report = rt.for_each(
        [0u32],
        |_v, _ctx| {
            let n = attempts.fetch_add(1, Ordering::Relaxed);
            if n < RETRIES {
                return Err(Conflict);
            }
            commit_tid.store(current_tid(), Ordering::Relaxed);
            Ok(())
        },
        &LoopOptions::named("funnel").no_pushes().abort_policy(AbortPolicy::Basic),
    );

    assert_eq!(report.commits(), 1);
    assert_eq!(report.conflicts, RETRIES as u64);
    assert_eq!(
        commit_tid.load(Ordering::Relaxed),
        0,
        "escalation serialized the item at the funnel worker"
    );
}
