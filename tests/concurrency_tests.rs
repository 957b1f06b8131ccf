//! Correlation under interleaved and concurrent invocations.
//!
//! Non-matching invocations never arm an exit, so whatever order their
//! entries and exits happen in, only the target's own exit may reach the
//! payload.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{BackendOp, Confirmed, harness, harness_with, started};
use modhook::{EntryVerdict, ExitStatus, HookConfig, InvocationId, Location, State};

const LOAD: &str = "do_init_module";
const UNLOAD: &str = "free_module";

fn id(raw: usize) -> InvocationId {
    InvocationId::new(raw)
}

// =============================================================================
// Deterministic Interleavings
// =============================================================================

#[test]
fn test_unmatched_exit_first() {
    let h = started();

    // A (target) enters, B (other) enters, B returns, A returns.
    assert_eq!(
        h.hooks.dispatch_entry(Location::Load, id(0xa), &Some("foo")),
        EntryVerdict::Arm
    );
    assert_eq!(
        h.hooks.dispatch_entry(Location::Load, id(0xb), &Some("bar")),
        EntryVerdict::Skip
    );
    // B was never armed: had the runtime delivered its exit anyway, it is
    // rejected instead of consuming A's decision.
    assert!(
        h.hooks
            .dispatch_exit(Location::Load, id(0xb), ExitStatus::SUCCESS)
            .is_err()
    );
    h.hooks
        .dispatch_exit(Location::Load, id(0xa), ExitStatus::SUCCESS)
        .unwrap();

    assert_eq!(h.payload.events(), vec![Confirmed::Load("foo".into())]);
}

#[test]
fn test_matched_exit_first() {
    let h = started();

    h.hooks.dispatch_entry(Location::Load, id(0xb), &Some("bar"));
    h.hooks.dispatch_entry(Location::Load, id(0xa), &Some("foo"));
    h.hooks
        .dispatch_exit(Location::Load, id(0xa), ExitStatus::SUCCESS)
        .unwrap();

    assert_eq!(h.payload.loads(), 1);
    assert_eq!(h.hooks.in_flight(), 0);
}

#[test]
fn test_unmatched_entry_between_matched_entry_and_exit() {
    let h = started();

    h.hooks.dispatch_entry(Location::Load, id(1), &Some("foo"));
    for other in 2..10 {
        assert_eq!(
            h.hooks.dispatch_entry(Location::Load, id(other), &Some("bar")),
            EntryVerdict::Skip
        );
    }
    assert!(h.payload.events().is_empty());

    h.hooks
        .dispatch_exit(Location::Load, id(1), ExitStatus::SUCCESS)
        .unwrap();
    assert_eq!(h.payload.events(), vec![Confirmed::Load("foo".into())]);
}

#[test]
fn test_two_target_invocations_keep_their_own_status() {
    let h = started();

    h.hooks.dispatch_entry(Location::Load, id(1), &Some("foo"));
    h.hooks.dispatch_entry(Location::Load, id(2), &Some("foo"));

    // The second call fails and returns first; the first one succeeds.
    h.hooks
        .dispatch_exit(Location::Load, id(2), ExitStatus::new(-17))
        .unwrap();
    assert!(h.payload.events().is_empty());

    h.hooks
        .dispatch_exit(Location::Load, id(1), ExitStatus::SUCCESS)
        .unwrap();
    assert_eq!(h.payload.loads(), 1);
}

#[test]
fn test_load_and_unload_with_same_identity() {
    let h = started();

    h.hooks.dispatch_entry(Location::Load, id(7), &Some("foo"));
    h.hooks.dispatch_entry(Location::Unload, id(7), &Some("foo"));

    h.hooks
        .dispatch_exit(Location::Unload, id(7), ExitStatus::SUCCESS)
        .unwrap();
    h.hooks
        .dispatch_exit(Location::Load, id(7), ExitStatus::SUCCESS)
        .unwrap();

    assert_eq!(
        h.payload.events(),
        vec![
            Confirmed::Unload("foo".into()),
            Confirmed::Load("foo".into())
        ]
    );
}

// =============================================================================
// Threaded Invocations
// =============================================================================

#[test]
fn test_concurrent_loads_only_target_confirms() {
    const N: usize = 16;
    const TARGET: usize = 11;

    let h = Arc::new(harness_with(HookConfig::new("foo").with_max_active(N)));
    h.hooks.start().unwrap();
    let barrier = Arc::new(Barrier::new(N));

    let workers: Vec<_> = (0..N)
        .map(|i| {
            let h = h.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let name = if i == TARGET {
                    "foo".to_string()
                } else {
                    format!("mod{}", i)
                };
                let invocation = id(0x1000 + i);

                barrier.wait();
                let verdict = h
                    .hooks
                    .dispatch_entry(Location::Load, invocation, &Some(name.as_str()));
                // Hold every call open until all entries ran.
                barrier.wait();
                if verdict == EntryVerdict::Arm {
                    h.hooks
                        .dispatch_exit(Location::Load, invocation, ExitStatus::SUCCESS)
                        .unwrap();
                }
                verdict
            })
        })
        .collect();

    let armed: Vec<usize> = workers
        .into_iter()
        .enumerate()
        .filter_map(|(i, w)| (w.join().unwrap() == EntryVerdict::Arm).then_some(i))
        .collect();

    assert_eq!(armed, vec![TARGET]);
    assert_eq!(h.payload.events(), vec![Confirmed::Load("foo".into())]);
    assert_eq!(h.hooks.in_flight(), 0);

    let stats = &h.hooks.list_probes()[0].stats;
    assert_eq!(stats.hits, N as u64);
    assert_eq!(stats.armed, 1);
    assert_eq!(stats.completed, 1);
}

#[test]
fn test_concurrent_target_loads_each_confirm_once() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 50;

    let h = Arc::new(harness_with(
        HookConfig::new("foo").with_max_active(THREADS),
    ));
    h.hooks.start().unwrap();

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let h = h.clone();
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    let invocation = id((t << 16) | round);
                    let name = if round % 2 == 0 { "foo" } else { "bar" };
                    let status = if round % 4 == 0 {
                        ExitStatus::SUCCESS
                    } else {
                        ExitStatus::new(-22)
                    };
                    if h.hooks
                        .dispatch_entry(Location::Load, invocation, &Some(name))
                        == EntryVerdict::Arm
                    {
                        h.hooks
                            .dispatch_exit(Location::Load, invocation, status)
                            .unwrap();
                    }
                }
            })
        })
        .collect();

    for w in workers {
        w.join().unwrap();
    }

    // Only "foo" rounds with a successful status confirm: every fourth round.
    let expected = THREADS * ROUNDS.div_ceil(4);
    assert_eq!(h.payload.loads(), expected);
    assert_eq!(h.hooks.in_flight(), 0);
}

// =============================================================================
// Concurrent Lifecycle
// =============================================================================

#[test]
fn test_concurrent_start_stop_is_serialized() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 100;

    let h = Arc::new(harness());
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let h = h.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut started = 0;
                for _ in 0..ROUNDS {
                    if h.hooks.start().is_ok() {
                        started += 1;
                    }
                    let _ = h.hooks.stop();
                }
                started
            })
        })
        .collect();

    let started: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
    assert!(started > 0);

    // Every start and every stop touched both locations back to back, and no
    // location was armed twice or disarmed while unarmed.
    let ops = h.backend.ops();
    assert_eq!(ops.len() % 2, 0);
    let mut armed = false;
    for pair in ops.chunks(2) {
        if armed {
            assert_eq!(pair, [BackendOp::Disarm(LOAD), BackendOp::Disarm(UNLOAD)]);
        } else {
            assert_eq!(pair, [BackendOp::Arm(LOAD), BackendOp::Arm(UNLOAD)]);
        }
        armed = !armed;
    }
    assert_eq!(ops.len(), started * 4);

    assert!(!armed);
    assert_eq!(h.hooks.state(), State::Inactive);
    assert!(!h.hooks.is_active(LOAD));
    assert!(!h.hooks.is_active(UNLOAD));
}
