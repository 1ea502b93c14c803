//! A collector whose managed runtime lives on another thread.

mod common;

use std::thread;
use std::time::Duration;

use common::{Counters, TestNode};
use crossgc::managed::serve;
use crossgc::{
    AbortReason, ChannelRuntime, Collector, CollectorConfig, ManagedWorld, PassOutcome,
    UpcallError, DEFAULT_UPCALL_TIMEOUT,
};

#[test]
fn test_weak_candidate_resolved_across_threads() {
    let config = CollectorConfig::cross_domain();
    let (runtime, requests) = ChannelRuntime::from_config(&config);
    assert_eq!(runtime.timeout(), DEFAULT_UPCALL_TIMEOUT);
    let mut gc = Collector::new(runtime, config);
    let counters = Counters::default();

    let mut world = ManagedWorld::new();
    let heap = gc.heap_mut();
    let m = world.new_object(heap);
    let n = heap.alloc(TestNode::new(&counters));
    TestNode::link(heap, n, m);
    world.store_ref(heap, m, n).unwrap();
    heap.decref(n);

    let server = thread::spawn(move || {
        let handled = serve(&requests, &mut world);
        (world, handled)
    });

    let result = gc.collect(2).unwrap();
    assert!(result.is_completed());
    assert!(!gc.is_tracked(m));
    assert!(gc.is_tracked(n));
    assert_eq!(gc.last_metrics().stubs_weakened, 1);

    drop(gc);
    let (world, handled) = server.join().unwrap();
    // Polling token, replication of `n`, the ownership query for `n`, the
    // commit and the token release.
    assert_eq!(handled, 5);
    assert!(world.is_weak(m));
    assert_eq!(world.replicated(n), Some(&[m][..]));
    assert!(!world.gate().is_held());
}

#[test]
fn test_unanswered_polling_request_aborts_pass() {
    let config = CollectorConfig::cross_domain()
        .with_polling_attempts(1)
        .with_upcall_timeout(Duration::from_millis(10));
    let (runtime, requests) = ChannelRuntime::from_config(&config);
    let mut gc = Collector::new(runtime, config);

    let result = gc.collect(0).unwrap();
    assert_eq!(
        result.outcome,
        PassOutcome::Aborted(AbortReason::PollingContended)
    );

    // A managed side that answers late still ends up with its token back.
    drop(gc);
    let mut world = ManagedWorld::new();
    assert_eq!(serve(&requests, &mut world), 2);
    assert!(!world.gate().is_held());
}

#[test]
fn test_runtime_hanging_up_mid_pass_aborts() {
    let (runtime, requests) = ChannelRuntime::new(Duration::from_secs(5));
    let mut gc = Collector::new(runtime, CollectorConfig::cross_domain());
    let counters = Counters::default();

    let mut world = ManagedWorld::new();
    let heap = gc.heap_mut();
    let m = world.new_object(heap);
    let n = heap.alloc(TestNode::new(&counters));
    TestNode::link(heap, n, m);
    world.store_ref(heap, m, n).unwrap();
    heap.decref(n);

    // Grant the polling token, then go away.
    let server = thread::spawn(move || {
        let request = requests.recv().unwrap();
        assert_eq!(request.name(), "disable_reference_queue_polling");
        request.dispatch(&mut world);
    });

    let result = gc.collect(2).unwrap();
    server.join().unwrap();
    assert_eq!(
        result.outcome,
        PassOutcome::Aborted(AbortReason::UpcallFailed(UpcallError::Disconnected))
    );
    assert!(gc.is_tracked(m));
    assert!(gc.is_tracked(n));
    assert_eq!(gc.consecutive_aborts(), 1);
}
