//! Generations, scheduling, callbacks and the permanent generation.

mod common;

use std::sync::Arc;

use common::{ring, Counters, TestNode};
use crossgc::{
    global_metrics, CallbackInfo, CallbackPhase, CollectError, Collector, CollectorConfig,
};
use parking_lot::Mutex;

#[test]
fn test_survivors_are_promoted() {
    let mut gc = Collector::default();
    let counters = Counters::default();
    let a = gc.heap_mut().alloc(TestNode::new(&counters));
    assert_eq!(gc.get_objects(Some(0)).unwrap(), vec![a]);

    gc.collect(0).unwrap();
    assert!(gc.get_objects(Some(0)).unwrap().is_empty());
    assert_eq!(gc.get_objects(Some(1)).unwrap(), vec![a]);
    assert_eq!(gc.get_count(), [0, 1, 0]);

    gc.collect(1).unwrap();
    assert_eq!(gc.get_objects(Some(2)).unwrap(), vec![a]);
    assert_eq!(gc.get_count(), [0, 0, 1]);

    // The oldest generation keeps its survivors.
    gc.collect(2).unwrap();
    assert_eq!(gc.get_objects(None).unwrap(), vec![a]);
    assert_eq!(gc.get_stats()[2].collections, 1);
}

#[test]
fn test_young_pass_ignores_older_garbage() {
    let mut gc = Collector::default();
    let counters = Counters::default();
    let nodes = ring(gc.heap_mut(), &counters, 2);
    let holder = gc.heap_mut().alloc(TestNode::new(&counters));
    TestNode::link(gc.heap_mut(), holder, nodes[0]);
    gc.collect(0).unwrap();
    assert_eq!(gc.get_objects(Some(1)).unwrap().len(), 3);

    // The cycle becomes garbage while sitting in generation 1.
    gc.heap_mut().decref(holder);
    assert_eq!(gc.collect(0).unwrap().collected, 0);
    assert_eq!(gc.collect(1).unwrap().collected, 2);
}

#[test]
fn test_allocation_schedules_collection() {
    let config = CollectorConfig::default().with_thresholds([2, 10, 10]);
    let mut gc = Collector::with_config(config);
    let counters = Counters::default();

    gc.disable();
    assert!(!gc.is_enabled());
    for _ in 0..5 {
        let a = gc.alloc(TestNode::new(&counters));
        TestNode::link(gc.heap_mut(), a, a);
        gc.heap_mut().decref(a);
    }
    assert_eq!(gc.get_stats()[0].collections, 0);
    assert_eq!(gc.get_count()[0], 5);
    assert_eq!(gc.maybe_collect(), 0);

    gc.enable();
    let kept = gc.alloc(TestNode::new(&counters));
    assert_eq!(gc.get_stats()[0].collections, 1);
    assert_eq!(gc.get_stats()[0].collected, 5);
    assert_eq!(gc.get_objects(Some(1)).unwrap(), vec![kept]);
    assert_eq!(gc.heap().live_objects(), 1);
}

#[test]
fn test_zero_threshold_disables_scheduling() {
    let config = CollectorConfig::default().with_thresholds([0, 10, 10]);
    let mut gc = Collector::with_config(config);
    let counters = Counters::default();
    for _ in 0..10 {
        gc.alloc(TestNode::new(&counters));
    }
    assert_eq!(gc.get_stats()[0].collections, 0);
}

#[test]
fn test_callbacks_bracket_each_pass() {
    let mut gc = Collector::default();
    let counters = Counters::default();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let id = gc.add_callback(move |phase, info| sink.lock().push((phase, *info)));
    ring(gc.heap_mut(), &counters, 2);

    gc.collect(0).unwrap();
    assert_eq!(
        *events.lock(),
        vec![
            (
                CallbackPhase::Start,
                CallbackInfo {
                    generation: 0,
                    collected: 0,
                    uncollectable: 0,
                },
            ),
            (
                CallbackPhase::Stop,
                CallbackInfo {
                    generation: 0,
                    collected: 2,
                    uncollectable: 0,
                },
            ),
        ]
    );

    // Shutdown collection runs without callbacks.
    ring(gc.heap_mut(), &counters, 3);
    assert_eq!(gc.collect_no_fail(), 3);
    assert_eq!(events.lock().len(), 2);

    assert!(gc.remove_callback(id));
    assert!(!gc.remove_callback(id));
    gc.collect(2).unwrap();
    assert_eq!(events.lock().len(), 2);
}

#[test]
fn test_freeze_and_unfreeze() {
    let mut gc = Collector::default();
    let counters = Counters::default();
    let kept = gc.heap_mut().alloc(TestNode::new(&counters));
    let nodes = ring(gc.heap_mut(), &counters, 2);

    gc.freeze();
    assert_eq!(gc.get_freeze_count(), 3);
    assert!(gc.get_objects(None).unwrap().is_empty());
    assert_eq!(gc.collect(2).unwrap().collected, 0);
    assert!(gc.heap().is_alive(nodes[0]));

    gc.unfreeze();
    assert_eq!(gc.get_freeze_count(), 0);
    assert_eq!(gc.get_objects(Some(2)).unwrap().len(), 3);
    assert_eq!(gc.collect(2).unwrap().collected, 2);
    assert_eq!(gc.get_objects(None).unwrap(), vec![kept]);
}

#[test]
fn test_invalid_generation() {
    let mut gc = Collector::default();
    let err = gc.collect(3).unwrap_err();
    assert_eq!(err, CollectError::InvalidGeneration(3));
    assert_eq!(err.to_string(), "invalid generation 3 (expected 0..=2)");
    assert!(gc.get_objects(Some(5)).is_err());
    assert!(gc.set_threshold(7, 1).is_err());
}

#[test]
fn test_metrics_describe_last_pass() {
    let mut gc = Collector::default();
    let counters = Counters::default();
    gc.heap_mut().alloc(TestNode::new(&counters));
    ring(gc.heap_mut(), &counters, 4);

    gc.collect(1).unwrap();
    let metrics = gc.last_metrics();
    assert_eq!(metrics.generation, 1);
    assert_eq!(metrics.objects_examined, 5);
    assert_eq!(metrics.objects_collected, 4);
    assert_eq!(metrics.objects_uncollectable, 0);
    assert!(!metrics.aborted);
    assert_eq!(metrics.total_collections, 1);
    assert!(metrics.duration >= metrics.delete_duration);

    gc.collect(0).unwrap();
    assert_eq!(gc.last_metrics().total_collections, 2);
    assert!(global_metrics().total_collections() >= 2);
}
