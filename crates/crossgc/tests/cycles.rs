//! Cycle collection on a purely native heap.

mod common;

use common::{ring, Counters, TestNode};
use crossgc::{Collector, PassOutcome};

#[test]
fn test_three_node_cycle() {
    let mut gc = Collector::default();
    let counters = Counters::default();
    let nodes = ring(gc.heap_mut(), &counters, 3);

    let result = gc.collect(2).unwrap();
    assert_eq!(result.outcome, PassOutcome::Completed);
    assert_eq!(result.collected, 3);
    assert_eq!(result.uncollectable, 0);

    for node in nodes {
        assert!(!gc.heap().is_alive(node));
        assert!(!gc.is_tracked(node));
    }
    // Members released by the first `clear` are cleared on the way out.
    assert_eq!(counters.clears(), 3);
    assert_eq!(gc.heap().live_objects(), 0);
}

#[test]
fn test_self_cycle() {
    let mut gc = Collector::default();
    let counters = Counters::default();
    let a = gc.heap_mut().alloc(TestNode::new(&counters));
    TestNode::link(gc.heap_mut(), a, a);
    gc.heap_mut().decref(a);

    assert_eq!(gc.collect(0).unwrap().collected, 1);
    assert!(!gc.heap().is_alive(a));
    assert_eq!(counters.clears(), 1);
}

#[test]
fn test_externally_held_cycle_survives() {
    let mut gc = Collector::default();
    let counters = Counters::default();
    let heap = gc.heap_mut();
    let a = heap.alloc(TestNode::new(&counters));
    let b = heap.alloc(TestNode::new(&counters));
    TestNode::link(heap, a, b);
    TestNode::link(heap, b, a);
    heap.decref(b);
    // `a` keeps its local reference.

    let result = gc.collect(2).unwrap();
    assert_eq!(result.collected, 0);
    assert_eq!(counters.clears(), 0);
    assert_eq!(gc.heap().refcnt(a), Some(2));
    assert_eq!(gc.heap().refcnt(b), Some(1));

    let mut survivors = gc.get_objects(Some(2)).unwrap();
    survivors.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(survivors, expected);

    gc.heap_mut().decref(a);
    assert_eq!(gc.collect(2).unwrap().collected, 2);
    assert_eq!(gc.heap().live_objects(), 0);
}

#[test]
fn test_garbage_referencing_live_object() {
    let mut gc = Collector::default();
    let counters = Counters::default();
    let heap = gc.heap_mut();
    let live = heap.alloc(TestNode::new(&counters));
    let nodes = ring(heap, &counters, 2);
    TestNode::link(heap, nodes[0], live);
    assert_eq!(heap.refcnt(live), Some(2));

    assert_eq!(gc.collect(2).unwrap().collected, 2);
    assert!(gc.heap().is_alive(live));
    assert_eq!(gc.heap().refcnt(live), Some(1));
}

#[test]
fn test_untracked_objects_are_invisible() {
    let mut gc = Collector::default();
    let counters = Counters::default();
    let heap = gc.heap_mut();
    let a = heap.alloc_untracked(TestNode::new(&counters));
    TestNode::link(heap, a, a);
    heap.decref(a);
    assert!(!heap.is_tracked(a));

    assert_eq!(gc.collect(2).unwrap().collected, 0);
    assert!(gc.heap().is_alive(a));

    // Tracking it later makes the cycle collectable.
    gc.heap_mut().track(a);
    assert_eq!(gc.collect(2).unwrap().collected, 1);
    assert!(!gc.heap().is_alive(a));
}

#[test]
fn test_cycle_held_by_untracked_container_survives() {
    let mut gc = Collector::default();
    let counters = Counters::default();
    let heap = gc.heap_mut();
    let holder = heap.alloc_untracked(TestNode::new(&counters));
    let nodes = ring(heap, &counters, 2);
    TestNode::link(heap, holder, nodes[0]);

    assert_eq!(gc.collect(2).unwrap().collected, 0);
    assert!(nodes.iter().all(|n| gc.heap().is_alive(*n)));

    gc.heap_mut().decref(holder);
    assert_eq!(gc.collect(2).unwrap().collected, 2);
}

#[test]
fn test_immortal_objects_are_never_collected() {
    let mut gc = Collector::default();
    let counters = Counters::default();
    let heap = gc.heap_mut();
    let a = heap.alloc(TestNode::new(&counters));
    TestNode::link(heap, a, a);
    heap.make_immortal(a);
    heap.decref(a);

    assert_eq!(gc.collect(2).unwrap().collected, 0);
    assert!(gc.heap().is_alive(a));
    assert!(gc.heap().is_immortal(a));
}

#[test]
fn test_referents_follow_traverse() {
    let mut gc = Collector::default();
    let counters = Counters::default();
    let heap = gc.heap_mut();
    let a = heap.alloc(TestNode::new(&counters));
    let b = heap.alloc(TestNode::new(&counters));
    TestNode::link(heap, a, b);
    TestNode::link(heap, a, b);

    assert_eq!(gc.get_referents(a), vec![b, b]);
    assert!(gc.get_referents(b).is_empty());
}

#[test]
fn test_large_ring() {
    let mut gc = Collector::default();
    let counters = Counters::default();
    ring(gc.heap_mut(), &counters, 10_000);

    assert_eq!(gc.collect(2).unwrap().collected, 10_000);
    assert_eq!(counters.clears(), 10_000);
    assert_eq!(gc.heap().live_objects(), 0);
}
