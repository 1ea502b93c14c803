//! Object kinds shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossgc::{GcObject, Heap, ObjRef, ObjectError, Traverse, Visitor};

/// Call counters shared between a test and its nodes.
#[derive(Debug, Default, Clone)]
pub struct Counters {
    clears: Arc<AtomicUsize>,
    finalizes: Arc<AtomicUsize>,
}

impl Counters {
    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn finalizes(&self) -> usize {
        self.finalizes.load(Ordering::SeqCst)
    }
}

/// A node with strong edges and switchable hooks.
#[derive(Debug, Default)]
pub struct TestNode {
    pub edges: Vec<ObjRef>,
    pub counters: Counters,
    /// Report a legacy finalizer.
    pub legacy: bool,
    /// Report a `finalize` hook.
    pub finalizer: bool,
    /// Take a reference to the finalized object from this holder.
    pub resurrect_into: Option<ObjRef>,
    /// Fail `clear` and `finalize` after doing their work.
    pub fail: bool,
}

impl TestNode {
    pub fn new(counters: &Counters) -> Self {
        Self {
            counters: counters.clone(),
            ..Self::default()
        }
    }

    pub fn with_finalizer(counters: &Counters) -> Self {
        Self {
            finalizer: true,
            ..Self::new(counters)
        }
    }

    /// Store a new strong reference to `to` inside `from`.
    pub fn link(heap: &mut Heap, from: ObjRef, to: ObjRef) {
        heap.incref(to);
        heap.get_mut::<Self>(from)
            .expect("link source is a live TestNode")
            .edges
            .push(to);
    }

    /// Drop the strong reference `from` holds to `to`.
    pub fn unlink(heap: &mut Heap, from: ObjRef, to: ObjRef) {
        let node = heap
            .get_mut::<Self>(from)
            .expect("unlink source is a live TestNode");
        let pos = node
            .edges
            .iter()
            .position(|r| *r == to)
            .expect("edge exists");
        node.edges.remove(pos);
        heap.decref(to);
    }
}

impl Traverse for TestNode {
    fn traverse(&self, visitor: &mut dyn Visitor) {
        self.edges.traverse(visitor);
    }

    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        self.edges.drain_refs(out);
    }
}

impl GcObject for TestNode {
    fn type_name(&self) -> &'static str {
        "test_node"
    }

    fn clear(&mut self, heap: &mut Heap) -> Result<(), ObjectError> {
        self.counters.clears.fetch_add(1, Ordering::SeqCst);
        for r in std::mem::take(&mut self.edges) {
            heap.decref(r);
        }
        if self.fail {
            return Err(ObjectError::new("clear failed"));
        }
        Ok(())
    }

    fn has_legacy_finalizer(&self) -> bool {
        self.legacy
    }

    fn has_finalizer(&self) -> bool {
        self.finalizer
    }

    fn finalize(&mut self, me: ObjRef, heap: &mut Heap) -> Result<(), ObjectError> {
        self.counters.finalizes.fetch_add(1, Ordering::SeqCst);
        if let Some(holder) = self.resurrect_into {
            TestNode::link(heap, holder, me);
        }
        if self.fail {
            return Err(ObjectError::new("finalize failed"));
        }
        Ok(())
    }
}

/// Allocate `n` nodes linked into a ring and drop the local references.
pub fn ring(heap: &mut Heap, counters: &Counters, n: usize) -> Vec<ObjRef> {
    let nodes: Vec<ObjRef> = (0..n).map(|_| heap.alloc(TestNode::new(counters))).collect();
    for (i, &node) in nodes.iter().enumerate() {
        TestNode::link(heap, node, nodes[(i + 1) % n]);
    }
    for &node in &nodes {
        heap.decref(node);
    }
    nodes
}
