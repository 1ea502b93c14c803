//! Object kinds shared by the unit tests.

use crate::heap::Heap;
use crate::object::{GcObject, ObjRef};
use crate::traverse::{Traverse, Visitor};

/// An object without references.
#[derive(Debug, Default)]
pub(crate) struct Leaf;

impl Traverse for Leaf {
    fn traverse(&self, _visitor: &mut dyn Visitor) {}

    fn drain_refs(&mut self, _out: &mut Vec<ObjRef>) {}
}

impl GcObject for Leaf {
    fn type_name(&self) -> &'static str {
        "leaf"
    }
}

/// An object holding strong references to other objects.
#[derive(Debug, Default)]
pub(crate) struct Node {
    pub(crate) edges: Vec<ObjRef>,
}

impl Node {
    /// Store a new strong reference to `to` inside the node `from`.
    pub(crate) fn link(heap: &mut Heap, from: ObjRef, to: ObjRef) {
        heap.incref(to);
        if let Some(node) = heap.get_mut::<Self>(from) {
            node.edges.push(to);
        }
    }
}

impl Traverse for Node {
    fn traverse(&self, visitor: &mut dyn Visitor) {
        self.edges.traverse(visitor);
    }

    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        self.edges.drain_refs(out);
    }
}

impl GcObject for Node {
    fn type_name(&self) -> &'static str {
        "node"
    }
}
