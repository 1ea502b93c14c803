//! Reference-count bookkeeping.
//!
//! After `update_refs` and `subtract_refs` the `gc_refs` of
//! every member of a list counts only the references from outside that list.
//! A positive value means the object is reachable from a root, an older
//! generation, or the managed runtime.

use super::Pass;
use crate::list::ListId;
use crate::managed::ManagedRuntime;
use crate::object::ObjRef;

impl<R: ManagedRuntime + ?Sized> Pass<'_, R> {
    /// Copy each member's refcount into `gc_refs` and mark it `COLLECTING`.
    ///
    /// Immortal objects move to the permanent generation: their count says
    /// nothing about their references.
    pub(super) fn update_refs(&mut self, list: ListId) {
        let mut cur = self.heap.list_first(list);
        while let Some(idx) = cur {
            let next = self.heap.list_next(idx);
            if self.heap.is_immortal_at(idx) {
                self.heap.list_move(idx, ListId::Permanent);
                cur = next;
                continue;
            }
            let refcnt = self.heap.refcnt_at(idx);
            // A tracked object at zero should already have been deallocated.
            debug_assert!(
                refcnt != 0,
                "tracked <{}> at index {idx} has refcount 0",
                self.heap.type_name_at(idx)
            );
            self.heap.header_mut(idx).reset_refs(refcnt);
            cur = next;
        }
    }

    /// Subtract every reference held by a member from its target, if the
    /// target is in the list as well.
    pub(super) fn subtract_refs(&mut self, list: ListId) {
        let mut refs = Vec::new();
        let mut cur = self.heap.list_first(list);
        while let Some(idx) = cur {
            refs.clear();
            self.heap.collect_referents(idx, &mut refs);
            for &r in &refs {
                self.visit_decref(r);
            }
            cur = self.heap.list_next(idx);
        }
    }

    fn visit_decref(&mut self, obj: ObjRef) {
        let Some(idx) = self.heap.resolve(obj) else {
            return;
        };
        let header = self.heap.header_mut(idx);
        if header.is_collecting() {
            debug_assert!(header.gc_refs > 0, "{obj:?}: refcount is too small");
            header.gc_refs -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorConfig;
    use crate::heap::Heap;
    use crate::managed::NoManagedRuntime;
    use crate::testing::{Leaf, Node};

    #[test]
    fn internal_references_are_subtracted() {
        let config = CollectorConfig::default();
        let mut heap = Heap::new(&config);
        let a = heap.alloc(Node::default());
        let b = heap.alloc(Node::default());
        Node::link(&mut heap, a, b);
        Node::link(&mut heap, b, a);
        heap.decref(b);

        let young = ListId::Generation(0);
        let mut runtime = NoManagedRuntime;
        let mut garbage = Vec::new();
        let mut pass = Pass::new(&mut heap, &mut runtime, &mut garbage, &config);
        pass.update_refs(young);
        pass.subtract_refs(young);

        assert_eq!(pass.heap.header(a.index).gc_refs, 1);
        assert_eq!(pass.heap.header(b.index).gc_refs, 0);
        assert!(pass.heap.header(a.index).is_collecting());
        for idx in pass.heap.list_members(young) {
            pass.heap.header_mut(idx).clear_transient();
        }
    }

    #[test]
    fn immortal_objects_move_to_permanent() {
        let config = CollectorConfig::default();
        let mut heap = Heap::new(&config);
        let a = heap.alloc(Leaf);
        heap.make_immortal(a);

        let mut runtime = NoManagedRuntime;
        let mut garbage = Vec::new();
        let mut pass = Pass::new(&mut heap, &mut runtime, &mut garbage, &config);
        pass.update_refs(ListId::Generation(0));
        assert_eq!(pass.heap.list_len(ListId::Permanent), 1);
        assert!(!pass.heap.header(a.index).is_collecting());
    }
}
