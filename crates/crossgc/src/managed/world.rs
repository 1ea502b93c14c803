//! A tiny managed heap living next to the native one.
//!
//! Every managed object is represented natively by a [`ManagedStub`] whose
//! refcount carries the managed baseline. The world keeps the handle-table
//! side of the model: which stubs are rooted, which linkage slots were made
//! weak, which native objects managed code holds, and the references the
//! collector replicated.
//!
//! [`ManagedWorld::collect`] is the managed collector: a mark phase from the
//! roots and strongly linked stubs, followed by releasing every dead stub.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::{ManagedRuntime, PollingGate};
use crate::error::{ObjectError, UpcallError};
use crate::heap::Heap;
use crate::object::{GcObject, ObjRef};
use crate::traverse::{Traverse, Visitor};

/// Native stub of a managed object.
///
/// `refs` are the references the managed object holds; each one owns a
/// native refcount.
#[derive(Debug, Default)]
pub struct ManagedStub {
    refs: Vec<ObjRef>,
}

impl ManagedStub {
    /// References held by the managed object.
    #[must_use]
    pub fn refs(&self) -> &[ObjRef] {
        &self.refs
    }
}

impl Traverse for ManagedStub {
    fn traverse(&self, visitor: &mut dyn Visitor) {
        self.refs.traverse(visitor);
    }

    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        self.refs.drain_refs(out);
    }
}

impl GcObject for ManagedStub {
    fn type_name(&self) -> &'static str {
        "managed"
    }
}

/// Counts of the upcalls a [`ManagedWorld`] answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpcallLog {
    /// `replicate_native_references` calls.
    pub replicate: usize,
    /// `commit_weak` calls.
    pub commit_weak: usize,
    /// Stubs made weak over all `commit_weak` calls.
    pub weakened: usize,
    /// `is_referenced_from_managed` calls.
    pub is_referenced: usize,
}

/// Reference managed runtime.
#[derive(Debug, Default)]
pub struct ManagedWorld {
    objects: BTreeSet<ObjRef>,
    roots: HashMap<ObjRef, usize>,
    weak: HashSet<ObjRef>,
    wrapped: HashMap<ObjRef, usize>,
    replicated: HashMap<ObjRef, Vec<ObjRef>>,
    gate: Arc<PollingGate>,
    failures: HashMap<&'static str, String>,
    log: UpcallLog,
}

impl ManagedWorld {
    /// Create an empty world with its own polling gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty world sharing `gate` with its reference processing.
    #[must_use]
    pub fn with_gate(gate: Arc<PollingGate>) -> Self {
        Self {
            gate,
            ..Self::default()
        }
    }

    /// The polling gate.
    #[must_use]
    pub fn gate(&self) -> &Arc<PollingGate> {
        &self.gate
    }

    /// Allocate a managed object and its native stub.
    pub fn new_object(&mut self, heap: &mut Heap) -> ObjRef {
        let stub = heap.alloc_managed(ManagedStub::default());
        self.objects.insert(stub);
        stub
    }

    /// Managed objects still alive.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether no managed object is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Whether the managed object behind `stub` is alive.
    #[must_use]
    pub fn contains(&self, stub: ObjRef) -> bool {
        self.objects.contains(&stub)
    }

    /// Hold `obj` from a managed root (a local variable, a static field).
    ///
    /// Native objects get a new strong reference.
    pub fn add_root(&mut self, heap: &mut Heap, obj: ObjRef) {
        if !self.objects.contains(&obj) {
            heap.incref(obj);
            *self.wrapped.entry(obj).or_default() += 1;
        }
        *self.roots.entry(obj).or_default() += 1;
    }

    /// Undo one [`ManagedWorld::add_root`].
    pub fn remove_root(&mut self, heap: &mut Heap, obj: ObjRef) {
        let Some(count) = self.roots.get_mut(&obj) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.roots.remove(&obj);
        }
        if !self.objects.contains(&obj) {
            self.unwrap_native(obj);
            heap.decref(obj);
        }
    }

    /// Store a reference to `target` inside the managed object `owner`.
    ///
    /// # Errors
    ///
    /// Fails if `owner` is not a live managed object.
    pub fn store_ref(
        &mut self,
        heap: &mut Heap,
        owner: ObjRef,
        target: ObjRef,
    ) -> Result<(), ObjectError> {
        if !self.objects.contains(&owner) {
            return Err(ObjectError::new("store into a dead managed object"));
        }
        let stub = heap
            .get_mut::<ManagedStub>(owner)
            .ok_or_else(|| ObjectError::new("owner has no managed stub"))?;
        stub.refs.push(target);
        heap.incref(target);
        if !self.objects.contains(&target) {
            *self.wrapped.entry(target).or_default() += 1;
        }
        Ok(())
    }

    /// Remove one reference to `target` from `owner`.
    pub fn drop_ref(&mut self, heap: &mut Heap, owner: ObjRef, target: ObjRef) {
        let removed = heap.get_mut::<ManagedStub>(owner).is_some_and(|stub| {
            stub.refs
                .iter()
                .position(|r| *r == target)
                .map(|pos| stub.refs.remove(pos))
                .is_some()
        });
        if removed {
            if !self.objects.contains(&target) {
                self.unwrap_native(target);
            }
            heap.decref(target);
        }
    }

    fn unwrap_native(&mut self, obj: ObjRef) {
        if let Some(count) = self.wrapped.get_mut(&obj) {
            *count -= 1;
            if *count == 0 {
                self.wrapped.remove(&obj);
            }
        }
    }

    /// Whether the linkage slot of `stub` was made weak.
    ///
    /// Reflects the last commit or managed collection; a native incref in
    /// between is only picked up by [`ManagedWorld::collect`].
    #[must_use]
    pub fn is_weak(&self, stub: ObjRef) -> bool {
        self.weak.contains(&stub)
    }

    /// The references last replicated for `owner`.
    #[must_use]
    pub fn replicated(&self, owner: ObjRef) -> Option<&[ObjRef]> {
        self.replicated.get(&owner).map(Vec::as_slice)
    }

    /// Upcall counters.
    #[must_use]
    pub const fn upcalls(&self) -> UpcallLog {
        self.log
    }

    /// Make the next `request` upcall fail with `reason`.
    pub fn fail_next(&mut self, request: &'static str, reason: impl Into<String>) {
        self.failures.insert(request, reason.into());
    }

    fn check(&mut self, request: &'static str) -> Result<(), UpcallError> {
        match self.failures.remove(request) {
            Some(reason) => Err(UpcallError::Rejected { request, reason }),
            None => Ok(()),
        }
    }

    /// Run the managed collector. Returns the number of managed objects that
    /// died.
    ///
    /// A stub is a root if it is rooted directly or if its linkage is strong:
    /// not made weak (or strengthened again by a native incref, see
    /// [`Heap::is_weakly_linked`]) and carrying native owners above the
    /// baseline.
    /// Replicated references of reachable native objects are followed like
    /// ordinary managed references.
    pub fn collect(&mut self, heap: &mut Heap) -> usize {
        let gate = Arc::clone(&self.gate);
        let Some(_guard) = gate.try_enter() else {
            return 0;
        };
        let baseline = heap.managed_refcnt();
        self.replicated.retain(|owner, _| heap.is_alive(*owner));

        // Native code took a new reference since the commit: the linkage is
        // strong again and the native collector must see the stub.
        let strengthened: Vec<ObjRef> = self
            .weak
            .iter()
            .copied()
            .filter(|stub| !heap.is_weakly_linked(*stub))
            .collect();
        for stub in strengthened {
            self.weak.remove(&stub);
            heap.track(stub);
        }

        let mut work: Vec<ObjRef> = self.roots.keys().copied().collect();
        work.extend(self.objects.iter().copied().filter(|stub| {
            !self.weak.contains(stub) && heap.refcnt(*stub).is_some_and(|rc| rc > baseline)
        }));

        let mut live = HashSet::new();
        while let Some(obj) = work.pop() {
            if !live.insert(obj) {
                continue;
            }
            if self.objects.contains(&obj) {
                if let Some(stub) = heap.get::<ManagedStub>(obj) {
                    work.extend_from_slice(&stub.refs);
                }
            } else if let Some(nodes) = self.replicated.get(&obj) {
                work.extend_from_slice(nodes);
            }
        }

        let dead: Vec<ObjRef> = self
            .objects
            .iter()
            .copied()
            .filter(|stub| !live.contains(stub))
            .collect();

        for stub in &dead {
            self.objects.remove(stub);
            self.weak.remove(stub);
            self.replicated.remove(stub);
        }
        for stub in &dead {
            let refs = heap
                .get_mut::<ManagedStub>(*stub)
                .map(|s| std::mem::take(&mut s.refs))
                .unwrap_or_default();
            for r in refs {
                if !self.objects.contains(&r) {
                    self.unwrap_native(r);
                }
                heap.decref(r);
            }
        }
        for stub in &dead {
            heap.release_managed(*stub);
        }
        dead.len()
    }
}

impl ManagedRuntime for ManagedWorld {
    fn replicate_native_references(
        &mut self,
        owner: ObjRef,
        nodes: &[ObjRef],
    ) -> Result<(), UpcallError> {
        self.check("replicate_native_references")?;
        self.log.replicate += 1;
        self.replicated.insert(owner, nodes.to_vec());
        Ok(())
    }

    fn commit_weak(&mut self, nodes: &[ObjRef]) -> Result<(), UpcallError> {
        self.check("commit_weak")?;
        self.log.commit_weak += 1;
        self.log.weakened += nodes.len();
        self.weak.extend(nodes.iter().copied());
        Ok(())
    }

    fn is_referenced_from_managed(&mut self, obj: ObjRef) -> Result<bool, UpcallError> {
        self.check("is_referenced_from_managed")?;
        self.log.is_referenced += 1;
        Ok(self.wrapped.contains_key(&obj))
    }

    fn disable_reference_queue_polling(&mut self) -> bool {
        self.gate.try_acquire()
    }

    fn enable_reference_queue_polling(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Node;

    #[test]
    fn unrooted_managed_objects_die() {
        let mut heap = Heap::default();
        let mut world = ManagedWorld::new();
        let m = world.new_object(&mut heap);
        let kept = world.new_object(&mut heap);
        world.add_root(&mut heap, kept);

        assert_eq!(world.collect(&mut heap), 1);
        assert!(!heap.is_alive(m));
        assert!(heap.is_alive(kept));
        assert!(world.contains(kept));
    }

    #[test]
    fn native_owner_pins_strong_stub() {
        let mut heap = Heap::default();
        let mut world = ManagedWorld::new();
        let m = world.new_object(&mut heap);
        let n = heap.alloc(Node::default());
        Node::link(&mut heap, n, m);

        assert_eq!(world.collect(&mut heap), 0);
        assert_eq!(heap.refcnt(m), Some(11));

        world.commit_weak(&[m]).unwrap();
        heap.mark_weakly_linked(heap.resolve(m).unwrap());
        assert_eq!(world.collect(&mut heap), 1);
        assert_eq!(heap.refcnt(m), Some(1));
        assert!(!heap.is_managed(m));
    }

    #[test]
    fn native_incref_after_commit_restores_strong_linkage() {
        let mut heap = Heap::default();
        let mut world = ManagedWorld::new();
        let m = world.new_object(&mut heap);
        let n = heap.alloc(Node::default());
        Node::link(&mut heap, n, m);
        heap.untrack(m);
        world.commit_weak(&[m]).unwrap();
        heap.mark_weakly_linked(heap.resolve(m).unwrap());

        heap.incref(m);
        assert_eq!(world.collect(&mut heap), 0);
        assert!(!world.is_weak(m));
        assert!(heap.is_tracked(m));

        heap.decref(m);
        assert_eq!(world.collect(&mut heap), 0);
        assert!(world.contains(m));
    }

    #[test]
    fn dead_stub_releases_its_references() {
        let mut heap = Heap::default();
        let mut world = ManagedWorld::new();
        let m = world.new_object(&mut heap);
        let n = heap.alloc(Node::default());
        world.store_ref(&mut heap, m, n).unwrap();
        heap.decref(n);
        assert_eq!(world.is_referenced_from_managed(n), Ok(true));

        world.collect(&mut heap);
        assert!(!heap.is_alive(n));
        assert!(!heap.is_alive(m));
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn injected_failure_is_one_shot() {
        let mut world = ManagedWorld::new();
        let obj = ObjRef::new(1, 0);
        world.fail_next("commit_weak", "busy");
        assert!(matches!(
            world.commit_weak(&[obj]),
            Err(UpcallError::Rejected { request: "commit_weak", .. })
        ));
        assert_eq!(world.commit_weak(&[obj]), Ok(()));
    }

    #[test]
    fn collect_skips_while_gate_is_held() {
        let mut heap = Heap::default();
        let mut world = ManagedWorld::new();
        let m = world.new_object(&mut heap);
        assert!(world.disable_reference_queue_polling());
        assert_eq!(world.collect(&mut heap), 0);
        world.enable_reference_queue_polling();
        assert_eq!(world.collect(&mut heap), 1);
        assert!(!heap.is_alive(m));
    }
}
