//! Cross-domain weak-candidate resolution.
//!
//! A weak candidate is a managed stub whose native owners all sit inside
//! the generation being collected. Weakening its handle-table linkage lets
//! the managed collector decide its fate, which is only safe if no native
//! object that is strongly held from outside can still reach it.

use super::Pass;
use crate::error::{AbortReason, UpcallError};
use crate::header::HeaderFlags;
use crate::list::ListId;
use crate::managed::ManagedRuntime;
use crate::object::ObjRef;

impl<R: ManagedRuntime + ?Sized> Pass<'_, R> {
    /// Rescue every weak candidate reachable from a young object that is
    /// strongly held natively.
    ///
    /// Expects fresh `gc_refs` on `young`. Clears `COLLECTING` on every
    /// member, rescued candidates included.
    pub(super) fn move_weak_reachable(&mut self, young: ListId) -> Result<(), AbortReason> {
        let marker = self.managed_refcnt;
        let mut cur = self.heap.list_first(young);
        while let Some(idx) = cur {
            debug_assert!(self.heap.header(idx).is_collecting());
            let gc_refs = self.heap.header(idx).gc_refs;
            // At or below the marker the count alone cannot tell native
            // owners from the managed baseline; ask.
            if gc_refs > 0 && (gc_refs > marker || !self.is_referenced_from_managed(idx)?) {
                for (_, target) in self.referent_slots(idx) {
                    self.visit_weak_reachable(target, young);
                }
            }
            self.heap
                .header_mut(idx)
                .flags
                .remove(HeaderFlags::COLLECTING);
            cur = self.heap.list_next(idx);
        }
        Ok(())
    }

    fn is_referenced_from_managed(&mut self, idx: u32) -> Result<bool, UpcallError> {
        if self.heap.is_managed_at(idx) {
            return Ok(true);
        }
        let obj = self.heap.handle(idx);
        self.runtime.is_referenced_from_managed(obj)
    }

    fn visit_weak_reachable(&mut self, idx: u32, young: ListId) {
        if self.heap.is_immortal_at(idx) {
            return;
        }
        let header = self.heap.header(idx);
        if header.owner != Some(ListId::WeakCandidates) {
            return;
        }
        debug_assert!(header.is_unreachable());
        debug_assert!(
            self.heap.refcnt_at(idx) > self.managed_refcnt,
            "weak candidate {idx}: refcount is too small"
        );
        self.heap.list_move(idx, young);
        let marker = self.managed_refcnt;
        let header = self.heap.header_mut(idx);
        header.flags.remove(HeaderFlags::UNREACHABLE);
        // Traversed in turn when the cursor reaches it.
        header.flags.insert(HeaderFlags::COLLECTING);
        header.gc_refs = marker + 1;
    }

    /// Weaken every remaining candidate in one upcall, then untrack them.
    /// The heap remembers each one's refcount so that a later native owner
    /// shows up in [`Heap::is_weakly_linked`].
    ///
    /// [`Heap::is_weakly_linked`]: crate::Heap::is_weakly_linked
    ///
    /// Returns the number of stubs weakened.
    pub(super) fn commit_weak_candidates(&mut self) -> Result<usize, AbortReason> {
        if self.heap.list_is_empty(ListId::WeakCandidates) {
            return Ok(0);
        }
        let members = self.heap.list_members(ListId::WeakCandidates);
        let nodes: Vec<ObjRef> = members.iter().map(|&idx| self.heap.handle(idx)).collect();
        self.runtime.commit_weak(&nodes)?;
        for idx in members {
            self.heap.list_unlink(idx);
            self.heap.header_mut(idx).clear_transient();
            self.heap.mark_weakly_linked(idx);
        }
        self.weakened += nodes.len();
        Ok(nodes.len())
    }
}
