//! Everything between finding garbage and breaking it up: legacy
//! finalizers, weak references, `finalize` hooks and resurrection.

use super::Pass;
use crate::config::DebugFlags;
use crate::error::AbortReason;
use crate::header::HeaderFlags;
use crate::list::ListId;
use crate::managed::ManagedRuntime;
use crate::weakref::WeakRef;

impl<R: ManagedRuntime + ?Sized> Pass<'_, R> {
    fn has_legacy_finalizer(&self, idx: u32) -> bool {
        self.heap
            .body(idx)
            .is_some_and(|body| body.has_legacy_finalizer())
    }

    /// Move unreachable objects with a legacy finalizer to the finalizer
    /// set. Clears `UNREACHABLE` on every unreachable object.
    pub(super) fn move_legacy_finalizers(&mut self) {
        let mut cur = self.heap.list_first(ListId::Unreachable);
        while let Some(idx) = cur {
            let next = self.heap.list_next(idx);
            debug_assert!(self.heap.header(idx).is_unreachable());
            self.heap
                .header_mut(idx)
                .flags
                .remove(HeaderFlags::UNREACHABLE);
            if self.has_legacy_finalizer(idx) {
                self.heap
                    .header_mut(idx)
                    .flags
                    .remove(HeaderFlags::COLLECTING);
                self.heap.list_move(idx, ListId::Finalizers);
            }
            cur = next;
        }
    }

    /// Pull everything reachable from the finalizer set into it.
    pub(super) fn move_legacy_finalizer_reachable(&mut self) {
        // The list grows while it is walked.
        let mut cur = self.heap.list_first(ListId::Finalizers);
        while let Some(idx) = cur {
            for (_, target) in self.referent_slots(idx) {
                if self.heap.header(target).is_collecting() {
                    self.heap.list_move(target, ListId::Finalizers);
                    self.heap
                        .header_mut(target)
                        .flags
                        .remove(HeaderFlags::COLLECTING);
                }
            }
            cur = self.heap.list_next(idx);
        }
    }

    /// Clear weak references to and from unreachable objects, then run the
    /// callbacks of those that survive the pass.
    ///
    /// Returns the number of weak references freed by their callback's
    /// release.
    pub(super) fn handle_weakrefs(&mut self, old: ListId) -> usize {
        let mut pending = Vec::new();

        let mut cur = self.heap.list_first(ListId::Unreachable);
        while let Some(idx) = cur {
            let next = self.heap.list_next(idx);

            // A dying weakref must not fire for its own referent.
            if self.heap.body(idx).is_some_and(|body| body.is::<WeakRef>()) {
                self.heap.clear_weakref_at(idx);
            }

            for wr in self.heap.take_weakrefs(idx) {
                let callback = self.heap.detach_weakref(wr);
                let Some(wr_idx) = self.heap.resolve(wr) else {
                    continue;
                };
                let Some(callback) = callback else {
                    continue;
                };
                if self.heap.header(wr_idx).is_collecting() {
                    // The weakref is garbage itself; its callback never runs.
                    continue;
                }
                self.heap.incref(wr);
                if self.heap.header(wr_idx).is_tracked() {
                    self.heap.list_move(wr_idx, ListId::WeakrefCallbacks);
                }
                pending.push((wr, callback));
            }
            cur = next;
        }

        // Every reference into the garbage is cleared; callbacks cannot see
        // a half-dead object through a weakref any more.
        let mut freed = 0;
        for (wr, callback) in pending {
            self.heap.invoke_weakref_callback(wr, callback);
            self.heap.decref(wr);
            match self.heap.resolve(wr) {
                Some(wr_idx)
                    if self.heap.header(wr_idx).owner == Some(ListId::WeakrefCallbacks) =>
                {
                    self.heap.list_move(wr_idx, old);
                }
                Some(_) => {}
                None => freed += 1,
            }
        }
        debug_assert!(self.heap.list_is_empty(ListId::WeakrefCallbacks));
        freed
    }

    /// Call `finalize` once on every unreachable object that has one.
    pub(super) fn finalize_garbage(&mut self) {
        while let Some(idx) = self.heap.list_first(ListId::Unreachable) {
            self.heap.list_move(idx, ListId::Seen);
            let wants_finalize = !self.heap.header(idx).is_finalized()
                && self
                    .heap
                    .body(idx)
                    .is_some_and(|body| body.has_finalizer());
            if !wants_finalize {
                continue;
            }
            self.heap
                .header_mut(idx)
                .flags
                .insert(HeaderFlags::FINALIZED);
            let me = self.heap.handle(idx);
            self.heap.incref(me);
            if let Some(Err(err)) = self.heap.with_body(idx, |body, heap| body.finalize(me, heap)) {
                self.heap.report_unraisable("finalizer", idx, &err);
            }
            self.heap.decref(me);
        }
        self.heap.list_merge(ListId::Seen, ListId::Unreachable);
    }

    /// Re-partition the unreachable set after finalizers ran. Resurrected
    /// objects join `old`; the rest land in the still-unreachable set with
    /// only `COLLECTING` set.
    pub(super) fn handle_resurrected_objects(&mut self, old: ListId) -> Result<(), AbortReason> {
        let mut cur = self.heap.list_first(ListId::Unreachable);
        while let Some(idx) = cur {
            self.heap
                .header_mut(idx)
                .flags
                .remove(HeaderFlags::COLLECTING);
            cur = self.heap.list_next(idx);
        }

        self.deduce_unreachable(ListId::Unreachable, ListId::StillUnreachable)?;

        let mut cur = self.heap.list_first(ListId::StillUnreachable);
        while let Some(idx) = cur {
            self.heap
                .header_mut(idx)
                .flags
                .remove(HeaderFlags::UNREACHABLE);
            cur = self.heap.list_next(idx);
        }
        self.heap.list_merge(ListId::Unreachable, old);
        Ok(())
    }

    /// Keep uncollectable objects alive in `garbage`, then promote the
    /// finalizer set into `old`.
    pub(super) fn handle_legacy_finalizers(&mut self, old: ListId) {
        let save_all = self.debug.contains(DebugFlags::SAVEALL);
        let mut cur = self.heap.list_first(ListId::Finalizers);
        while let Some(idx) = cur {
            if save_all || self.has_legacy_finalizer(idx) {
                let obj = self.heap.handle(idx);
                self.heap.incref(obj);
                self.garbage.push(obj);
            }
            cur = self.heap.list_next(idx);
        }
        self.heap.list_merge(ListId::Finalizers, old);
    }
}
