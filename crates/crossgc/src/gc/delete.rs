//! Breaking up the garbage.

use super::Pass;
use crate::config::DebugFlags;
use crate::header::HeaderFlags;
use crate::list::ListId;
use crate::managed::ManagedRuntime;

impl<R: ManagedRuntime + ?Sized> Pass<'_, R> {
    /// Call `clear` once on every still-unreachable object until
    /// refcounting frees the lot. Members released by another member's
    /// `clear` are cleared on their way out of the heap. Objects that outlive
    /// their own `clear` move to `old`.
    ///
    /// With [`DebugFlags::SAVEALL`] nothing is cleared; every object is
    /// appended to `garbage` instead.
    pub(super) fn delete_garbage(&mut self, old: ListId) {
        let save_all = self.debug.contains(DebugFlags::SAVEALL);
        while let Some(idx) = self.heap.list_first(ListId::StillUnreachable) {
            let me = self.heap.handle(idx);
            debug_assert!(self.heap.refcnt_at(idx) > 0, "{me:?}: refcount is too small");

            self.heap.incref(me);
            if save_all {
                self.garbage.push(me);
            } else {
                if !self.heap.header(idx).is_cleared() {
                    self.heap
                        .header_mut(idx)
                        .flags
                        .insert(HeaderFlags::CLEARED);
                    if let Some(Err(err)) = self.heap.with_body(idx, |body, heap| body.clear(heap)) {
                        self.heap.report_unraisable("clear", idx, &err);
                    }
                }
                self.heap.decref(me);
            }

            if self.heap.list_first(ListId::StillUnreachable) == Some(idx) {
                // Still alive; it may die later.
                self.heap
                    .header_mut(idx)
                    .flags
                    .remove(HeaderFlags::COLLECTING | HeaderFlags::CLEARED);
                self.heap.list_move(idx, old);
            }
        }
    }
}
