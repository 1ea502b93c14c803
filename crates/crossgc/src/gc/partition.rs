//! Reachability partitioning.
//!
//! Objects with a positive `gc_refs` are reachable; everything they reach is
//! reachable too. The walk assumes an object at zero is garbage, parks it on
//! the unreachable list, and splices it back if a later object reaches it.
//! Surviving objects end up in the young list in an order that makes the
//! next pass over them cheap.
//!
//! In cross-domain mode each traversal is recorded. A record naming a
//! managed stub is replicated into the managed runtime before any linkage
//! is weakened, and stubs held only by native cycles are set aside as weak
//! candidates.

use super::Pass;
use crate::error::AbortReason;
use crate::header::HeaderFlags;
use crate::list::ListId;
use crate::managed::ManagedRuntime;
use crate::object::ObjRef;

#[cfg(feature = "tracing")]
use crate::tracing::internal::{log_phase_end, log_phase_start, trace_phase, GcPhase};

impl<R: ManagedRuntime + ?Sized> Pass<'_, R> {
    /// Split `base` into its reachable members (left in `base`) and
    /// `unreachable`.
    ///
    /// With cross-domain mode on, weak candidates that survive
    /// `move_weak_reachable` are committed weak and untracked.
    ///
    /// # Errors
    ///
    /// Any failed upcall. The lists are left mid-partition; the caller must
    /// restore them.
    pub(super) fn deduce_unreachable(
        &mut self,
        base: ListId,
        unreachable: ListId,
    ) -> Result<(), AbortReason> {
        self.heap.validate_list(base, false, false);
        {
            #[cfg(feature = "tracing")]
            let _span = trace_phase(GcPhase::Bookkeeping);
            #[cfg(feature = "tracing")]
            log_phase_start(GcPhase::Bookkeeping, self.heap.list_len(base));

            self.update_refs(base);
            self.subtract_refs(base);
        }
        {
            #[cfg(feature = "tracing")]
            let _span = trace_phase(GcPhase::Partition);
            #[cfg(feature = "tracing")]
            log_phase_start(GcPhase::Partition, self.heap.list_len(base));

            self.move_unreachable(base, unreachable)?;

            #[cfg(feature = "tracing")]
            log_phase_end(GcPhase::Partition, self.heap.list_len(unreachable));
        }
        self.heap.validate_list(base, false, false);
        self.heap.validate_list(ListId::WeakCandidates, false, true);
        self.heap.validate_list(unreachable, true, true);

        if self.cross_domain {
            #[cfg(feature = "tracing")]
            let _span = trace_phase(GcPhase::WeakCandidates);
            #[cfg(feature = "tracing")]
            log_phase_start(
                GcPhase::WeakCandidates,
                self.heap.list_len(ListId::WeakCandidates),
            );

            // With no candidate there is nothing to rescue and no reason to
            // ask the managed side about anything.
            if !self.heap.list_is_empty(ListId::WeakCandidates) {
                // Replication may have changed refcounts.
                self.update_refs(base);
                self.subtract_refs(base);
                self.move_weak_reachable(base)?;
            }
            let weakened = self.commit_weak_candidates()?;

            #[cfg(feature = "tracing")]
            log_phase_end(GcPhase::WeakCandidates, weakened);
            #[cfg(not(feature = "tracing"))]
            let _ = weakened;
        }
        Ok(())
    }

    /// Move every member of `young` not reachable from outside it to
    /// `unreachable`.
    ///
    /// On return all members left in `young` have `COLLECTING` cleared and
    /// all members of `unreachable` have `COLLECTING | UNREACHABLE` set.
    pub(super) fn move_unreachable(
        &mut self,
        young: ListId,
        unreachable: ListId,
    ) -> Result<(), AbortReason> {
        let marker = self.managed_refcnt;
        let mut prev: Option<u32> = None;
        loop {
            // `visit_reachable` may append behind the cursor; never read
            // `next` before the traversal ran.
            let cur = match prev {
                Some(p) => self.heap.list_next(p),
                None => self.heap.list_first(young),
            };
            let Some(idx) = cur else {
                break;
            };

            let gc_refs = self.heap.header(idx).gc_refs;
            if gc_refs == 0 {
                // Maybe garbage; a later traversal may still rescue it.
                self.heap.list_move(idx, unreachable);
                self.heap
                    .header_mut(idx)
                    .flags
                    .insert(HeaderFlags::UNREACHABLE);
                continue;
            }
            debug_assert!(gc_refs > 0, "{:?}: refcount is too small", self.heap.handle(idx));

            let referents = self.referent_slots(idx);
            if self.cross_domain {
                let mut record = Vec::with_capacity(referents.len());
                for &(r, target) in &referents {
                    if self.heap.header(target).is_tracked() {
                        record.push(r);
                    }
                    self.visit_reachable(target, young);
                }
                self.replicate_record(idx, &record)?;
            } else {
                for &(_, target) in &referents {
                    self.visit_reachable(target, young);
                }
            }

            self.heap
                .header_mut(idx)
                .flags
                .remove(HeaderFlags::COLLECTING);

            let divert = self.cross_domain
                && gc_refs == marker
                && self.heap.is_managed_at(idx)
                && self.heap.refcnt_at(idx) > marker;
            if divert {
                // Only native cycles hold this stub. Not COLLECTING any more,
                // so `visit_reachable` leaves it alone.
                self.heap.list_move(idx, ListId::WeakCandidates);
                self.heap
                    .header_mut(idx)
                    .flags
                    .insert(HeaderFlags::UNREACHABLE);
            } else {
                prev = Some(idx);
            }
        }
        Ok(())
    }

    fn visit_reachable(&mut self, idx: u32, young: ListId) {
        let managed = self.heap.is_managed_at(idx);
        let marker = self.managed_refcnt;
        let header = self.heap.header(idx);
        if !header.is_collecting() {
            return;
        }
        let reset = if managed { marker + 1 } else { 1 };
        let gc_refs = header.gc_refs;

        if header.is_unreachable() {
            // Seen before and parked as garbage: bring it back behind the
            // cursor so it gets traversed.
            self.heap.list_move(idx, young);
            let header = self.heap.header_mut(idx);
            header.flags.remove(HeaderFlags::UNREACHABLE);
            header.gc_refs = reset;
        } else if gc_refs == 0 || (managed && gc_refs == marker) {
            // Not reached by the cursor yet.
            self.heap.header_mut(idx).gc_refs = reset;
        }
    }

    fn replicate_record(&mut self, owner: u32, record: &[ObjRef]) -> Result<(), AbortReason> {
        if !record.iter().any(|r| self.heap.is_managed(*r)) {
            return Ok(());
        }
        // A stub whose managed object already died cannot be replicated.
        let released = |r: &ObjRef| {
            self.heap
                .resolve(*r)
                .is_some_and(|idx| self.heap.is_released_stub_at(idx))
        };
        if record.iter().any(released) {
            return Ok(());
        }
        let owner = self.heap.handle(owner);
        self.runtime.replicate_native_references(owner, record)?;
        self.replicated += 1;
        Ok(())
    }
}
