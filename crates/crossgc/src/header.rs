//! Per-object collector metadata.

use bitflags::bitflags;

use crate::list::ListId;

bitflags! {
    /// State bits carried by every tracked object.
    ///
    /// `COLLECTING` and `UNREACHABLE` only live for the duration of a pass.
    /// `FINALIZED` is persistent: once set, [`GcObject::finalize`] is never
    /// called again for that object.
    ///
    /// [`GcObject::finalize`]: crate::GcObject::finalize
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct HeaderFlags: u8 {
        /// Member of the generation currently being collected.
        const COLLECTING = 1 << 0;
        /// Tentatively unreachable, or a weak candidate.
        const UNREACHABLE = 1 << 1;
        /// The finalizer already ran.
        const FINALIZED = 1 << 2;
        /// `clear` already ran on this doomed object during the current pass.
        const CLEARED = 1 << 3;
    }
}

/// List links plus the scratch count used while partitioning.
#[derive(Debug, Clone, Default)]
pub(crate) struct GcHeader {
    pub(crate) prev: Option<u32>,
    pub(crate) next: Option<u32>,
    /// List this object is linked into; `None` when untracked.
    pub(crate) owner: Option<ListId>,
    /// Copy of the refcount minus internal references.
    pub(crate) gc_refs: isize,
    pub(crate) flags: HeaderFlags,
}

impl GcHeader {
    #[inline]
    pub(crate) const fn is_tracked(&self) -> bool {
        self.owner.is_some()
    }

    #[inline]
    pub(crate) const fn is_collecting(&self) -> bool {
        self.flags.contains(HeaderFlags::COLLECTING)
    }

    #[inline]
    pub(crate) const fn is_unreachable(&self) -> bool {
        self.flags.contains(HeaderFlags::UNREACHABLE)
    }

    #[inline]
    pub(crate) const fn is_finalized(&self) -> bool {
        self.flags.contains(HeaderFlags::FINALIZED)
    }

    #[inline]
    pub(crate) const fn is_cleared(&self) -> bool {
        self.flags.contains(HeaderFlags::CLEARED)
    }

    /// Start a pass: copy the refcount and mark as collecting.
    #[inline]
    pub(crate) fn reset_refs(&mut self, refcnt: isize) {
        self.gc_refs = refcnt;
        self.flags.insert(HeaderFlags::COLLECTING);
    }

    #[inline]
    pub(crate) fn clear_transient(&mut self) {
        self.flags
            .remove(HeaderFlags::COLLECTING | HeaderFlags::UNREACHABLE);
    }
}
