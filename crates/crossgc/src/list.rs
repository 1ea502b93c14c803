//! Arena-index doubly linked lists threading through object headers.
//!
//! Every tracked object sits in exactly one list. Generations and the
//! permanent generation persist between passes; the other lists are working
//! sets that are empty whenever no pass is running.

use crate::heap::Heap;
use crate::NUM_GENERATIONS;

/// Identifies one of the heap's lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ListId {
    Generation(usize),
    Permanent,
    Unreachable,
    WeakCandidates,
    Finalizers,
    WeakrefCallbacks,
    Seen,
    StillUnreachable,
}

impl ListId {
    pub(crate) const COUNT: usize = NUM_GENERATIONS + 7;

    const fn slot(self) -> usize {
        match self {
            Self::Generation(g) => g,
            Self::Permanent => NUM_GENERATIONS,
            Self::Unreachable => NUM_GENERATIONS + 1,
            Self::WeakCandidates => NUM_GENERATIONS + 2,
            Self::Finalizers => NUM_GENERATIONS + 3,
            Self::WeakrefCallbacks => NUM_GENERATIONS + 4,
            Self::Seen => NUM_GENERATIONS + 5,
            Self::StillUnreachable => NUM_GENERATIONS + 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ListHead {
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl Heap {
    fn list_head(&self, list: ListId) -> &ListHead {
        &self.lists[list.slot()]
    }

    fn list_head_mut(&mut self, list: ListId) -> &mut ListHead {
        &mut self.lists[list.slot()]
    }

    #[inline]
    pub(crate) fn list_first(&self, list: ListId) -> Option<u32> {
        self.list_head(list).head
    }

    #[inline]
    pub(crate) fn list_next(&self, idx: u32) -> Option<u32> {
        self.header(idx).next
    }

    #[inline]
    pub(crate) fn list_len(&self, list: ListId) -> usize {
        self.list_head(list).len
    }

    #[inline]
    pub(crate) fn list_is_empty(&self, list: ListId) -> bool {
        self.list_head(list).head.is_none()
    }

    /// Snapshot of the members, in list order.
    pub(crate) fn list_members(&self, list: ListId) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.list_len(list));
        let mut cur = self.list_first(list);
        while let Some(idx) = cur {
            out.push(idx);
            cur = self.list_next(idx);
        }
        out
    }

    /// Link an untracked object at the tail of `list`.
    pub(crate) fn list_append(&mut self, idx: u32, list: ListId) {
        debug_assert!(
            !self.header(idx).is_tracked(),
            "object {idx} is already linked into {:?}",
            self.header(idx).owner
        );
        let tail = self.list_head(list).tail;
        {
            let header = self.header_mut(idx);
            header.prev = tail;
            header.next = None;
            header.owner = Some(list);
        }
        match tail {
            Some(t) => self.header_mut(t).next = Some(idx),
            None => self.list_head_mut(list).head = Some(idx),
        }
        let head = self.list_head_mut(list);
        head.tail = Some(idx);
        head.len += 1;
    }

    /// Remove an object from whatever list holds it. No-op when untracked.
    pub(crate) fn list_unlink(&mut self, idx: u32) {
        let (prev, next, owner) = {
            let header = self.header(idx);
            (header.prev, header.next, header.owner)
        };
        let Some(list) = owner else {
            return;
        };
        match prev {
            Some(p) => self.header_mut(p).next = next,
            None => self.list_head_mut(list).head = next,
        }
        match next {
            Some(n) => self.header_mut(n).prev = prev,
            None => self.list_head_mut(list).tail = prev,
        }
        self.list_head_mut(list).len -= 1;
        let header = self.header_mut(idx);
        header.prev = None;
        header.next = None;
        header.owner = None;
    }

    /// Unlink `idx` and append it to `to`.
    #[inline]
    pub(crate) fn list_move(&mut self, idx: u32, to: ListId) {
        self.list_unlink(idx);
        self.list_append(idx, to);
    }

    /// Append every member of `from` to `to`, leaving `from` empty.
    pub(crate) fn list_merge(&mut self, from: ListId, to: ListId) {
        if from == to {
            return;
        }
        let source = std::mem::take(self.list_head_mut(from));
        let Some(first) = source.head else {
            return;
        };

        let mut cur = Some(first);
        while let Some(idx) = cur {
            self.header_mut(idx).owner = Some(to);
            cur = self.header(idx).next;
        }

        let dest_tail = self.list_head(to).tail;
        self.header_mut(first).prev = dest_tail;
        match dest_tail {
            Some(t) => self.header_mut(t).next = Some(first),
            None => self.list_head_mut(to).head = Some(first),
        }
        let dest = self.list_head_mut(to);
        dest.tail = source.tail;
        dest.len += source.len;
    }

    /// Check links, ownership and transient flags of every member.
    ///
    /// `collecting` / `unreachable` give the expected state of the
    /// corresponding flags.
    #[cfg(debug_assertions)]
    pub(crate) fn validate_list(&self, list: ListId, collecting: bool, unreachable: bool) {
        let mut prev = None;
        let mut count = 0;
        let mut cur = self.list_first(list);
        while let Some(idx) = cur {
            let header = self.header(idx);
            assert_eq!(header.owner, Some(list), "object {idx} has wrong owner");
            assert_eq!(header.prev, prev, "object {idx} has a broken prev link");
            assert_eq!(
                header.is_collecting(),
                collecting,
                "object {idx} in {list:?}: unexpected COLLECTING"
            );
            assert_eq!(
                header.is_unreachable(),
                unreachable,
                "object {idx} in {list:?}: unexpected UNREACHABLE"
            );
            prev = Some(idx);
            count += 1;
            cur = header.next;
        }
        assert_eq!(self.list_head(list).tail, prev, "{list:?} tail is stale");
        assert_eq!(self.list_len(list), count, "{list:?} length is stale");
    }

    #[cfg(not(debug_assertions))]
    #[inline]
    pub(crate) const fn validate_list(&self, _list: ListId, _collecting: bool, _unreachable: bool) {}
}

#[cfg(test)]
mod tests {
    use super::ListId;
    use crate::heap::Heap;
    use crate::testing::Leaf;

    #[test]
    fn move_and_merge_keep_order() {
        let mut heap = Heap::default();
        let a = heap.alloc(Leaf);
        let b = heap.alloc(Leaf);
        let c = heap.alloc(Leaf);
        let young = ListId::Generation(0);

        heap.list_move(b.index, ListId::Unreachable);
        assert_eq!(heap.list_members(young), vec![a.index, c.index]);
        assert_eq!(heap.list_len(ListId::Unreachable), 1);

        heap.list_merge(ListId::Unreachable, young);
        assert_eq!(heap.list_members(young), vec![a.index, c.index, b.index]);
        assert!(heap.list_is_empty(ListId::Unreachable));
        heap.validate_list(young, false, false);
    }

    #[test]
    fn unlink_head_and_tail() {
        let mut heap = Heap::default();
        let a = heap.alloc(Leaf);
        let b = heap.alloc(Leaf);
        let young = ListId::Generation(0);

        heap.list_unlink(a.index);
        heap.list_unlink(b.index);
        assert!(heap.list_is_empty(young));
        assert_eq!(heap.list_len(young), 0);

        heap.list_append(b.index, young);
        heap.list_append(a.index, young);
        assert_eq!(heap.list_members(young), vec![b.index, a.index]);
        heap.validate_list(young, false, false);
    }
}
