//! `Traverse` trait and its implementations for common types.
//!
//! Every object body reports the handles it owns through [`Traverse::traverse`]
//! and gives them up through [`Traverse::drain_refs`]. A drained handle is
//! replaced by [`ObjRef::DANGLING`] (or removed from its container) so it is
//! released exactly once, no matter how many times an object is cleared.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, LinkedList, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::rc::Rc;
use std::sync::Arc;

use crate::object::ObjRef;

/// Receives the handles reported by [`Traverse::traverse`].
pub trait Visitor {
    /// Called once per reported reference.
    fn visit(&mut self, obj: ObjRef);
}

impl<F: FnMut(ObjRef)> Visitor for F {
    #[inline]
    fn visit(&mut self, obj: ObjRef) {
        self(obj);
    }
}

/// A type whose owned object references can be enumerated and released.
///
/// Derive it with `#[derive(Traverse)]` for plain structs and enums.
///
/// # Contract
///
/// `traverse` must visit every strong reference the value owns, once per
/// reference held: the collector subtracts one count for each visit. Missing a
/// reference makes its target look externally reachable (a leak); reporting a
/// reference that is not owned makes the target look garbage.
pub trait Traverse {
    /// Visit all owned references.
    fn traverse(&self, visitor: &mut dyn Visitor);

    /// Move all owned references into `out`, leaving the value empty.
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>);
}

impl ObjRef {
    /// A handle that refers to nothing. Visitors never see it.
    pub const DANGLING: Self = Self::new(u32::MAX, u32::MAX);

    /// Whether this is [`ObjRef::DANGLING`].
    #[must_use]
    pub const fn is_dangling(self) -> bool {
        self.index == u32::MAX && self.stamp == u32::MAX
    }
}

impl Traverse for ObjRef {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        if !self.is_dangling() {
            visitor.visit(*self);
        }
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        let taken = std::mem::replace(self, Self::DANGLING);
        if !taken.is_dangling() {
            out.push(taken);
        }
    }
}

macro_rules! impl_traverse_for_leaf {
    ($($t:ty),* $(,)?) => {
        $(
            impl Traverse for $t {
                #[inline]
                fn traverse(&self, _visitor: &mut dyn Visitor) {}

                #[inline]
                fn drain_refs(&mut self, _out: &mut Vec<ObjRef>) {}
            }
        )*
    };
}

impl_traverse_for_leaf! {
    i8, i16, i32, i64, i128, isize,
    u8, u16, u32, u64, u128, usize,
    f32, f64,
    bool, char, (),
    String, str,
    std::time::Duration,
    std::time::Instant,
    std::path::PathBuf,
    std::ffi::OsString,
    std::ffi::CString,
    std::net::IpAddr,
    std::net::SocketAddr,
}

impl<T: ?Sized> Traverse for std::marker::PhantomData<T> {
    #[inline]
    fn traverse(&self, _visitor: &mut dyn Visitor) {}

    #[inline]
    fn drain_refs(&mut self, _out: &mut Vec<ObjRef>) {}
}

// Shared pointers can be visited but never give their contents up: another
// owner may still rely on them.
impl<T: Traverse + ?Sized> Traverse for Rc<T> {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        T::traverse(self, visitor);
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        if let Some(inner) = Self::get_mut(self) {
            inner.drain_refs(out);
        }
    }
}

impl<T: Traverse + ?Sized> Traverse for Arc<T> {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        T::traverse(self, visitor);
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        if let Some(inner) = Self::get_mut(self) {
            inner.drain_refs(out);
        }
    }
}

impl<T: Traverse + ?Sized> Traverse for Box<T> {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        T::traverse(self, visitor);
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        T::drain_refs(self, out);
    }
}

impl<T: Traverse + ?Sized> Traverse for RefCell<T> {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        // A value borrowed mutably is being edited by its owner, who is
        // responsible for keeping counts straight.
        if let Ok(inner) = self.try_borrow() {
            inner.traverse(visitor);
        }
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        self.get_mut().drain_refs(out);
    }
}

impl<T: Traverse> Traverse for Option<T> {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        if let Some(inner) = self {
            inner.traverse(visitor);
        }
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        if let Some(mut inner) = self.take() {
            inner.drain_refs(out);
        }
    }
}

impl<T: Traverse, E: Traverse> Traverse for Result<T, E> {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        match self {
            Ok(v) => v.traverse(visitor),
            Err(e) => e.traverse(visitor),
        }
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        match self {
            Ok(v) => v.drain_refs(out),
            Err(e) => e.drain_refs(out),
        }
    }
}

impl<T: Traverse> Traverse for [T] {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.traverse(visitor);
        }
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        for item in self {
            item.drain_refs(out);
        }
    }
}

impl<T: Traverse, const N: usize> Traverse for [T; N] {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        self.as_slice().traverse(visitor);
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        self.as_mut_slice().drain_refs(out);
    }
}

impl<T: Traverse> Traverse for Vec<T> {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        self.as_slice().traverse(visitor);
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        for mut item in self.drain(..) {
            item.drain_refs(out);
        }
    }
}

impl<T: Traverse> Traverse for VecDeque<T> {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.traverse(visitor);
        }
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        for mut item in self.drain(..) {
            item.drain_refs(out);
        }
    }
}

impl<T: Traverse> Traverse for LinkedList<T> {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.traverse(visitor);
        }
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        for mut item in std::mem::take(self) {
            item.drain_refs(out);
        }
    }
}

impl<K: Traverse, V: Traverse, S: BuildHasher> Traverse for HashMap<K, V, S> {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        for (k, v) in self {
            k.traverse(visitor);
            v.traverse(visitor);
        }
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        for (mut k, mut v) in self.drain() {
            k.drain_refs(out);
            v.drain_refs(out);
        }
    }
}

impl<T: Traverse + Eq + Hash, S: BuildHasher> Traverse for HashSet<T, S> {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.traverse(visitor);
        }
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        for mut item in self.drain() {
            item.drain_refs(out);
        }
    }
}

impl<K: Traverse, V: Traverse> Traverse for BTreeMap<K, V> {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        for (k, v) in self {
            k.traverse(visitor);
            v.traverse(visitor);
        }
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        for (mut k, mut v) in std::mem::take(self) {
            k.drain_refs(out);
            v.drain_refs(out);
        }
    }
}

impl<T: Traverse> Traverse for BTreeSet<T> {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.traverse(visitor);
        }
    }

    #[inline]
    fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        for mut item in std::mem::take(self) {
            item.drain_refs(out);
        }
    }
}

macro_rules! impl_traverse_for_tuples {
    () => {};
    ($first:ident $(, $rest:ident)*) => {
        impl<$first: Traverse $(, $rest: Traverse)*> Traverse for ($first, $($rest,)*) {
            #[inline]
            #[allow(non_snake_case)]
            fn traverse(&self, visitor: &mut dyn Visitor) {
                let ($first, $($rest,)*) = self;
                $first.traverse(visitor);
                $($rest.traverse(visitor);)*
            }

            #[inline]
            #[allow(non_snake_case)]
            fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
                let ($first, $($rest,)*) = self;
                $first.drain_refs(out);
                $($rest.drain_refs(out);)*
            }
        }
        impl_traverse_for_tuples!($($rest),*);
    };
}

impl_traverse_for_tuples!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(value: &dyn Traverse) -> Vec<ObjRef> {
        let mut seen = Vec::new();
        value.traverse(&mut |r| seen.push(r));
        seen
    }

    #[test]
    fn dangling_is_never_visited() {
        assert!(collect(&ObjRef::DANGLING).is_empty());
        assert_eq!(collect(&ObjRef::new(3, 1)), vec![ObjRef::new(3, 1)]);
    }

    #[test]
    fn drain_leaves_value_empty() {
        let a = ObjRef::new(1, 0);
        let b = ObjRef::new(2, 0);
        let mut value = (a, vec![Some(b), None]);

        let mut out = Vec::new();
        value.drain_refs(&mut out);
        assert_eq!(out, vec![a, b]);
        assert!(collect(&value).is_empty());

        out.clear();
        value.drain_refs(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn duplicate_references_are_visited_per_reference() {
        let a = ObjRef::new(7, 2);
        let value = [a, a, a];
        assert_eq!(collect(&value).len(), 3);
    }

    #[test]
    fn map_visits_keys_and_values() {
        let mut map = BTreeMap::new();
        map.insert(1u32, ObjRef::new(4, 0));
        map.insert(2u32, ObjRef::new(5, 0));
        assert_eq!(collect(&map).len(), 2);
    }
}
