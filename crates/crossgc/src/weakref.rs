//! Minimal weak reference object.
//!
//! A [`WeakRef`] is an ordinary tracked object that does not own its target.
//! When the target dies (through refcounting or through the collector) the
//! reference is cleared and its callback, if any, runs once with the heap and
//! the weak reference's own handle.

use std::fmt;

use crate::error::ObjectError;
use crate::heap::Heap;
use crate::object::{GcObject, ObjRef};
use crate::traverse::{Traverse, Visitor};

/// Callback run after the target of a weak reference died.
pub type WeakCallback = Box<dyn FnMut(&mut Heap, ObjRef) -> Result<(), ObjectError> + Send>;

/// A weak reference to another object.
pub struct WeakRef {
    target: Option<ObjRef>,
    callback: Option<WeakCallback>,
}

impl WeakRef {
    /// The referent, unless it has been cleared.
    #[must_use]
    pub const fn target(&self) -> Option<ObjRef> {
        self.target
    }

    /// Whether a callback is still pending.
    #[must_use]
    pub const fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub(crate) fn take_target(&mut self) -> Option<ObjRef> {
        self.target.take()
    }
}

impl fmt::Debug for WeakRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("target", &self.target)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl Traverse for WeakRef {
    fn traverse(&self, _visitor: &mut dyn Visitor) {}

    fn drain_refs(&mut self, _out: &mut Vec<ObjRef>) {}
}

impl GcObject for WeakRef {
    fn type_name(&self) -> &'static str {
        "weakref"
    }

    fn clear(&mut self, _heap: &mut Heap) -> Result<(), ObjectError> {
        self.callback = None;
        Ok(())
    }
}

impl Heap {
    /// Create a weak reference to `target`.
    ///
    /// Returns `None` if `target` is already dead.
    pub fn new_weakref(
        &mut self,
        target: ObjRef,
        callback: Option<WeakCallback>,
    ) -> Option<ObjRef> {
        let target_idx = self.resolve(target)?;
        let wr = self.alloc(WeakRef {
            target: Some(target),
            callback,
        });
        self.slot_weakrefs_mut(target_idx).push(wr);
        Some(wr)
    }

    /// The live referent of the weak reference `wr`.
    #[must_use]
    pub fn weakref_target(&self, wr: ObjRef) -> Option<ObjRef> {
        self.get::<WeakRef>(wr)?
            .target
            .filter(|target| self.is_alive(*target))
    }

    /// Number of weak references currently pointing at `obj`.
    #[must_use]
    pub fn weakref_count(&self, obj: ObjRef) -> usize {
        self.resolve(obj)
            .map_or(0, |idx| self.slot_weakrefs(idx).len())
    }

    fn slot_weakrefs(&self, idx: u32) -> &Vec<ObjRef> {
        &self.slot(idx).weakrefs
    }

    fn slot_weakrefs_mut(&mut self, idx: u32) -> &mut Vec<ObjRef> {
        &mut self.slot_mut(idx).weakrefs
    }

    /// Detach every weak reference pointing at the object at `idx`.
    pub(crate) fn take_weakrefs(&mut self, idx: u32) -> Vec<ObjRef> {
        std::mem::take(self.slot_weakrefs_mut(idx))
    }

    /// Clear `wr` and take its callback. Does not touch the target's list.
    pub(crate) fn detach_weakref(&mut self, wr: ObjRef) -> Option<WeakCallback> {
        let weak = self.get_mut::<WeakRef>(wr)?;
        weak.target = None;
        weak.callback.take()
    }

    /// Clear the weak reference object at `idx`, unlinking it from its target.
    pub(crate) fn clear_weakref_at(&mut self, idx: u32) {
        let me = self.handle(idx);
        let target = self
            .body_mut(idx)
            .and_then(|body| body.downcast_mut::<WeakRef>())
            .and_then(WeakRef::take_target);
        if let Some(target) = target {
            self.forget_weakref(target, me);
        }
    }

    /// Drop `wr` from the weak reference list of `target`.
    pub(crate) fn forget_weakref(&mut self, target: ObjRef, wr: ObjRef) {
        if let Some(target_idx) = self.resolve(target) {
            self.slot_weakrefs_mut(target_idx).retain(|r| *r != wr);
        }
    }

    /// Whether `wr` is a weak reference with a pending callback.
    pub(crate) fn weakref_has_callback(&self, wr: ObjRef) -> bool {
        self.get::<WeakRef>(wr).is_some_and(WeakRef::has_callback)
    }

    /// Call `callback` for `wr`, keeping `wr` alive meanwhile.
    pub(crate) fn invoke_weakref_callback(&mut self, wr: ObjRef, mut callback: WeakCallback) {
        let Some(idx) = self.resolve(wr) else {
            return;
        };
        self.incref(wr);
        if let Err(err) = callback(self, wr) {
            self.report_unraisable("weakref callback", idx, &err);
        }
        drop(callback);
        self.decref(wr);
    }
}
