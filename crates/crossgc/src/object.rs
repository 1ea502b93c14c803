//! Object handles and the object protocol consumed by the collector.
//!
//! Every tracked object is addressed by an [`ObjRef`]: an index into the heap
//! arena plus a stamp that changes whenever the slot is reused, so a handle
//! to a freed object can be detected instead of silently aliasing a new one.

use std::any::Any;
use std::fmt;

use crate::error::ObjectError;
use crate::heap::Heap;
use crate::traverse::Traverse;

/// Handle to an object in the native heap.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef {
    pub(crate) index: u32,
    pub(crate) stamp: u32,
}

impl ObjRef {
    pub(crate) const fn new(index: u32, stamp: u32) -> Self {
        Self { index, stamp }
    }

    /// Arena slot index of this handle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({}#{})", self.index, self.stamp)
    }
}

/// Upcast helper so object bodies can be downcast to their concrete type.
pub trait AsAny: Any {
    /// View as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// View as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The "kind" of a tracked object.
///
/// `traverse` (from [`Traverse`]) must report every reference the object
/// owns: the collector uses it both to subtract internal references and, on
/// deallocation, to release them.
///
/// While one of these methods runs the object's body is checked out of the
/// heap, so `heap.get::<T>(me)` returns `None` for the object itself.
pub trait GcObject: Traverse + AsAny + Send {
    /// Type name used in diagnostics and unraisable reports.
    fn type_name(&self) -> &'static str;

    /// Drop every owned reference, breaking any cycle through this object.
    ///
    /// The default releases whatever [`Traverse::drain_refs`] hands back.
    ///
    /// # Errors
    ///
    /// An error is reported as unraisable; the collection continues.
    fn clear(&mut self, heap: &mut Heap) -> Result<(), ObjectError> {
        let mut refs = Vec::new();
        self.drain_refs(&mut refs);
        for r in refs {
            heap.decref(r);
        }
        Ok(())
    }

    /// Whether the object carries a legacy (pre-`finalize`) destructor.
    ///
    /// Such objects are never broken up by the collector; if they end up in
    /// cyclic trash they are reported as uncollectable.
    fn has_legacy_finalizer(&self) -> bool {
        false
    }

    /// Legacy destructor, run on the plain refcount deallocation path.
    ///
    /// # Errors
    ///
    /// An error is reported as unraisable.
    fn legacy_finalize(&mut self, me: ObjRef, heap: &mut Heap) -> Result<(), ObjectError> {
        let _ = (me, heap);
        Ok(())
    }

    /// Whether [`GcObject::finalize`] should be called at all.
    fn has_finalizer(&self) -> bool {
        false
    }

    /// Finalizer, called at most once per object.
    ///
    /// It may resurrect `me` (or anything else) by taking new references.
    ///
    /// # Errors
    ///
    /// An error is reported as unraisable.
    fn finalize(&mut self, me: ObjRef, heap: &mut Heap) -> Result<(), ObjectError> {
        let _ = (me, heap);
        Ok(())
    }
}

impl<'a> dyn GcObject + 'a {
    /// Downcast to a concrete object type.
    #[must_use]
    pub fn downcast_ref<T: GcObject>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Mutable downcast to a concrete object type.
    #[must_use]
    pub fn downcast_mut<T: GcObject>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Whether the body is a `T`.
    #[must_use]
    pub fn is<T: GcObject>(&self) -> bool {
        self.as_any().is::<T>()
    }
}
