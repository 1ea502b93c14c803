//! The native object heap: an arena of refcounted slots.
//!
//! Allocation and the plain reference-counting path live here; the cyclic
//! collector in [`crate::gc`] walks the lists threaded through the slots.
//!
//! Reaching a refcount of zero deallocates through a small trash queue, so
//! long chains are released iteratively. Outside of user callbacks a
//! `decref` to zero has fully released the object (and everything it alone
//! kept alive) by the time it returns.

use std::fmt;

use crate::config::{CollectorConfig, UnraisableHook};
use crate::error::ObjectError;
use crate::header::{GcHeader, HeaderFlags};
use crate::list::{ListHead, ListId};
use crate::object::{GcObject, ObjRef};
use crate::weakref::WeakRef;
use crate::NUM_GENERATIONS;

/// Report handed to the unraisable hook.
#[derive(Debug)]
pub struct Unraisable<'a> {
    /// Where the error surfaced, e.g. `"finalizer"` or `"clear"`.
    pub context: &'static str,
    /// Type name of the object whose code failed.
    pub type_name: &'static str,
    /// The object, if it is still alive.
    pub object: Option<ObjRef>,
    /// The error itself.
    pub error: &'a ObjectError,
}

/// Allocation counter and threshold of one generation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Generation {
    pub(crate) threshold: usize,
    pub(crate) count: usize,
}

pub(crate) struct Slot {
    stamp: u32,
    live: bool,
    refcnt: isize,
    pub(crate) header: GcHeader,
    immortal: bool,
    managed: bool,
    /// Allocated as a managed stub; stays set after the managed side lets go.
    stub: bool,
    /// Lowest refcount seen since the stub's linkage was made weak. A
    /// native reference taken on top of it makes the linkage strong again.
    weak_floor: Option<isize>,
    /// Weak references whose target is this object.
    pub(crate) weakrefs: Vec<ObjRef>,
    body: Option<Box<dyn GcObject>>,
    type_name: &'static str,
}

impl Slot {
    const fn vacant() -> Self {
        Self {
            stamp: 0,
            live: false,
            refcnt: 0,
            header: GcHeader {
                prev: None,
                next: None,
                owner: None,
                gc_refs: 0,
                flags: HeaderFlags::empty(),
            },
            immortal: false,
            managed: false,
            stub: false,
            weak_floor: None,
            weakrefs: Vec::new(),
            body: None,
            type_name: "<freed>",
        }
    }
}

/// Arena of native objects plus the collector's lists.
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    pub(crate) lists: [ListHead; ListId::COUNT],
    pub(crate) generations: [Generation; NUM_GENERATIONS],
    managed_refcnt: isize,
    pub(crate) enabled: bool,
    pub(crate) gc_scheduled: bool,
    unraisable_hook: Option<UnraisableHook>,
    trash: Vec<u32>,
    draining: bool,
    live: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(&CollectorConfig::default())
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("live", &self.live)
            .field("capacity", &self.slots.len())
            .field("generations", &self.generations)
            .field("enabled", &self.enabled)
            .field("gc_scheduled", &self.gc_scheduled)
            .finish_non_exhaustive()
    }
}

impl Heap {
    /// Create an empty heap using the thresholds and hooks of `config`.
    #[must_use]
    pub fn new(config: &CollectorConfig) -> Self {
        let mut generations = [Generation::default(); NUM_GENERATIONS];
        for (generation, threshold) in generations.iter_mut().zip(config.thresholds) {
            generation.threshold = threshold;
        }
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            lists: [ListHead::default(); ListId::COUNT],
            generations,
            managed_refcnt: config.managed_refcnt,
            enabled: true,
            gc_scheduled: false,
            unraisable_hook: config.unraisable_hook.clone(),
            trash: Vec::new(),
            draining: false,
            live: 0,
        }
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocate an object with refcount 1 and track it in generation 0.
    pub fn alloc<T: GcObject>(&mut self, body: T) -> ObjRef {
        let idx = self.insert(Box::new(body), 1, false);
        self.list_append(idx, ListId::Generation(0));
        self.note_allocation();
        self.handle(idx)
    }

    /// Allocate an object with refcount 1 that the collector does not see
    /// until [`Heap::track`] is called.
    pub fn alloc_untracked<T: GcObject>(&mut self, body: T) -> ObjRef {
        let idx = self.insert(Box::new(body), 1, false);
        self.note_allocation();
        self.handle(idx)
    }

    /// Allocate the native stub of a managed object.
    ///
    /// The stub starts at the managed baseline refcount, owned by the managed
    /// runtime, and is tracked in generation 0.
    pub fn alloc_managed<T: GcObject>(&mut self, body: T) -> ObjRef {
        let idx = self.insert(Box::new(body), self.managed_refcnt, true);
        self.list_append(idx, ListId::Generation(0));
        self.note_allocation();
        self.handle(idx)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn insert(&mut self, body: Box<dyn GcObject>, refcnt: isize, managed: bool) -> u32 {
        let type_name = body.type_name();
        let idx = if let Some(idx) = self.free.pop() {
            idx
        } else {
            assert!(
                self.slots.len() < u32::MAX as usize - 1,
                "native heap exhausted"
            );
            self.slots.push(Slot::vacant());
            (self.slots.len() - 1) as u32
        };
        let slot = &mut self.slots[idx as usize];
        debug_assert!(!slot.live);
        slot.live = true;
        slot.refcnt = refcnt;
        slot.header = GcHeader::default();
        slot.immortal = false;
        slot.managed = managed;
        slot.stub = managed;
        slot.weak_floor = None;
        slot.weakrefs.clear();
        slot.body = Some(body);
        slot.type_name = type_name;
        self.live += 1;
        idx
    }

    fn note_allocation(&mut self) {
        let young = &mut self.generations[0];
        young.count += 1;
        if self.enabled && young.threshold != 0 && young.count > young.threshold {
            self.gc_scheduled = true;
        }
    }

    // ------------------------------------------------------------------
    // Reference counting
    // ------------------------------------------------------------------

    /// Take a new strong reference.
    pub fn incref(&mut self, obj: ObjRef) {
        if let Some(idx) = self.resolve(obj) {
            let slot = self.slot_mut(idx);
            if !slot.immortal {
                slot.refcnt += 1;
                if slot.weak_floor.is_some_and(|floor| slot.refcnt > floor) {
                    slot.weak_floor = None;
                }
            }
        }
    }

    /// Drop a strong reference, deallocating the object at zero.
    ///
    /// Stale handles are ignored.
    pub fn decref(&mut self, obj: ObjRef) {
        let Some(idx) = self.resolve(obj) else {
            return;
        };
        let slot = self.slot_mut(idx);
        if slot.immortal {
            return;
        }
        debug_assert!(slot.refcnt > 0, "decref of {obj:?} below zero");
        slot.refcnt -= 1;
        if let Some(floor) = slot.weak_floor.as_mut() {
            *floor = (*floor).min(slot.refcnt);
        }
        if slot.refcnt == 0 {
            self.trash.push(idx);
            self.drain_trash();
        }
    }

    /// Give up the managed runtime's baseline ownership of a stub.
    ///
    /// Called by the managed side once the managed object died.
    pub fn release_managed(&mut self, obj: ObjRef) {
        let managed_refcnt = self.managed_refcnt;
        let Some(idx) = self.resolve(obj) else {
            return;
        };
        let slot = self.slot_mut(idx);
        if !slot.managed {
            return;
        }
        slot.managed = false;
        slot.weak_floor = None;
        debug_assert!(
            slot.refcnt >= managed_refcnt,
            "managed stub {obj:?} below its baseline"
        );
        slot.refcnt -= managed_refcnt;
        if slot.refcnt <= 0 {
            slot.refcnt = 0;
            self.trash.push(idx);
            self.drain_trash();
        }
    }

    /// Current refcount, or `None` for a freed object.
    #[must_use]
    pub fn refcnt(&self, obj: ObjRef) -> Option<isize> {
        self.resolve(obj).map(|idx| self.slot(idx).refcnt)
    }

    /// Exempt the object from reference counting and from collection.
    pub fn make_immortal(&mut self, obj: ObjRef) {
        if let Some(idx) = self.resolve(obj) {
            self.slot_mut(idx).immortal = true;
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Whether `obj` still refers to a live object.
    #[must_use]
    pub fn is_alive(&self, obj: ObjRef) -> bool {
        self.resolve(obj).is_some()
    }

    /// Whether the collector currently tracks `obj`.
    #[must_use]
    pub fn is_tracked(&self, obj: ObjRef) -> bool {
        self.resolve(obj)
            .is_some_and(|idx| self.header(idx).is_tracked())
    }

    /// Whether the object's finalizer already ran.
    #[must_use]
    pub fn is_finalized(&self, obj: ObjRef) -> bool {
        self.resolve(obj)
            .is_some_and(|idx| self.header(idx).is_finalized())
    }

    /// Whether `obj` is the stub of a managed object.
    #[must_use]
    pub fn is_managed(&self, obj: ObjRef) -> bool {
        self.resolve(obj).is_some_and(|idx| self.slot(idx).managed)
    }

    /// Whether the linkage of the managed stub `obj` is still weak.
    ///
    /// The collector records the stub's refcount when the managed runtime
    /// acknowledges `commit_weak`. Any native reference taken above that
    /// count, which always passes through [`Heap::incref`], means native
    /// code owns the stub again; the managed runtime must then treat its
    /// linkage as strong and [`Heap::track`] the stub.
    #[must_use]
    pub fn is_weakly_linked(&self, obj: ObjRef) -> bool {
        self.resolve(obj)
            .is_some_and(|idx| self.slot(idx).weak_floor.is_some())
    }

    /// Whether `obj` was made immortal.
    #[must_use]
    pub fn is_immortal(&self, obj: ObjRef) -> bool {
        self.resolve(obj).is_some_and(|idx| self.slot(idx).immortal)
    }

    /// The refcount baseline of managed stubs.
    #[must_use]
    pub const fn managed_refcnt(&self) -> isize {
        self.managed_refcnt
    }

    /// Number of live objects, tracked or not.
    #[must_use]
    pub const fn live_objects(&self) -> usize {
        self.live
    }

    /// Type name of a live object.
    #[must_use]
    pub fn type_name(&self, obj: ObjRef) -> Option<&'static str> {
        self.resolve(obj).map(|idx| self.slot(idx).type_name)
    }

    /// Borrow the body of `obj` as a `T`.
    ///
    /// `None` if the object is dead, of another type, or currently running
    /// one of its own hooks.
    #[must_use]
    pub fn get<T: GcObject>(&self, obj: ObjRef) -> Option<&T> {
        let idx = self.resolve(obj)?;
        self.slot(idx).body.as_deref()?.downcast_ref::<T>()
    }

    /// Mutably borrow the body of `obj` as a `T`.
    ///
    /// Callers that add or remove references must adjust counts themselves;
    /// [`Heap::with_mut`] gives access to the heap for that.
    #[must_use]
    pub fn get_mut<T: GcObject>(&mut self, obj: ObjRef) -> Option<&mut T> {
        let idx = self.resolve(obj)?;
        self.slot_mut(idx).body.as_deref_mut()?.downcast_mut::<T>()
    }

    /// Run `f` on the body of `obj` with the heap available.
    ///
    /// Returns `None` if `obj` is not a live `T`.
    pub fn with_mut<T: GcObject, R>(
        &mut self,
        obj: ObjRef,
        f: impl FnOnce(&mut T, &mut Self) -> R,
    ) -> Option<R> {
        let idx = self.resolve(obj)?;
        self.with_body(idx, |body, heap| {
            body.downcast_mut::<T>().map(|typed| f(typed, heap))
        })
        .flatten()
    }

    /// The references `obj` reports through `traverse`.
    #[must_use]
    pub fn referents(&self, obj: ObjRef) -> Vec<ObjRef> {
        let mut out = Vec::new();
        if let Some(idx) = self.resolve(obj) {
            self.collect_referents(idx, &mut out);
        }
        out
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Start tracking `obj` in generation 0. No-op if already tracked.
    pub fn track(&mut self, obj: ObjRef) {
        if let Some(idx) = self.resolve(obj) {
            if !self.header(idx).is_tracked() {
                self.list_append(idx, ListId::Generation(0));
            }
        }
    }

    /// Stop tracking `obj`. No-op if untracked.
    pub fn untrack(&mut self, obj: ObjRef) {
        if let Some(idx) = self.resolve(obj) {
            self.list_unlink(idx);
            self.header_mut(idx).clear_transient();
        }
    }

    // ------------------------------------------------------------------
    // Crate-internal slot access
    // ------------------------------------------------------------------

    pub(crate) fn resolve(&self, obj: ObjRef) -> Option<u32> {
        let slot = self.slots.get(obj.index())?;
        (slot.live && slot.stamp == obj.stamp).then_some(obj.index)
    }

    pub(crate) fn handle(&self, idx: u32) -> ObjRef {
        ObjRef::new(idx, self.slot(idx).stamp)
    }

    pub(crate) fn slot(&self, idx: u32) -> &Slot {
        &self.slots[idx as usize]
    }

    pub(crate) fn slot_mut(&mut self, idx: u32) -> &mut Slot {
        &mut self.slots[idx as usize]
    }

    #[inline]
    pub(crate) fn header(&self, idx: u32) -> &GcHeader {
        &self.slot(idx).header
    }

    #[inline]
    pub(crate) fn header_mut(&mut self, idx: u32) -> &mut GcHeader {
        &mut self.slot_mut(idx).header
    }

    #[inline]
    pub(crate) fn refcnt_at(&self, idx: u32) -> isize {
        self.slot(idx).refcnt
    }

    #[inline]
    pub(crate) fn is_managed_at(&self, idx: u32) -> bool {
        self.slot(idx).managed
    }

    #[inline]
    /// Remember the refcount of a stub whose linkage was just made weak.
    pub(crate) fn mark_weakly_linked(&mut self, idx: u32) {
        let slot = self.slot_mut(idx);
        slot.weak_floor = Some(slot.refcnt);
    }

    /// A stub whose managed object already died.
    pub(crate) fn is_released_stub_at(&self, idx: u32) -> bool {
        let slot = self.slot(idx);
        slot.stub && !slot.managed
    }

    pub(crate) fn is_immortal_at(&self, idx: u32) -> bool {
        self.slot(idx).immortal
    }

    #[inline]
    pub(crate) fn type_name_at(&self, idx: u32) -> &'static str {
        self.slot(idx).type_name
    }

    pub(crate) fn body(&self, idx: u32) -> Option<&dyn GcObject> {
        self.slot(idx).body.as_deref()
    }

    pub(crate) fn body_mut(&mut self, idx: u32) -> Option<&mut (dyn GcObject + 'static)> {
        self.slot_mut(idx).body.as_deref_mut()
    }

    /// Append the references reported by the object at `idx` to `out`.
    pub(crate) fn collect_referents(&self, idx: u32, out: &mut Vec<ObjRef>) {
        if let Some(body) = self.body(idx) {
            body.traverse(&mut |r: ObjRef| out.push(r));
        }
    }

    /// Check the body out of its slot and run `f` on it.
    ///
    /// The caller keeps the object alive for the duration (usually with an
    /// incref). Returns `None` if the body is already checked out.
    pub(crate) fn with_body<R>(
        &mut self,
        idx: u32,
        f: impl FnOnce(&mut dyn GcObject, &mut Self) -> R,
    ) -> Option<R> {
        let stamp = self.slot(idx).stamp;
        let mut body = self.slot_mut(idx).body.take()?;
        let result = f(&mut *body, self);
        let slot = self.slot_mut(idx);
        if slot.live && slot.stamp == stamp && slot.body.is_none() {
            slot.body = Some(body);
        } else {
            let mut orphaned = Vec::new();
            body.drain_refs(&mut orphaned);
            drop(body);
            for r in orphaned {
                self.decref(r);
            }
        }
        Some(result)
    }

    /// Hand an error from user code to the unraisable hook.
    pub(crate) fn report_unraisable(
        &self,
        context: &'static str,
        idx: u32,
        error: &ObjectError,
    ) {
        let type_name = self.type_name_at(idx);
        let object = self.slot(idx).live.then(|| self.handle(idx));

        #[cfg(feature = "tracing")]
        tracing::warn!(context, type_name, error = %error, "unraisable error");

        let report = Unraisable {
            context,
            type_name,
            object,
            error,
        };
        match &self.unraisable_hook {
            Some(hook) => hook(&report),
            None => eprintln!("Exception ignored in {context} of <{type_name}>: {error}"),
        }
    }

    // ------------------------------------------------------------------
    // Deallocation
    // ------------------------------------------------------------------

    fn drain_trash(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;
        while let Some(idx) = self.trash.pop() {
            self.dealloc(idx);
        }
        self.draining = false;
    }

    fn dealloc(&mut self, idx: u32) {
        let slot = self.slot(idx);
        if !slot.live || slot.refcnt != 0 {
            return;
        }
        let me = self.handle(idx);

        let wants_finalize = !self.header(idx).is_finalized()
            && self.body(idx).is_some_and(|body| body.has_finalizer());
        if wants_finalize {
            self.header_mut(idx).flags.insert(HeaderFlags::FINALIZED);
            if self.run_resurrectable(idx, "finalizer", |body, heap| body.finalize(me, heap)) {
                return;
            }
        }

        self.clear_weakrefs_on_dealloc(idx);

        if self.body(idx).is_some_and(|body| body.has_legacy_finalizer())
            && self.run_resurrectable(idx, "legacy finalizer", |body, heap| {
                body.legacy_finalize(me, heap)
            })
        {
            return;
        }

        // Cyclic trash released by another member's `clear` still gets its
        // own `clear` call.
        let header = self.header(idx);
        if header.owner == Some(ListId::StillUnreachable) && !header.is_cleared() {
            self.header_mut(idx).flags.insert(HeaderFlags::CLEARED);
            if self.run_resurrectable(idx, "clear", |body, heap| body.clear(heap)) {
                return;
            }
        }

        self.free_slot(idx);
    }

    /// Run a hook on an object whose refcount hit zero.
    ///
    /// Returns `true` if the hook resurrected the object.
    fn run_resurrectable(
        &mut self,
        idx: u32,
        context: &'static str,
        hook: impl FnOnce(&mut dyn GcObject, &mut Self) -> Result<(), ObjectError>,
    ) -> bool {
        self.slot_mut(idx).refcnt = 1;
        if let Some(Err(err)) = self.with_body(idx, hook) {
            self.report_unraisable(context, idx, &err);
        }
        let slot = self.slot_mut(idx);
        slot.refcnt -= 1;
        slot.refcnt > 0
    }

    fn clear_weakrefs_on_dealloc(&mut self, idx: u32) {
        let weakrefs = std::mem::take(&mut self.slot_mut(idx).weakrefs);
        let mut callbacks = Vec::new();
        for wr in weakrefs {
            if let Some(callback) = self.detach_weakref(wr) {
                callbacks.push((wr, callback));
            }
        }
        for (wr, callback) in callbacks {
            self.invoke_weakref_callback(wr, callback);
        }
    }

    fn free_slot(&mut self, idx: u32) {
        self.list_unlink(idx);
        let young = &mut self.generations[0];
        young.count = young.count.saturating_sub(1);

        let me = self.handle(idx);
        let slot = self.slot_mut(idx);
        let body = slot.body.take();
        debug_assert!(slot.weakrefs.is_empty());
        slot.live = false;
        slot.stamp = slot.stamp.wrapping_add(1);
        slot.refcnt = 0;
        slot.header = GcHeader::default();
        slot.immortal = false;
        slot.managed = false;
        slot.stub = false;
        slot.weak_floor = None;
        slot.type_name = "<freed>";
        self.free.push(idx);
        self.live -= 1;

        let Some(mut body) = body else {
            return;
        };
        if let Some(target) = body.downcast_mut::<WeakRef>().and_then(WeakRef::take_target) {
            self.forget_weakref(target, me);
        }
        let mut refs = Vec::new();
        body.drain_refs(&mut refs);
        drop(body);
        for r in refs {
            self.decref(r);
        }
    }
}
