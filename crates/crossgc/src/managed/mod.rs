//! Boundary to the managed (tracing) runtime.
//!
//! The collector talks to the managed side only through [`ManagedRuntime`].
//! Three implementations ship with the crate:
//!
//! - [`NoManagedRuntime`] for a purely native heap,
//! - [`ManagedWorld`], a small in-process managed heap used by tests and
//!   demos,
//! - [`ChannelRuntime`], which forwards every upcall as a blocking request to
//!   another thread.

mod channel;
mod world;

use std::sync::atomic::{AtomicBool, Ordering};

pub use channel::{serve, ChannelRuntime, ManagedRequest};
pub use world::{ManagedStub, ManagedWorld, UpcallLog};

use crate::error::UpcallError;
use crate::object::ObjRef;

/// Upcalls the collector makes into the managed runtime.
///
/// All calls are synchronous. Any error aborts the running pass without
/// committing anything.
pub trait ManagedRuntime {
    /// Record that `owner` natively references every object in `nodes`.
    ///
    /// Must be idempotent: the same owner may be replicated again by a later
    /// pass, replacing the previous record.
    ///
    /// # Errors
    ///
    /// Fails if the request cannot be delivered or is refused.
    fn replicate_native_references(
        &mut self,
        owner: ObjRef,
        nodes: &[ObjRef],
    ) -> Result<(), UpcallError>;

    /// Downgrade the managed linkage of every stub in `nodes` to weak.
    ///
    /// The collector untracks the stubs natively once this returns `Ok`.
    ///
    /// # Errors
    ///
    /// Fails if the request cannot be delivered or is refused.
    fn commit_weak(&mut self, nodes: &[ObjRef]) -> Result<(), UpcallError>;

    /// Whether managed code holds a reference to the native object `obj`.
    ///
    /// # Errors
    ///
    /// Fails if the request cannot be delivered or is refused.
    fn is_referenced_from_managed(&mut self, obj: ObjRef) -> Result<bool, UpcallError>;

    /// Try to take the reference-queue polling token.
    ///
    /// Returns `false` while the managed side is processing its reference
    /// queue.
    fn disable_reference_queue_polling(&mut self) -> bool;

    /// Give the polling token back.
    fn enable_reference_queue_polling(&mut self);
}

/// Runtime for heaps without managed objects. Every upcall succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoManagedRuntime;

impl ManagedRuntime for NoManagedRuntime {
    fn replicate_native_references(
        &mut self,
        _owner: ObjRef,
        _nodes: &[ObjRef],
    ) -> Result<(), UpcallError> {
        Ok(())
    }

    fn commit_weak(&mut self, _nodes: &[ObjRef]) -> Result<(), UpcallError> {
        Ok(())
    }

    fn is_referenced_from_managed(&mut self, _obj: ObjRef) -> Result<bool, UpcallError> {
        Ok(false)
    }

    fn disable_reference_queue_polling(&mut self) -> bool {
        true
    }

    fn enable_reference_queue_polling(&mut self) {}
}

/// Mutual exclusion between a native collection pass and the managed side's
/// reference-queue processing.
///
/// Shared (usually through an `Arc`) by both parties. Whoever holds it may
/// change the strength of handle-table links.
#[derive(Debug, Default)]
pub struct PollingGate {
    busy: AtomicBool,
}

impl PollingGate {
    /// Create a free gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    /// Take the gate if it is free.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release the gate.
    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Whether somebody holds the gate.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Take the gate for the lifetime of the returned guard.
    #[must_use]
    pub fn try_enter(&self) -> Option<PollingGuard<'_>> {
        self.try_acquire().then_some(PollingGuard { gate: self })
    }
}

/// Holds a [`PollingGate`] until dropped.
#[derive(Debug)]
pub struct PollingGuard<'a> {
    gate: &'a PollingGate,
}

impl Drop for PollingGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
