//! A generational cycle collector for reference-counted native heaps whose
//! objects may be co-owned by a managed, tracing runtime.
//!
//! Native objects live in a [`Heap`] and are reference counted. Counting
//! alone cannot free cycles; a [`Collector`] finds them by subtracting the
//! references objects hold on each other and reclaims whatever no outside
//! reference keeps alive.
//!
//! Some native objects are the stubs of managed objects. The managed runtime
//! holds a baseline of references on each stub
//! ([`CollectorConfig::managed_refcnt`]), and native references to a stub
//! keep its managed linkage strong. When a stub is held only by native
//! cycles, the collector replicates those native references into the
//! managed runtime and then asks it to weaken the stub's linkage, so the
//! managed collector can decide about the whole cycle.
//!
//! # Quick start
//!
//! ```
//! use crossgc::{Collector, GcObject, ObjRef, Traverse};
//!
//! #[derive(Default, Traverse)]
//! struct Node {
//!     next: Option<ObjRef>,
//! }
//!
//! impl GcObject for Node {
//!     fn type_name(&self) -> &'static str {
//!         "node"
//!     }
//! }
//!
//! let mut gc = Collector::default();
//! let heap = gc.heap_mut();
//! let a = heap.alloc(Node::default());
//! let b = heap.alloc(Node::default());
//!
//! // a -> b -> a, then drop the local references.
//! heap.incref(b);
//! heap.get_mut::<Node>(a).unwrap().next = Some(b);
//! heap.incref(a);
//! heap.get_mut::<Node>(b).unwrap().next = Some(a);
//! heap.decref(a);
//! heap.decref(b);
//!
//! let result = gc.collect(2).unwrap();
//! assert_eq!(result.collected, 2);
//! assert_eq!(gc.heap().live_objects(), 0);
//! ```
//!
//! # Cross-domain collection
//!
//! Enable [`CollectorConfig::cross_domain`] and hand the collector a
//! [`ManagedRuntime`]. [`ManagedWorld`] is an in-process reference runtime;
//! [`ChannelRuntime`] forwards each upcall to another thread.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod error;
mod gc;
mod header;
mod heap;
mod list;
mod metrics;
mod object;
mod sync;
mod traverse;
mod weakref;

pub mod managed;
pub mod tracing;

#[cfg(test)]
mod testing;

/// Number of collected generations. Generation 0 is the youngest.
pub const NUM_GENERATIONS: usize = 3;

pub use config::{
    CollectorConfig, DebugFlags, UnraisableHook, DEFAULT_MANAGED_REFCNT, DEFAULT_POLLING_ATTEMPTS,
    DEFAULT_THRESHOLDS, DEFAULT_UPCALL_TIMEOUT,
};
pub use error::{AbortReason, CollectError, ObjectError, UpcallError};
pub use gc::{
    CallbackId, CallbackInfo, CallbackPhase, CollectResult, Collector, GenerationStats,
    PassOutcome,
};
pub use heap::{Heap, Unraisable};
pub use managed::{
    ChannelRuntime, ManagedRequest, ManagedRuntime, ManagedStub, ManagedWorld, NoManagedRuntime,
    PollingGate, PollingGuard,
};
pub use metrics::{global_metrics, GcMetrics, GlobalMetrics};
pub use object::{AsAny, GcObject, ObjRef};
pub use sync::GlobalLock;
pub use traverse::{Traverse, Visitor};
pub use weakref::{WeakCallback, WeakRef};

// Re-export derive macro when feature is enabled
#[cfg(feature = "derive")]
pub use crossgc_derive::Traverse;
