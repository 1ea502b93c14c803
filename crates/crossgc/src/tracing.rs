//! Collector tracing support.
//!
//! With the `tracing` feature enabled this module provides structured spans
//! and events for collection passes. Without it only the [`GcId`] type
//! remains.

#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    /// Phases of a collection pass.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GcPhase {
        /// Copy refcounts and subtract internal references.
        Bookkeeping,
        /// Split the young list into reachable and unreachable.
        Partition,
        /// Resolve weak candidates against the managed runtime.
        WeakCandidates,
        /// Sweep weakrefs, run finalizers, catch resurrection.
        Finalize,
        /// Clear the remaining garbage.
        Delete,
    }

    /// Identifier correlating every event of one pass.
    ///
    /// Monotonically increasing, starting at 1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next pass identifier.
    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Span covering a whole pass.
    pub fn trace_gc_collection(generation: usize, gc_id: GcId) -> span::EnteredSpan {
        span!(
            Level::DEBUG,
            "gc_collect",
            generation = generation,
            gc_id = gc_id.0
        )
        .entered()
    }

    /// Span covering one phase.
    pub fn trace_phase(phase: GcPhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }

    /// Log the start of a phase with the size of the list it works on.
    pub fn log_phase_start(phase: GcPhase, objects: usize) {
        tracing::debug!(phase = ?phase, objects, "phase_start");
    }

    /// Log the end of a phase with the number of objects it moved or freed.
    pub fn log_phase_end(phase: GcPhase, objects: usize) {
        tracing::debug!(phase = ?phase, objects, "phase_end");
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    /// Stub function when tracing is disabled.
    pub const fn next_gc_id() -> GcId {
        GcId(0)
    }
}

pub use internal::GcId;
