//! The cyclic collector.
//!
//! A [`Collector`] owns the native [`Heap`] and the [`ManagedRuntime`] it
//! cooperates with. Each pass is a sequence of list manipulations over the
//! heap's generations:
//!
//! - `refs`: copy refcounts into `gc_refs` and subtract internal references,
//! - `partition`: split the young list into reachable and unreachable,
//! - `weak_candidates`: decide which managed stubs may be weakened,
//! - `finalize`: weakrefs, legacy finalizers, `finalize` and resurrection,
//! - `delete`: break the remaining cycles,
//! - `collect`: the driver and scheduling heuristics.

mod collect;
mod delete;
mod finalize;
mod partition;
mod refs;
mod weak_candidates;

use std::fmt;

use crate::config::{CollectorConfig, DebugFlags};
use crate::error::{AbortReason, CollectError};
use crate::heap::Heap;
use crate::list::ListId;
use crate::managed::{ManagedRuntime, NoManagedRuntime};
use crate::metrics::GcMetrics;
use crate::object::{GcObject, ObjRef};
use crate::NUM_GENERATIONS;

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The pass ran to completion.
    Completed,
    /// The pass gave up and restored every object to its generation.
    Aborted(AbortReason),
    /// Another pass was already running.
    Skipped,
}

/// Result of [`Collector::collect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectResult {
    /// Unreachable objects found and reclaimed (or saved, with
    /// [`DebugFlags::SAVEALL`]).
    pub collected: usize,
    /// Unreachable objects that could not be reclaimed.
    pub uncollectable: usize,
    /// How the pass ended.
    pub outcome: PassOutcome,
}

impl CollectResult {
    pub(crate) const fn completed(collected: usize, uncollectable: usize) -> Self {
        Self {
            collected,
            uncollectable,
            outcome: PassOutcome::Completed,
        }
    }

    pub(crate) const fn aborted(reason: AbortReason) -> Self {
        Self {
            collected: 0,
            uncollectable: 0,
            outcome: PassOutcome::Aborted(reason),
        }
    }

    pub(crate) const fn skipped() -> Self {
        Self {
            collected: 0,
            uncollectable: 0,
            outcome: PassOutcome::Skipped,
        }
    }

    /// `collected + uncollectable`.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.collected + self.uncollectable
    }

    /// Whether the pass ran to completion.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.outcome == PassOutcome::Completed
    }
}

/// Cumulative per-generation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationStats {
    /// Completed passes over this generation.
    pub collections: usize,
    /// Objects collected by those passes.
    pub collected: usize,
    /// Objects found uncollectable by those passes.
    pub uncollectable: usize,
}

/// When a collection callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPhase {
    /// Before the pass.
    Start,
    /// After the pass.
    Stop,
}

/// Details handed to collection callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackInfo {
    /// Generation being collected.
    pub generation: usize,
    /// Objects collected; zero at [`CallbackPhase::Start`].
    pub collected: usize,
    /// Objects found uncollectable; zero at [`CallbackPhase::Start`].
    pub uncollectable: usize,
}

/// Handle returned by [`Collector::add_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type Callback = Box<dyn FnMut(CallbackPhase, &CallbackInfo) + Send>;

#[derive(Debug, Clone, Copy, Default)]
struct LongLived {
    /// Objects in the oldest generation after its last full pass.
    total: usize,
    /// Objects promoted into the oldest generation since then.
    pending: usize,
}

/// Generational cycle collector over a native heap.
pub struct Collector<R: ManagedRuntime = NoManagedRuntime> {
    heap: Heap,
    runtime: R,
    config: CollectorConfig,
    collecting: bool,
    long_lived: LongLived,
    stats: [GenerationStats; NUM_GENERATIONS],
    callbacks: Vec<(CallbackId, Callback)>,
    next_callback: u64,
    garbage: Vec<ObjRef>,
    consecutive_aborts: usize,
    total_collections: usize,
    last_metrics: GcMetrics,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new(NoManagedRuntime, CollectorConfig::default())
    }
}

impl Collector {
    /// A collector for a purely native heap.
    #[must_use]
    pub fn with_config(config: CollectorConfig) -> Self {
        Self::new(NoManagedRuntime, config)
    }
}

impl<R: ManagedRuntime> fmt::Debug for Collector<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("heap", &self.heap)
            .field("config", &self.config)
            .field("collecting", &self.collecting)
            .field("stats", &self.stats)
            .field("garbage", &self.garbage.len())
            .finish_non_exhaustive()
    }
}

impl<R: ManagedRuntime> Collector<R> {
    /// Create a collector with an empty heap.
    #[must_use]
    pub fn new(runtime: R, config: CollectorConfig) -> Self {
        Self {
            heap: Heap::new(&config),
            runtime,
            config,
            collecting: false,
            long_lived: LongLived::default(),
            stats: [GenerationStats::default(); NUM_GENERATIONS],
            callbacks: Vec::new(),
            next_callback: 0,
            garbage: Vec::new(),
            consecutive_aborts: 0,
            total_collections: 0,
            last_metrics: GcMetrics::new(),
        }
    }

    /// The heap.
    #[must_use]
    pub const fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The heap, mutably.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// The managed runtime.
    #[must_use]
    pub const fn runtime(&self) -> &R {
        &self.runtime
    }

    /// The managed runtime, mutably.
    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    /// Heap and runtime at once, for runtimes that mutate the heap.
    pub fn parts_mut(&mut self) -> (&mut Heap, &mut R) {
        (&mut self.heap, &mut self.runtime)
    }

    /// The configuration the collector was built with.
    #[must_use]
    pub const fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Allocate a tracked object, then run a scheduled collection if one is
    /// due.
    pub fn alloc<T: GcObject>(&mut self, body: T) -> ObjRef {
        let obj = self.heap.alloc(body);
        self.maybe_collect();
        obj
    }

    // ------------------------------------------------------------------
    // Switches and thresholds
    // ------------------------------------------------------------------

    /// Turn automatic collection on.
    pub fn enable(&mut self) {
        self.heap.enabled = true;
    }

    /// Turn automatic collection off. Explicit passes still run.
    pub fn disable(&mut self) {
        self.heap.enabled = false;
        self.heap.gc_scheduled = false;
    }

    /// Whether automatic collection is on.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.heap.enabled
    }

    /// Whether a pass is running.
    #[must_use]
    pub const fn is_collecting(&self) -> bool {
        self.collecting
    }

    /// Current debug flags.
    #[must_use]
    pub const fn debug_flags(&self) -> DebugFlags {
        self.config.debug
    }

    /// Replace the debug flags.
    pub fn set_debug(&mut self, flags: DebugFlags) {
        self.config.debug = flags;
    }

    /// Per-generation thresholds.
    #[must_use]
    pub fn get_threshold(&self) -> [usize; NUM_GENERATIONS] {
        self.heap.generations.map(|generation| generation.threshold)
    }

    /// Set the threshold of one generation.
    ///
    /// # Errors
    ///
    /// Fails if `generation` does not exist.
    pub fn set_threshold(&mut self, generation: usize, threshold: usize) -> Result<(), CollectError> {
        let slot = self
            .heap
            .generations
            .get_mut(generation)
            .ok_or(CollectError::InvalidGeneration(generation))?;
        slot.threshold = threshold;
        self.config.thresholds[generation] = threshold;
        Ok(())
    }

    /// Per-generation allocation counters.
    #[must_use]
    pub fn get_count(&self) -> [usize; NUM_GENERATIONS] {
        self.heap.generations.map(|generation| generation.count)
    }

    /// Cumulative per-generation statistics.
    #[must_use]
    pub const fn get_stats(&self) -> [GenerationStats; NUM_GENERATIONS] {
        self.stats
    }

    /// Metrics of the most recent pass.
    #[must_use]
    pub const fn last_metrics(&self) -> GcMetrics {
        self.last_metrics
    }

    /// Passes aborted in a row since the last completed one.
    #[must_use]
    pub const fn consecutive_aborts(&self) -> usize {
        self.consecutive_aborts
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    /// Register a callback run before and after every pass started through
    /// [`Collector::collect`] or automatic scheduling.
    pub fn add_callback(
        &mut self,
        callback: impl FnMut(CallbackPhase, &CallbackInfo) + Send + 'static,
    ) -> CallbackId {
        let id = CallbackId(self.next_callback);
        self.next_callback += 1;
        self.callbacks.push((id, Box::new(callback)));
        id
    }

    /// Unregister a callback. Returns `false` if it was not registered.
    pub fn remove_callback(&mut self, id: CallbackId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(registered, _)| *registered != id);
        self.callbacks.len() != before
    }

    fn invoke_callbacks(&mut self, phase: CallbackPhase, info: &CallbackInfo) {
        for (_, callback) in &mut self.callbacks {
            callback(phase, info);
        }
    }

    // ------------------------------------------------------------------
    // Garbage
    // ------------------------------------------------------------------

    /// Objects kept alive because they were uncollectable, or because
    /// [`DebugFlags::SAVEALL`] was set. Each entry owns one reference.
    #[must_use]
    pub fn garbage(&self) -> &[ObjRef] {
        &self.garbage
    }

    /// Take the garbage list. The caller becomes responsible for one
    /// reference per entry.
    pub fn take_garbage(&mut self) -> Vec<ObjRef> {
        std::mem::take(&mut self.garbage)
    }

    // ------------------------------------------------------------------
    // Permanent generation
    // ------------------------------------------------------------------

    /// Move every tracked object into the permanent generation, which no
    /// pass examines.
    pub fn freeze(&mut self) {
        for generation in 0..NUM_GENERATIONS {
            self.heap
                .list_merge(ListId::Generation(generation), ListId::Permanent);
        }
        self.heap.generations[0].count = 0;
    }

    /// Move the permanent generation back into the oldest generation.
    pub fn unfreeze(&mut self) {
        self.heap
            .list_merge(ListId::Permanent, ListId::Generation(NUM_GENERATIONS - 1));
    }

    /// Number of objects in the permanent generation.
    #[must_use]
    pub fn get_freeze_count(&self) -> usize {
        self.heap.list_len(ListId::Permanent)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Objects tracked in `generation`, or in every generation for `None`.
    ///
    /// The permanent generation is not included.
    ///
    /// # Errors
    ///
    /// Fails if `generation` does not exist.
    pub fn get_objects(&self, generation: Option<usize>) -> Result<Vec<ObjRef>, CollectError> {
        let range = match generation {
            Some(g) if g >= NUM_GENERATIONS => return Err(CollectError::InvalidGeneration(g)),
            Some(g) => g..g + 1,
            None => 0..NUM_GENERATIONS,
        };
        Ok(range
            .flat_map(|g| self.heap.list_members(ListId::Generation(g)))
            .map(|idx| self.heap.handle(idx))
            .collect())
    }

    /// The references `obj` reports through `traverse`.
    #[must_use]
    pub fn get_referents(&self, obj: ObjRef) -> Vec<ObjRef> {
        self.heap.referents(obj)
    }

    /// Whether the collector tracks `obj`.
    #[must_use]
    pub fn is_tracked(&self, obj: ObjRef) -> bool {
        self.heap.is_tracked(obj)
    }

    /// Whether the finalizer of `obj` already ran.
    #[must_use]
    pub fn is_finalized(&self, obj: ObjRef) -> bool {
        self.heap.is_finalized(obj)
    }
}

/// State shared by the phases of one pass.
///
/// Borrowing only what the phases touch lets the driver keep its own
/// bookkeeping next to it.
pub(crate) struct Pass<'c, R: ?Sized> {
    heap: &'c mut Heap,
    runtime: &'c mut R,
    garbage: &'c mut Vec<ObjRef>,
    cross_domain: bool,
    debug: DebugFlags,
    managed_refcnt: isize,
    replicated: usize,
    weakened: usize,
}

impl<'c, R: ManagedRuntime + ?Sized> Pass<'c, R> {
    pub(crate) fn new(
        heap: &'c mut Heap,
        runtime: &'c mut R,
        garbage: &'c mut Vec<ObjRef>,
        config: &CollectorConfig,
    ) -> Self {
        let managed_refcnt = heap.managed_refcnt();
        Self {
            heap,
            runtime,
            garbage,
            cross_domain: config.cross_domain,
            debug: config.debug,
            managed_refcnt,
            replicated: 0,
            weakened: 0,
        }
    }

    /// Live objects referenced by the object at `idx`.
    fn referent_slots(&self, idx: u32) -> Vec<(ObjRef, u32)> {
        let mut refs = Vec::new();
        self.heap.collect_referents(idx, &mut refs);
        refs.into_iter()
            .filter_map(|r| self.heap.resolve(r).map(|target| (r, target)))
            .collect()
    }

    fn debug_cycle(&self, msg: &str, idx: u32) {
        eprintln!(
            "gc: {msg} <{} {:?}>",
            self.heap.type_name_at(idx),
            self.heap.handle(idx)
        );
    }
}
