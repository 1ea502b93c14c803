//! Collection metrics and statistics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Statistics from one collection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcMetrics {
    /// Generation that was collected.
    pub generation: usize,
    /// Wall time of the whole pass.
    pub duration: Duration,
    /// Time spent in bookkeeping and partitioning.
    pub partition_duration: Duration,
    /// Time spent sweeping weakrefs and running finalizers.
    pub finalize_duration: Duration,
    /// Time spent clearing garbage.
    pub delete_duration: Duration,
    /// Objects examined (size of the merged young list).
    pub objects_examined: usize,
    /// Objects reclaimed.
    pub objects_collected: usize,
    /// Objects found uncollectable.
    pub objects_uncollectable: usize,
    /// Managed stubs whose linkage was weakened.
    pub stubs_weakened: usize,
    /// Cycle records replicated into the managed runtime.
    pub records_replicated: usize,
    /// Whether the pass gave up early.
    pub aborted: bool,
    /// Passes run by this collector so far, this one included.
    pub total_collections: usize,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GcMetrics {
    /// All counters zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            generation: 0,
            duration: Duration::ZERO,
            partition_duration: Duration::ZERO,
            finalize_duration: Duration::ZERO,
            delete_duration: Duration::ZERO,
            objects_examined: 0,
            objects_collected: 0,
            objects_uncollectable: 0,
            stubs_weakened: 0,
            records_replicated: 0,
            aborted: false,
            total_collections: 0,
        }
    }
}

/// Accumulates the per-phase durations of one pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PhaseTimer {
    pub(crate) partition: Duration,
    pub(crate) finalize: Duration,
    pub(crate) delete: Duration,
    current_start: Option<Instant>,
}

impl PhaseTimer {
    pub(crate) const fn new() -> Self {
        Self {
            partition: Duration::ZERO,
            finalize: Duration::ZERO,
            delete: Duration::ZERO,
            current_start: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    pub(crate) fn end_partition(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.partition += start.elapsed();
        }
    }

    pub(crate) fn end_finalize(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.finalize += start.elapsed();
        }
    }

    pub(crate) fn end_delete(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.delete += start.elapsed();
        }
    }
}

/// Process-wide cumulative statistics, summed over every collector.
///
/// ```
/// use crossgc::global_metrics;
///
/// let metrics = global_metrics();
/// println!("passes so far: {}", metrics.total_collections());
/// ```
#[derive(Debug)]
pub struct GlobalMetrics {
    collections: AtomicUsize,
    aborted: AtomicUsize,
    collected: AtomicUsize,
    uncollectable: AtomicUsize,
    weakened: AtomicUsize,
    pause_ns: AtomicU64,
}

impl Default for GlobalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalMetrics {
    /// All counters zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            collections: AtomicUsize::new(0),
            aborted: AtomicUsize::new(0),
            collected: AtomicUsize::new(0),
            uncollectable: AtomicUsize::new(0),
            weakened: AtomicUsize::new(0),
            pause_ns: AtomicU64::new(0),
        }
    }

    /// Passes run, aborted ones included.
    #[inline]
    #[must_use]
    pub fn total_collections(&self) -> usize {
        self.collections.load(Ordering::Relaxed)
    }

    /// Passes that gave up early.
    #[inline]
    #[must_use]
    pub fn total_aborted(&self) -> usize {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Objects reclaimed.
    #[inline]
    #[must_use]
    pub fn total_collected(&self) -> usize {
        self.collected.load(Ordering::Relaxed)
    }

    /// Objects found uncollectable.
    #[inline]
    #[must_use]
    pub fn total_uncollectable(&self) -> usize {
        self.uncollectable.load(Ordering::Relaxed)
    }

    /// Managed stubs weakened.
    #[inline]
    #[must_use]
    pub fn total_weakened(&self) -> usize {
        self.weakened.load(Ordering::Relaxed)
    }

    /// Summed pass duration in nanoseconds.
    #[inline]
    #[must_use]
    pub fn total_pause_ns(&self) -> u64 {
        self.pause_ns.load(Ordering::Relaxed)
    }

    pub(crate) fn record(&self, metrics: &GcMetrics) {
        self.collections.fetch_add(1, Ordering::Relaxed);
        if metrics.aborted {
            self.aborted.fetch_add(1, Ordering::Relaxed);
        }
        self.collected
            .fetch_add(metrics.objects_collected, Ordering::Relaxed);
        self.uncollectable
            .fetch_add(metrics.objects_uncollectable, Ordering::Relaxed);
        self.weakened
            .fetch_add(metrics.stubs_weakened, Ordering::Relaxed);
        self.pause_ns.fetch_add(
            metrics.duration.as_nanos().try_into().unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }
}

static GLOBAL_METRICS: GlobalMetrics = GlobalMetrics::new();

/// The process-wide cumulative metrics.
#[must_use]
pub fn global_metrics() -> &'static GlobalMetrics {
    &GLOBAL_METRICS
}
