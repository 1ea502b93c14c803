//! The collection driver and its scheduling heuristics.

use std::time::Instant;

use crossbeam::utils::Backoff;

use super::{CallbackInfo, CallbackPhase, CollectResult, Collector, LongLived, Pass};
use crate::config::DebugFlags;
use crate::error::{AbortReason, CollectError};
use crate::header::HeaderFlags;
use crate::list::ListId;
use crate::managed::ManagedRuntime;
use crate::metrics::{global_metrics, GcMetrics, PhaseTimer};
use crate::NUM_GENERATIONS;

#[cfg(feature = "tracing")]
use crate::tracing::internal::{
    log_phase_end, log_phase_start, next_gc_id, trace_gc_collection, trace_phase, GcPhase,
};

/// Counts produced by a completed pass.
#[derive(Debug, Clone, Copy)]
struct Tally {
    collected: usize,
    uncollectable: usize,
}

/// Transient lists a pass may leave populated when it gives up.
const WORKING_LISTS: [ListId; 4] = [
    ListId::Unreachable,
    ListId::WeakCandidates,
    ListId::StillUnreachable,
    ListId::Finalizers,
];

impl<R: ManagedRuntime> Collector<R> {
    /// Collect `generation` and every younger one.
    ///
    /// Collection callbacks run before and after the pass. A call made while
    /// a pass is running returns a [`PassOutcome::Skipped`] result.
    ///
    /// # Errors
    ///
    /// Fails only for a generation outside `0..NUM_GENERATIONS`. Protocol
    /// failures abort the pass and are reported in
    /// [`CollectResult::outcome`].
    ///
    /// [`PassOutcome::Skipped`]: super::PassOutcome::Skipped
    pub fn collect(&mut self, generation: usize) -> Result<CollectResult, CollectError> {
        if generation >= NUM_GENERATIONS {
            return Err(CollectError::InvalidGeneration(generation));
        }
        if self.collecting {
            return Ok(CollectResult::skipped());
        }
        self.collecting = true;
        let result = self.collect_with_callback(generation);
        self.collecting = false;
        Ok(result)
    }

    /// Full collection without callbacks, for interpreter shutdown.
    ///
    /// Returns the number of objects found unreachable.
    pub fn collect_no_fail(&mut self) -> usize {
        if self.collecting {
            return 0;
        }
        self.collecting = true;
        let result = self.collect_main(NUM_GENERATIONS - 1);
        self.collecting = false;
        result.total()
    }

    /// Run the collection scheduled by allocation, if any is due.
    ///
    /// Returns the number of objects found unreachable.
    pub fn maybe_collect(&mut self) -> usize {
        if !self.heap.gc_scheduled || !self.heap.enabled || self.collecting {
            return 0;
        }
        self.heap.gc_scheduled = false;
        self.collecting = true;
        let n = self.collect_generations();
        self.collecting = false;
        n
    }

    /// Collect the oldest generation whose count exceeds its threshold.
    ///
    /// The oldest generation is only collected once the objects promoted
    /// into it since its last pass exceed a quarter of those that survived
    /// it, which keeps full passes from turning quadratic on growing heaps.
    pub(crate) fn collect_generations(&mut self) -> usize {
        for generation in (0..NUM_GENERATIONS).rev() {
            let slot = self.heap.generations[generation];
            if slot.count <= slot.threshold {
                continue;
            }
            if generation == NUM_GENERATIONS - 1
                && self.long_lived.pending < self.long_lived.total / 4
            {
                continue;
            }
            return self.collect_with_callback(generation).total();
        }
        0
    }

    fn collect_with_callback(&mut self, generation: usize) -> CollectResult {
        self.invoke_callbacks(
            CallbackPhase::Start,
            &CallbackInfo {
                generation,
                collected: 0,
                uncollectable: 0,
            },
        );
        let result = self.collect_main(generation);
        self.invoke_callbacks(
            CallbackPhase::Stop,
            &CallbackInfo {
                generation,
                collected: result.collected,
                uncollectable: result.uncollectable,
            },
        );
        result
    }

    fn acquire_polling_token(&mut self) -> bool {
        let backoff = Backoff::new();
        for _ in 0..self.config.polling_attempts.max(1) {
            if self.runtime.disable_reference_queue_polling() {
                return true;
            }
            backoff.snooze();
        }
        false
    }

    fn collect_main(&mut self, generation: usize) -> CollectResult {
        #[cfg(feature = "tracing")]
        let gc_id = next_gc_id();
        #[cfg(feature = "tracing")]
        let _gc_span = trace_gc_collection(generation, gc_id);

        let start = Instant::now();
        if !self.acquire_polling_token() {
            return self.abort(generation, start, AbortReason::PollingContended);
        }

        let debug = self.config.debug;
        if debug.contains(DebugFlags::STATS) {
            eprintln!("gc: collecting generation {generation}...");
            self.show_stats_each_generation();
        }

        // Update the allocation counters, then fold the younger generations
        // into the one being collected.
        if generation + 1 < NUM_GENERATIONS {
            self.heap.generations[generation + 1].count += 1;
        }
        for slot in &mut self.heap.generations[..=generation] {
            slot.count = 0;
        }
        let young = ListId::Generation(generation);
        for younger in 0..generation {
            self.heap.list_merge(ListId::Generation(younger), young);
        }
        let old = if generation + 1 < NUM_GENERATIONS {
            ListId::Generation(generation + 1)
        } else {
            young
        };

        let examined = self.heap.list_len(young);
        let mut timer = PhaseTimer::new();
        let mut pass = Pass::new(
            &mut self.heap,
            &mut self.runtime,
            &mut self.garbage,
            &self.config,
        );
        let outcome = pass.run(generation, young, old, &mut self.long_lived, &mut timer);
        let (replicated, weakened) = (pass.replicated, pass.weakened);

        let tally = match outcome {
            Ok(tally) => tally,
            Err((reason, target)) => {
                pass.restore(target);
                self.runtime.enable_reference_queue_polling();
                return self.abort(generation, start, reason);
            }
        };

        if debug.contains(DebugFlags::STATS) {
            eprintln!(
                "gc: done, {} unreachable, {} uncollectable, {:.4}s elapsed",
                tally.collected + tally.uncollectable,
                tally.uncollectable,
                start.elapsed().as_secs_f64()
            );
        }

        let stats = &mut self.stats[generation];
        stats.collections += 1;
        stats.collected += tally.collected;
        stats.uncollectable += tally.uncollectable;
        self.consecutive_aborts = 0;

        self.record_metrics(GcMetrics {
            generation,
            duration: start.elapsed(),
            partition_duration: timer.partition,
            finalize_duration: timer.finalize,
            delete_duration: timer.delete,
            objects_examined: examined,
            objects_collected: tally.collected,
            objects_uncollectable: tally.uncollectable,
            stubs_weakened: weakened,
            records_replicated: replicated,
            aborted: false,
            total_collections: 0,
        });

        self.runtime.enable_reference_queue_polling();
        CollectResult::completed(tally.collected, tally.uncollectable)
    }

    fn abort(&mut self, generation: usize, start: Instant, reason: AbortReason) -> CollectResult {
        self.consecutive_aborts += 1;

        #[cfg(feature = "tracing")]
        tracing::warn!(
            generation,
            reason = %reason,
            consecutive = self.consecutive_aborts,
            "collection aborted"
        );

        self.record_metrics(GcMetrics {
            generation,
            duration: start.elapsed(),
            aborted: true,
            ..GcMetrics::new()
        });
        CollectResult::aborted(reason)
    }

    fn record_metrics(&mut self, mut metrics: GcMetrics) {
        self.total_collections += 1;
        metrics.total_collections = self.total_collections;
        self.last_metrics = metrics;
        global_metrics().record(&metrics);
    }

    fn show_stats_each_generation(&self) {
        let sizes: Vec<String> = (0..NUM_GENERATIONS)
            .map(|g| self.heap.list_len(ListId::Generation(g)).to_string())
            .collect();
        eprintln!("gc: objects in each generation: {}", sizes.join(" "));
        eprintln!(
            "gc: objects in permanent generation: {}",
            self.heap.list_len(ListId::Permanent)
        );
    }
}

impl<R: ManagedRuntime + ?Sized> Pass<'_, R> {
    /// Everything between the polling token and its release.
    ///
    /// On failure returns the reason and the list the working sets must be
    /// folded back into.
    fn run(
        &mut self,
        generation: usize,
        young: ListId,
        old: ListId,
        long_lived: &mut LongLived,
        timer: &mut PhaseTimer,
    ) -> Result<Tally, (AbortReason, ListId)> {
        timer.start();
        self.deduce_unreachable(young, ListId::Unreachable)
            .map_err(|reason| (reason, young))?;
        self.heap.validate_list(old, false, false);
        self.heap.validate_list(ListId::Unreachable, true, true);

        // Survivors move up a generation.
        if young == old {
            long_lived.pending = 0;
            long_lived.total = self.heap.list_len(young);
        } else {
            if generation == NUM_GENERATIONS - 2 {
                long_lived.pending += self.heap.list_len(young);
            }
            self.heap.list_merge(young, old);
        }
        timer.end_partition();

        timer.start();
        let mut collected = {
            #[cfg(feature = "tracing")]
            let _span = trace_phase(GcPhase::Finalize);
            #[cfg(feature = "tracing")]
            log_phase_start(GcPhase::Finalize, self.heap.list_len(ListId::Unreachable));

            self.move_legacy_finalizers();
            self.move_legacy_finalizer_reachable();
            self.heap.validate_list(ListId::Finalizers, false, false);
            self.heap.validate_list(ListId::Unreachable, true, false);

            if self.debug.contains(DebugFlags::COLLECTABLE) {
                for idx in self.heap.list_members(ListId::Unreachable) {
                    self.debug_cycle("collectable", idx);
                }
            }

            let freed_weakrefs = self.handle_weakrefs(old);
            self.heap.validate_list(old, false, false);
            self.heap.validate_list(ListId::Unreachable, true, false);

            self.finalize_garbage();
            self.handle_resurrected_objects(old)
                .map_err(|reason| (reason, old))?;

            #[cfg(feature = "tracing")]
            log_phase_end(
                GcPhase::Finalize,
                self.heap.list_len(ListId::StillUnreachable),
            );
            freed_weakrefs
        };
        timer.end_finalize();
        collected += self.heap.list_len(ListId::StillUnreachable);

        timer.start();
        {
            #[cfg(feature = "tracing")]
            let _span = trace_phase(GcPhase::Delete);
            #[cfg(feature = "tracing")]
            log_phase_start(GcPhase::Delete, self.heap.list_len(ListId::StillUnreachable));

            self.delete_garbage(old);

            #[cfg(feature = "tracing")]
            log_phase_end(GcPhase::Delete, collected);
        }
        timer.end_delete();

        let uncollectable = self.heap.list_len(ListId::Finalizers);
        if self.debug.contains(DebugFlags::UNCOLLECTABLE) {
            for idx in self.heap.list_members(ListId::Finalizers) {
                self.debug_cycle("uncollectable", idx);
            }
        }
        self.handle_legacy_finalizers(old);
        self.heap.validate_list(old, false, false);

        Ok(Tally {
            collected,
            uncollectable,
        })
    }

    /// Fold every working list back into `target` and clear the transient
    /// flags, leaving the heap as if the pass never ran.
    fn restore(&mut self, target: ListId) {
        for list in WORKING_LISTS {
            self.heap.list_merge(list, target);
        }
        let mut cur = self.heap.list_first(target);
        while let Some(idx) = cur {
            self.heap
                .header_mut(idx)
                .flags
                .remove(HeaderFlags::COLLECTING | HeaderFlags::UNREACHABLE);
            cur = self.heap.list_next(idx);
        }
        self.heap.validate_list(target, false, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorConfig;
    use crate::managed::NoManagedRuntime;
    use crate::testing::{Leaf, Node};

    #[test]
    fn allocation_triggers_young_collection() {
        let mut gc = Collector::new(
            NoManagedRuntime,
            CollectorConfig::default().with_thresholds([3, 10, 10]),
        );
        let a = gc.alloc(Node::default());
        Node::link(gc.heap_mut(), a, a);
        gc.heap_mut().decref(a);
        for _ in 0..3 {
            let leaf = gc.alloc(Leaf);
            gc.heap_mut().decref(leaf);
        }
        // Frees lower the count again; keep a few leaves alive to cross it.
        for _ in 0..4 {
            gc.alloc(Leaf);
        }
        assert!(!gc.heap().is_alive(a));
        assert_eq!(gc.get_stats()[0].collections, 1);
        assert_eq!(gc.get_stats()[0].collected, 1);
    }

    #[test]
    fn oldest_generation_waits_for_long_lived_growth() {
        let mut gc = Collector::default();
        gc.long_lived = LongLived {
            total: 100,
            pending: 10,
        };
        gc.heap.generations[2].count = 11;
        assert_eq!(gc.collect_generations(), 0);
        assert_eq!(gc.get_stats()[2].collections, 0);

        gc.long_lived.pending = 25;
        gc.collect_generations();
        assert_eq!(gc.get_stats()[2].collections, 1);
        assert_eq!(gc.long_lived.pending, 0);
    }

    #[test]
    fn middle_generation_feeds_long_lived_pending() {
        let mut gc = Collector::default();
        let kept = gc.heap_mut().alloc(Leaf);
        gc.collect(1).unwrap();
        assert_eq!(gc.long_lived.pending, 1);
        assert_eq!(gc.get_objects(Some(2)).unwrap(), vec![kept]);
        assert_eq!(gc.get_count(), [0, 0, 1]);
    }
}
