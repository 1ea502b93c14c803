//! Sharing a collector between threads.
//!
//! [`GlobalLock`] serializes every access to a [`Collector`] and its heap
//! behind a `parking_lot` mutex, the way an interpreter lock would. A pass
//! holds the lock from start to finish; a collection requested while
//! another one runs returns immediately instead of queueing behind it.
//!
//! ```
//! use std::sync::Arc;
//! use crossgc::{Collector, GlobalLock};
//!
//! let gc = Arc::new(GlobalLock::new(Collector::default()));
//! let worker = {
//!     let gc = Arc::clone(&gc);
//!     std::thread::spawn(move || gc.collect(0).unwrap())
//! };
//! let result = worker.join().unwrap();
//! assert_eq!(result.collected, 0);
//! assert!(!gc.is_collecting());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::error::CollectError;
use crate::gc::{CollectResult, Collector};
use crate::managed::{ManagedRuntime, NoManagedRuntime};
use crate::NUM_GENERATIONS;

/// A collector behind a global lock.
#[derive(Debug)]
pub struct GlobalLock<R: ManagedRuntime = NoManagedRuntime> {
    collector: Mutex<Collector<R>>,
    collecting: AtomicBool,
}

/// Clears the `collecting` flag when the pass ends, even by panic.
struct CollectingGuard<'a>(&'a AtomicBool);

impl Drop for CollectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<R: ManagedRuntime> GlobalLock<R> {
    /// Wrap `collector`.
    pub fn new(collector: Collector<R>) -> Self {
        Self {
            collector: Mutex::new(collector),
            collecting: AtomicBool::new(false),
        }
    }

    /// Lock the collector for arbitrary work on the heap.
    pub fn lock(&self) -> MutexGuard<'_, Collector<R>> {
        self.collector.lock()
    }

    /// Lock the collector if nobody else holds it.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Collector<R>>> {
        self.collector.try_lock()
    }

    /// Whether a pass started through [`GlobalLock::collect`] is running.
    #[must_use]
    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::Acquire)
    }

    /// Run [`Collector::collect`] under the lock.
    ///
    /// Returns a skipped result at once if another thread is collecting.
    ///
    /// # Errors
    ///
    /// Fails for a generation outside `0..NUM_GENERATIONS`.
    pub fn collect(&self, generation: usize) -> Result<CollectResult, CollectError> {
        if generation >= NUM_GENERATIONS {
            return Err(CollectError::InvalidGeneration(generation));
        }
        if self
            .collecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(CollectResult::skipped());
        }
        let _guard = CollectingGuard(&self.collecting);
        self.collector.lock().collect(generation)
    }

    /// Take the collector back out.
    pub fn into_inner(self) -> Collector<R> {
        self.collector.into_inner()
    }
}
