//! Collector configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;

use crate::heap::Unraisable;
use crate::NUM_GENERATIONS;

/// Default allocation thresholds, youngest generation first.
pub const DEFAULT_THRESHOLDS: [usize; NUM_GENERATIONS] = [700, 10, 10];

/// Default refcount baseline carried by managed stubs.
pub const DEFAULT_MANAGED_REFCNT: isize = 10;

/// Default number of polling-token attempts before a pass gives up.
pub const DEFAULT_POLLING_ATTEMPTS: u32 = 16;

/// Default time a [`ChannelRuntime`](crate::managed::ChannelRuntime) waits
/// for each reply.
pub const DEFAULT_UPCALL_TIMEOUT: Duration = Duration::from_secs(5);

bitflags! {
    /// Debugging switches, printed to stderr.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugFlags: u32 {
        /// Print statistics at the start and end of each pass.
        const STATS = 1 << 0;
        /// Print every collectable object found.
        const COLLECTABLE = 1 << 1;
        /// Print every uncollectable object found.
        const UNCOLLECTABLE = 1 << 2;
        /// Keep all unreachable objects in `garbage` instead of freeing them.
        const SAVEALL = 1 << 5;
        /// Everything needed to hunt down a leak.
        const LEAK = Self::COLLECTABLE.bits() | Self::UNCOLLECTABLE.bits() | Self::SAVEALL.bits();
    }
}

/// Receives errors raised by finalizers, `clear` and weakref callbacks.
pub type UnraisableHook = Arc<dyn Fn(&Unraisable<'_>) + Send + Sync>;

/// Configuration for a [`Collector`](crate::Collector) and its heap.
#[derive(Clone)]
pub struct CollectorConfig {
    /// Per-generation thresholds. A zero threshold for generation 0 disables
    /// automatic collection.
    pub thresholds: [usize; NUM_GENERATIONS],
    /// Refcount baseline of managed stubs.
    pub managed_refcnt: isize,
    /// Run the weak-candidate resolver against the managed runtime.
    pub cross_domain: bool,
    /// Debug output switches.
    pub debug: DebugFlags,
    /// Attempts at the reference-queue polling token before aborting.
    pub polling_attempts: u32,
    /// Reply timeout for request/response runtimes.
    pub upcall_timeout: Duration,
    /// Replaces the default stderr report for unraisable errors.
    pub unraisable_hook: Option<UnraisableHook>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            thresholds: DEFAULT_THRESHOLDS,
            managed_refcnt: DEFAULT_MANAGED_REFCNT,
            cross_domain: false,
            debug: DebugFlags::empty(),
            polling_attempts: DEFAULT_POLLING_ATTEMPTS,
            upcall_timeout: DEFAULT_UPCALL_TIMEOUT,
            unraisable_hook: None,
        }
    }
}

impl CollectorConfig {
    /// Configuration with the cross-domain resolver switched on.
    #[must_use]
    pub fn cross_domain() -> Self {
        Self {
            cross_domain: true,
            ..Self::default()
        }
    }

    /// Set the generation thresholds.
    #[must_use]
    pub const fn with_thresholds(mut self, thresholds: [usize; NUM_GENERATIONS]) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Set the managed refcount baseline.
    #[must_use]
    pub const fn with_managed_refcnt(mut self, managed_refcnt: isize) -> Self {
        self.managed_refcnt = managed_refcnt;
        self
    }

    /// Set the debug flags.
    #[must_use]
    pub const fn with_debug(mut self, debug: DebugFlags) -> Self {
        self.debug = debug;
        self
    }

    /// Set how often the polling token is tried before a pass aborts.
    #[must_use]
    pub const fn with_polling_attempts(mut self, attempts: u32) -> Self {
        self.polling_attempts = attempts;
        self
    }

    /// Set how long a [`ChannelRuntime`](crate::ChannelRuntime) built from
    /// this configuration waits for each reply.
    #[must_use]
    pub const fn with_upcall_timeout(mut self, timeout: Duration) -> Self {
        self.upcall_timeout = timeout;
        self
    }

    /// Install an unraisable hook.
    #[must_use]
    pub fn with_unraisable_hook(
        mut self,
        hook: impl Fn(&Unraisable<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.unraisable_hook = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for CollectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorConfig")
            .field("thresholds", &self.thresholds)
            .field("managed_refcnt", &self.managed_refcnt)
            .field("cross_domain", &self.cross_domain)
            .field("debug", &self.debug)
            .field("polling_attempts", &self.polling_attempts)
            .field("upcall_timeout", &self.upcall_timeout)
            .field("unraisable_hook", &self.unraisable_hook.is_some())
            .finish()
    }
}
