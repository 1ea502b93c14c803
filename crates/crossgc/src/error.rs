//! Error types.

use thiserror::Error;

/// Error returned by [`Collector::collect`](crate::Collector::collect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CollectError {
    /// The requested generation does not exist.
    #[error("invalid generation {0} (expected 0..={max})", max = crate::NUM_GENERATIONS - 1)]
    InvalidGeneration(usize),
}

/// Failure of a request to the managed runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpcallError {
    /// The managed side hung up.
    #[error("managed runtime disconnected")]
    Disconnected,
    /// No reply arrived in time.
    #[error("managed runtime did not answer {request} within {millis} ms")]
    TimedOut {
        /// Request name.
        request: &'static str,
        /// Configured timeout.
        millis: u64,
    },
    /// The managed side refused the request.
    #[error("managed runtime rejected {request}: {reason}")]
    Rejected {
        /// Request name.
        request: &'static str,
        /// Reason given by the managed side.
        reason: String,
    },
}

/// Why a collection pass gave up without reclaiming anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortReason {
    /// The managed runtime was processing its reference queue.
    #[error("reference queue polling token is held by the managed runtime")]
    PollingContended,
    /// A cross-domain request failed mid-pass.
    #[error("upcall failed: {0}")]
    UpcallFailed(#[from] UpcallError),
}

/// Failure raised by user code: a finalizer, a `clear` or a weakref callback.
///
/// These never stop a pass; they are reported through the unraisable hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ObjectError {
    message: String,
}

impl ObjectError {
    /// Create an error carrying `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
