//! Upcalls as blocking request/response messages over a channel.
//!
//! The collector side holds a [`ChannelRuntime`]; the managed side drains the
//! matching receiver with [`serve`] (or dispatches [`ManagedRequest`]s from its
//! own event loop). Each request carries a one-shot reply channel and the
//! collector waits at most the configured timeout for the answer.

use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use super::ManagedRuntime;
use crate::config::CollectorConfig;
use crate::error::UpcallError;
use crate::object::ObjRef;

/// One upcall in flight.
#[derive(Debug)]
pub enum ManagedRequest {
    /// See [`ManagedRuntime::replicate_native_references`].
    Replicate {
        /// Native owner.
        owner: ObjRef,
        /// Objects it references.
        nodes: Vec<ObjRef>,
        /// Reply slot.
        reply: Sender<Result<(), UpcallError>>,
    },
    /// See [`ManagedRuntime::commit_weak`].
    CommitWeak {
        /// Stubs to weaken.
        nodes: Vec<ObjRef>,
        /// Reply slot.
        reply: Sender<Result<(), UpcallError>>,
    },
    /// See [`ManagedRuntime::is_referenced_from_managed`].
    IsReferencedFromManaged {
        /// Native object in question.
        obj: ObjRef,
        /// Reply slot.
        reply: Sender<Result<bool, UpcallError>>,
    },
    /// See [`ManagedRuntime::disable_reference_queue_polling`].
    DisablePolling {
        /// Reply slot.
        reply: Sender<bool>,
    },
    /// See [`ManagedRuntime::enable_reference_queue_polling`]. No reply.
    EnablePolling,
    /// The collector stopped waiting for a [`ManagedRequest::DisablePolling`]
    /// reply. Release the token if the reply granted it. No reply.
    ReleaseUnclaimed {
        /// The abandoned reply channel.
        grant: Receiver<bool>,
    },
}

impl ManagedRequest {
    /// Short request name for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Replicate { .. } => "replicate_native_references",
            Self::CommitWeak { .. } => "commit_weak",
            Self::IsReferencedFromManaged { .. } => "is_referenced_from_managed",
            Self::DisablePolling { .. } => "disable_reference_queue_polling",
            Self::EnablePolling => "enable_reference_queue_polling",
            Self::ReleaseUnclaimed { .. } => "release_unclaimed_polling_token",
        }
    }

    /// Answer the request with `runtime`.
    ///
    /// A reply nobody waits for any more (the caller timed out) is dropped.
    pub fn dispatch<R: ManagedRuntime + ?Sized>(self, runtime: &mut R) {
        match self {
            Self::Replicate {
                owner,
                nodes,
                reply,
            } => {
                let _ = reply.send(runtime.replicate_native_references(owner, &nodes));
            }
            Self::CommitWeak { nodes, reply } => {
                let _ = reply.send(runtime.commit_weak(&nodes));
            }
            Self::IsReferencedFromManaged { obj, reply } => {
                let _ = reply.send(runtime.is_referenced_from_managed(obj));
            }
            Self::DisablePolling { reply } => {
                let acquired = runtime.disable_reference_queue_polling();
                if reply.send(acquired).is_err() && acquired {
                    // The collector gave up waiting; don't leave the token held.
                    runtime.enable_reference_queue_polling();
                }
            }
            Self::EnablePolling => runtime.enable_reference_queue_polling(),
            Self::ReleaseUnclaimed { grant } => {
                // Requests are answered in order, so the abandoned reply is
                // already buffered if it was ever sent.
                if grant.try_recv() == Ok(true) {
                    runtime.enable_reference_queue_polling();
                }
            }
        }
    }
}

/// Answer requests until every [`ChannelRuntime`] is dropped.
///
/// Returns the number of requests handled.
pub fn serve<R: ManagedRuntime + ?Sized>(requests: &Receiver<ManagedRequest>, runtime: &mut R) -> usize {
    let mut handled = 0;
    for request in requests {
        request.dispatch(runtime);
        handled += 1;
    }
    handled
}

/// [`ManagedRuntime`] that forwards every upcall over a channel.
#[derive(Debug, Clone)]
pub struct ChannelRuntime {
    requests: Sender<ManagedRequest>,
    timeout: Duration,
}

impl ChannelRuntime {
    /// Create a runtime and the receiver the managed side must serve.
    #[must_use]
    pub fn new(timeout: Duration) -> (Self, Receiver<ManagedRequest>) {
        let (requests, receiver) = channel::unbounded();
        (Self { requests, timeout }, receiver)
    }

    /// Create a runtime waiting [`CollectorConfig::upcall_timeout`] per reply.
    #[must_use]
    pub fn from_config(config: &CollectorConfig) -> (Self, Receiver<ManagedRequest>) {
        Self::new(config.upcall_timeout)
    }

    /// Reply timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn call<T>(
        &self,
        request: &'static str,
        build: impl FnOnce(Sender<T>) -> ManagedRequest,
    ) -> Result<T, UpcallError> {
        let (reply, answer) = channel::bounded(1);
        self.requests
            .send(build(reply))
            .map_err(|_| UpcallError::Disconnected)?;
        answer
            .recv_timeout(self.timeout)
            .map_err(|err| self.reply_error(request, err))
    }

    fn reply_error(&self, request: &'static str, err: RecvTimeoutError) -> UpcallError {
        match err {
            RecvTimeoutError::Timeout => UpcallError::TimedOut {
                request,
                millis: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => UpcallError::Disconnected,
        }
    }

    fn request_polling_token(&self) -> Result<bool, UpcallError> {
        let request = "disable_reference_queue_polling";
        let (reply, answer) = channel::bounded(1);
        self.requests
            .send(ManagedRequest::DisablePolling { reply })
            .map_err(|_| UpcallError::Disconnected)?;
        match answer.recv_timeout(self.timeout) {
            Ok(acquired) => Ok(acquired),
            Err(RecvTimeoutError::Timeout) => {
                // A grant sent after the timeout would otherwise hold the
                // token forever.
                let _ = self
                    .requests
                    .send(ManagedRequest::ReleaseUnclaimed { grant: answer });
                Err(self.reply_error(request, RecvTimeoutError::Timeout))
            }
            Err(err) => Err(self.reply_error(request, err)),
        }
    }
}

impl ManagedRuntime for ChannelRuntime {
    fn replicate_native_references(
        &mut self,
        owner: ObjRef,
        nodes: &[ObjRef],
    ) -> Result<(), UpcallError> {
        self.call("replicate_native_references", |reply| {
            ManagedRequest::Replicate {
                owner,
                nodes: nodes.to_vec(),
                reply,
            }
        })?
    }

    fn commit_weak(&mut self, nodes: &[ObjRef]) -> Result<(), UpcallError> {
        self.call("commit_weak", |reply| ManagedRequest::CommitWeak {
            nodes: nodes.to_vec(),
            reply,
        })?
    }

    fn is_referenced_from_managed(&mut self, obj: ObjRef) -> Result<bool, UpcallError> {
        self.call("is_referenced_from_managed", |reply| {
            ManagedRequest::IsReferencedFromManaged { obj, reply }
        })?
    }

    fn disable_reference_queue_polling(&mut self) -> bool {
        match self.request_polling_token() {
            Ok(acquired) => acquired,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_err, "polling token request failed");
                false
            }
        }
    }

    fn enable_reference_queue_polling(&mut self) {
        let _ = self.requests.send(ManagedRequest::EnablePolling);
    }
}
