//! Host hooks: drain scheduling and rejection tracking.

use std::sync::mpsc::{channel, Receiver, Sender};

use parking_lot::Mutex;

use crate::Deferred;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionOperation {
    /// A deferred value was rejected with no continuation registered.
    Reject,
    /// A continuation arrived on a deferred value that was already rejected
    /// without one.
    Handle,
}

/// The environment a [`Runtime`](crate::Runtime) runs in.
pub trait Host: Send + Sync {
    /// The job queue went from idle to non-empty. The host should call
    /// [`Runtime::run_jobs`](crate::Runtime::run_jobs) once the current
    /// synchronous work has returned.
    fn schedule_drain(&self) {}

    fn rejection_tracker(&self, _deferred: &Deferred, _operation: RejectionOperation) {}
}

/// Logs rejection tracking through `tracing` and leaves draining to the
/// caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHost;

impl Host for TracingHost {
    fn rejection_tracker(&self, deferred: &Deferred, operation: RejectionOperation) {
        match operation {
            RejectionOperation::Reject => tracing::warn!(
                deferred = deferred.id(),
                reason = ?deferred.result(),
                "deferred value rejected with no handler"
            ),
            RejectionOperation::Handle => tracing::debug!(
                deferred = deferred.id(),
                "handler attached to an already rejected deferred value"
            ),
        }
    }
}

/// Message sent by [`ChannelHost`] when the queue needs draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainRequest;

/// Forwards drain requests over a channel so an event loop thread can own
/// the draining. Rejection tracking behaves like [`TracingHost`].
#[derive(Debug)]
pub struct ChannelHost {
    sender: Mutex<Sender<DrainRequest>>,
}

impl ChannelHost {
    pub fn new() -> (Self, Receiver<DrainRequest>) {
        let (tx, rx) = channel();
        (
            ChannelHost {
                sender: Mutex::new(tx),
            },
            rx,
        )
    }
}

impl Host for ChannelHost {
    fn schedule_drain(&self) {
        // The event loop may already be gone; then nobody is left to drain.
        if self.sender.lock().send(DrainRequest).is_err() {
            tracing::debug!("drain requested after the event loop hung up");
        }
    }

    fn rejection_tracker(&self, deferred: &Deferred, operation: RejectionOperation) {
        TracingHost.rejection_tracker(deferred, operation)
    }
}
