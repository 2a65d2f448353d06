//! Continuation registration and reaction jobs.

use crate::capability::Capability;
use crate::deferred::DeferredState;
use crate::host::RejectionOperation;
use crate::job::Job;
use crate::{Deferred, Function, Runtime, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    Fulfill,
    Reject,
}

/// A continuation waiting on a deferred value, plus the capability that
/// receives its outcome.
#[derive(Debug, Clone)]
pub struct Reaction {
    capability: Capability,
    kind: ReactionKind,
    handler: Option<Function>,
}

impl Reaction {
    pub fn new(capability: Capability, kind: ReactionKind, handler: Option<Function>) -> Self {
        Self {
            capability,
            kind,
            handler,
        }
    }

    pub fn kind(&self) -> ReactionKind {
        self.kind
    }

    /// Without a handler the argument passes through as fulfillment or
    /// rejection according to `kind`. A handler's return resolves the
    /// downstream capability and its throw rejects it.
    pub(crate) fn run(self, argument: Value) {
        let outcome = match (&self.handler, self.kind) {
            (None, ReactionKind::Fulfill) => Ok(argument),
            (None, ReactionKind::Reject) => Err(argument),
            (Some(handler), _) => handler.call(&Value::Undefined, &[argument]),
        };
        let status = match outcome {
            Ok(value) => self.capability.resolve.call(&Value::Undefined, &[value]),
            Err(reason) => self.capability.reject.call(&Value::Undefined, &[reason]),
        };
        if let Err(thrown) = status {
            tracing::debug!(?thrown, "downstream resolving function threw in reaction job");
        }
    }
}

/// Attaches `on_fulfilled`/`on_rejected` to `deferred`, reporting into
/// `capability`. Non-function handlers count as absent.
pub fn perform_then(
    rt: &Runtime,
    deferred: &Deferred,
    on_fulfilled: Value,
    on_rejected: Value,
    capability: Capability,
) -> Value {
    let as_handler = |v: Value| match v {
        Value::Function(f) => Some(f),
        _ => None,
    };
    let promise = capability.promise.clone();
    let fulfill = Reaction::new(
        capability.clone(),
        ReactionKind::Fulfill,
        as_handler(on_fulfilled),
    );
    let reject = Reaction::new(capability, ReactionKind::Reject, as_handler(on_rejected));

    let mut slots = deferred.lock();
    let was_handled = std::mem::replace(&mut slots.is_handled, true);
    let ready = match slots.state {
        DeferredState::Pending => {
            slots.fulfill_reactions.push(fulfill);
            slots.reject_reactions.push(reject);
            None
        }
        DeferredState::Fulfilled => Some((fulfill, slots.result.clone())),
        DeferredState::Rejected => Some((reject, slots.result.clone())),
    };
    let rejected = slots.state == DeferredState::Rejected;
    drop(slots);

    if rejected && !was_handled {
        rt.host()
            .rejection_tracker(deferred, RejectionOperation::Handle);
    }
    if let Some((reaction, argument)) = ready {
        rt.enqueue(Job::Reaction { reaction, argument });
    }
    promise
}
