//! The one-shot resolve/reject pair bound to a single deferred value.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::job::Job;
use crate::value::{get_property, ErrorKind, ErrorValue};
use crate::{Deferred, Function, Runtime, Value};

/// Shares one `already_resolved` flag between `resolve` and `reject`: only
/// the first call of either, from any clone, has an effect.
///
/// Holds its deferred value and runtime strongly. Registering these
/// functions as a handler on their own deferred value forms a cycle that
/// lasts until that value settles and its reactions are released.
#[derive(Debug, Clone)]
pub struct ResolvingFunctions {
    deferred: Deferred,
    runtime: Runtime,
    already_resolved: Arc<AtomicBool>,
}

impl ResolvingFunctions {
    pub fn new(rt: &Runtime, deferred: &Deferred) -> Self {
        Self {
            deferred: deferred.clone(),
            runtime: rt.clone(),
            already_resolved: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn deferred(&self) -> &Deferred {
        &self.deferred
    }

    fn claim(&self) -> bool {
        !self.already_resolved.swap(true, Ordering::AcqRel)
    }

    pub fn is_resolved(&self) -> bool {
        self.already_resolved.load(Ordering::Acquire)
    }

    /// Settles with `resolution`, or adopts it when it is a thenable.
    pub fn resolve(&self, resolution: Value) {
        if !self.claim() {
            return;
        }
        let rt = &self.runtime;
        if let Value::Deferred(d) = &resolution {
            if d.ptr_eq(&self.deferred) {
                let err = ErrorValue::new(
                    ErrorKind::SelfResolution,
                    "cannot resolve a deferred value with itself",
                );
                return self.deferred.reject(rt, Value::Error(err));
            }
        }
        if !resolution.is_object() {
            return self.deferred.fulfill(rt, resolution);
        }
        let then = match get_property(rt, &resolution, "then") {
            Ok(then) => then,
            Err(thrown) => return self.deferred.reject(rt, thrown),
        };
        match then {
            Value::Function(then) => rt.enqueue(Job::AdoptForeign {
                target: self.deferred.clone(),
                thenable: resolution,
                then,
            }),
            _ => self.deferred.fulfill(rt, resolution),
        }
    }

    pub fn reject(&self, reason: Value) {
        if self.claim() {
            self.deferred.reject(&self.runtime, reason);
        }
    }

    /// The pair as callable values, for handing to initializers and
    /// foreign `then` methods.
    pub fn functions(&self) -> (Function, Function) {
        let on_resolve = self.clone();
        let on_reject = self.clone();
        (
            Function::unary(move |v| {
                on_resolve.resolve(v);
                Ok(Value::Undefined)
            }),
            Function::unary(move |r| {
                on_reject.reject(r);
                Ok(Value::Undefined)
            }),
        )
    }
}
