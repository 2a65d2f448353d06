//! The runtime handle: owns the job queue, the host and the intrinsic
//! constructor, and exposes the public operations.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::capability::{
    coerce_to_deferred, new_capability, same_constructor, species_constructor, Capability,
    ConstructorRef, DeferredConstructor,
};
use crate::combinators;
use crate::host::{Host, TracingHost};
use crate::iteration::Iterable;
use crate::job::Job;
use crate::job_queue::JobQueue;
use crate::reaction::perform_then;
use crate::resolving::ResolvingFunctions;
use crate::value::{arg, get_property};
use crate::{Deferred, Error, Function, Result, Value};

struct Intrinsics {
    then: Function,
    catch: Function,
    finally: Function,
}

struct Inner {
    queue: JobQueue<Job>,
    host: Arc<dyn Host>,
    constructor: ConstructorRef,
    methods: Intrinsics,
}

/// Cloneable handle; clones share one queue.
///
/// Nothing runs on its own: jobs wait until [`Runtime::run_jobs`] is called,
/// typically by the host after it was told via [`Host::schedule_drain`].
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("pending_jobs", &self.pending_jobs())
            .finish()
    }
}

type MethodBody = fn(&Runtime, &Value, &[Value]) -> Result<Value>;

/// Intrinsic methods live inside the runtime, so they hold it weakly.
fn bound(weak: &Weak<Inner>, body: MethodBody) -> Function {
    let weak = weak.clone();
    Function::method(move |this, args| {
        let inner = weak
            .upgrade()
            .ok_or_else(|| Value::type_error("runtime has been dropped"))?;
        body(&Runtime { inner }, this, args).map_err(Error::into_value)
    })
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_host(Arc::new(TracingHost))
    }

    pub fn with_host(host: Arc<dyn Host>) -> Self {
        let inner = Arc::new_cyclic(|weak| Inner {
            queue: JobQueue::new(),
            host,
            constructor: Arc::new(DeferredConstructor),
            methods: Intrinsics {
                then: bound(weak, |rt, this, args| {
                    rt.then(this, arg(args, 0), arg(args, 1))
                }),
                catch: bound(weak, |rt, this, args| rt.catch(this, arg(args, 0))),
                finally: bound(weak, |rt, this, args| rt.finally(this, arg(args, 0))),
            },
        });
        Runtime { inner }
    }

    pub fn host(&self) -> &dyn Host {
        self.inner.host.as_ref()
    }

    /// The built-in constructor.
    pub fn intrinsic(&self) -> ConstructorRef {
        self.inner.constructor.clone()
    }

    pub(crate) fn intrinsic_method(&self, key: &str) -> Option<Function> {
        let methods = &self.inner.methods;
        match key {
            "then" => Some(methods.then.clone()),
            "catch" => Some(methods.catch.clone()),
            "finally" => Some(methods.finally.clone()),
            _ => None,
        }
    }

    /// Appends a job, telling the host when a drain becomes necessary.
    pub fn enqueue(&self, job: Job) {
        if self.inner.queue.push(job) {
            self.inner.host.schedule_drain();
        }
    }

    /// Runs queued jobs until none are left, including jobs queued along the
    /// way. Returns how many ran; a call from inside a job returns `0`.
    pub fn run_jobs(&self) -> usize {
        let ran = self.inner.queue.drain(|job| job.run(self));
        if ran > 0 {
            tracing::trace!(jobs = ran, "drained job queue");
        }
        ran
    }

    pub fn pending_jobs(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn new_capability(&self, constructor: &ConstructorRef) -> Result<Capability> {
        new_capability(self, constructor)
    }

    /// Builds a value with `constructor`, which hands `initializer` its
    /// resolve and reject functions synchronously.
    pub fn construct(
        &self,
        constructor: &ConstructorRef,
        initializer: impl Into<Value>,
    ) -> Result<Value> {
        constructor.construct(self, constructor, initializer.into())
    }

    /// [`Runtime::construct`] with the intrinsic constructor.
    pub fn new_deferred(&self, initializer: impl Into<Value>) -> Result<Deferred> {
        self.construct(&self.intrinsic(), initializer)?
            .as_deferred()
            .cloned()
            .ok_or(Error::NotADeferredValue)
    }

    /// A pending value together with the functions that settle it.
    pub fn with_resolvers(&self) -> (Deferred, ResolvingFunctions) {
        let deferred = Deferred::pending(Some(self.intrinsic()));
        let resolvers = ResolvingFunctions::new(self, &deferred);
        (deferred, resolvers)
    }

    /// `resolve` on the intrinsic constructor, which cannot fail.
    pub fn resolve_value(&self, x: Value) -> Deferred {
        if let Value::Deferred(d) = &x {
            let own = d.constructor();
            if own.is_some_and(|own| same_constructor(&own, &self.inner.constructor)) {
                return d.clone();
            }
        }
        let (deferred, resolvers) = self.with_resolvers();
        resolvers.resolve(x);
        deferred
    }

    /// `reject` on the intrinsic constructor, which cannot fail.
    pub fn reject_value(&self, reason: Value) -> Deferred {
        let (deferred, resolvers) = self.with_resolvers();
        resolvers.reject(reason);
        deferred
    }

    /// Registers continuations on `receiver`, which must be a deferred value.
    /// The result comes from the receiver's species constructor.
    pub fn then(
        &self,
        receiver: &Value,
        on_fulfilled: impl Into<Value>,
        on_rejected: impl Into<Value>,
    ) -> Result<Value> {
        let Value::Deferred(deferred) = receiver else {
            return Err(Error::NotADeferredValue);
        };
        let constructor = species_constructor(deferred, &self.inner.constructor);
        let capability = new_capability(self, &constructor)?;
        Ok(perform_then(
            self,
            deferred,
            on_fulfilled.into(),
            on_rejected.into(),
            capability,
        ))
    }

    /// `receiver.then(undefined, on_rejected)`, looked up dynamically.
    pub fn catch(&self, receiver: &Value, on_rejected: impl Into<Value>) -> Result<Value> {
        self.invoke(receiver, "then", &[Value::Undefined, on_rejected.into()])
    }

    /// Runs `on_finally` once `receiver` settles, then passes the original
    /// outcome through. A throw from `on_finally`, or a rejection of what it
    /// returns, replaces the outcome. A non-function `on_finally` is ignored.
    pub fn finally(&self, receiver: &Value, on_finally: impl Into<Value>) -> Result<Value> {
        if !receiver.is_object() {
            return Err(Error::NotADeferredValue);
        }
        let constructor = match receiver {
            Value::Deferred(d) => species_constructor(d, &self.inner.constructor),
            _ => self.intrinsic(),
        };
        let (then_finally, catch_finally) = match on_finally.into() {
            Value::Function(on_finally) => (
                self.finally_handler(&constructor, &on_finally, false),
                self.finally_handler(&constructor, &on_finally, true),
            ),
            other => (other.clone(), other),
        };
        self.invoke(receiver, "then", &[then_finally, catch_finally])
    }

    /// The handler keeps the runtime alive until the reaction holding it has
    /// run or been dropped.
    fn finally_handler(
        &self,
        constructor: &ConstructorRef,
        on_finally: &Function,
        rethrow: bool,
    ) -> Value {
        let rt = self.clone();
        let constructor = constructor.clone();
        let on_finally = on_finally.clone();
        Value::function(move |outcome| {
            let result = on_finally.call(&Value::Undefined, &[])?;
            let waited = coerce_to_deferred(&rt, &constructor, result).map_err(Error::into_value)?;
            let pass_through = Value::function(move |_| {
                if rethrow {
                    Err(outcome.clone())
                } else {
                    Ok(outcome.clone())
                }
            });
            rt.invoke(&waited, "then", &[pass_through])
                .map_err(Error::into_value)
        })
    }

    /// `resolve` parameterized by constructor: `x` itself when it was built by
    /// exactly `constructor`, otherwise a new value adopting `x`.
    pub fn resolve(&self, constructor: &ConstructorRef, x: impl Into<Value>) -> Result<Value> {
        coerce_to_deferred(self, constructor, x.into())
    }

    pub fn reject(&self, constructor: &ConstructorRef, reason: impl Into<Value>) -> Result<Value> {
        let capability = new_capability(self, constructor)?;
        capability
            .reject
            .call(&Value::Undefined, &[reason.into()])
            .map_err(Error::Thrown)?;
        Ok(capability.promise)
    }

    pub fn all<I>(&self, constructor: &ConstructorRef, iterable: &I) -> Result<Value>
    where
        I: Iterable + ?Sized,
    {
        combinators::all(self, constructor, iterable)
    }

    pub fn race<I>(&self, constructor: &ConstructorRef, iterable: &I) -> Result<Value>
    where
        I: Iterable + ?Sized,
    {
        combinators::race(self, constructor, iterable)
    }

    /// Calls method `key` on `receiver`.
    pub fn invoke(&self, receiver: &Value, key: &str, args: &[Value]) -> Result<Value> {
        match get_property(self, receiver, key).map_err(Error::Thrown)? {
            Value::Function(method) => method.call(receiver, args).map_err(Error::Thrown),
            _ => Err(Error::NotCallable(key.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::DeferredState;

    #[test]
    fn then_needs_a_deferred_receiver() {
        let rt = Runtime::new();
        assert!(matches!(
            rt.then(&Value::from(1), Value::Undefined, Value::Undefined),
            Err(Error::NotADeferredValue)
        ));
    }

    #[test]
    fn non_callable_initializer_is_rejected_synchronously() {
        let rt = Runtime::new();
        assert!(matches!(
            rt.new_deferred(Value::Null),
            Err(Error::InvalidInitializer)
        ));
    }

    #[test]
    fn finally_requires_an_object_receiver() {
        let rt = Runtime::new();
        assert!(matches!(
            rt.finally(&Value::from("x"), Value::Undefined),
            Err(Error::NotADeferredValue)
        ));
    }

    #[test]
    fn catch_reports_missing_then() {
        let rt = Runtime::new();
        assert!(matches!(
            rt.catch(&Value::from(Vec::<Value>::new()), Value::Undefined),
            Err(Error::NotCallable(key)) if key == "then"
        ));
    }

    #[test]
    fn intrinsic_methods_are_stable() {
        let rt = Runtime::new();
        let d = Value::Deferred(rt.resolve_value(Value::from(1)));
        assert_eq!(get_property(&rt, &d, "then"), get_property(&rt, &d, "then"));
    }

    #[test]
    fn intrinsic_then_is_callable_as_a_value() {
        let rt = Runtime::new();
        let d = Value::Deferred(rt.resolve_value(Value::from(4)));
        let increment = Value::function(|v| Ok(Value::from(v.as_number().unwrap_or(0.0) + 1.0)));
        let out = rt.invoke(&d, "then", &[increment]).expect("then");
        rt.run_jobs();
        let out = out.as_deferred().expect("deferred");
        assert_eq!(out.state(), DeferredState::Fulfilled);
        assert_eq!(out.result(), Some(Value::from(5)));
    }

    #[test]
    fn resolve_value_reuses_intrinsic_values() {
        let rt = Runtime::new();
        let d = rt.resolve_value(Value::from(1));
        assert!(rt.resolve_value(Value::Deferred(d.clone())).ptr_eq(&d));
    }

    #[test]
    fn host_jobs_share_the_fifo() {
        let rt = Runtime::new();
        let (d, resolvers) = rt.with_resolvers();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = seen.clone();
        rt.then(
            &Value::Deferred(d),
            Value::function(move |v| {
                log.lock().push(v);
                Ok(Value::Undefined)
            }),
            Value::Undefined,
        )
        .expect("then");
        let timer = seen.clone();
        rt.enqueue(Job::Host(Box::new(move |_: &Runtime| {
            timer.lock().push(Value::from("timer"));
            resolvers.resolve(Value::from("resolved"));
        })));
        assert_eq!(rt.run_jobs(), 2);
        assert_eq!(
            *seen.lock(),
            vec![Value::from("timer"), Value::from("resolved")]
        );
    }

    #[test]
    fn missing_constructor_falls_back_to_intrinsic() {
        let rt = Runtime::new();
        let d = rt.resolve_value(Value::from(1));
        d.set_constructor(None);
        let out = rt
            .then(&Value::Deferred(d), Value::Undefined, Value::Undefined)
            .expect("then");
        let own = out.as_deferred().and_then(Deferred::constructor).expect("constructor");
        assert!(same_constructor(&own, &rt.intrinsic()));
    }

    #[test]
    fn panicking_handler_leaves_the_queue_usable() {
        let rt = Runtime::new();
        let d = Value::Deferred(rt.resolve_value(Value::from(1)));
        rt.then(&d, Value::function(|_| panic!("handler failed")), Value::Undefined)
            .expect("then");
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| rt.run_jobs()));
        assert!(outcome.is_err());

        let out = rt.then(&d, Value::function(Ok), Value::Undefined).expect("then");
        assert_eq!(rt.run_jobs(), 1);
        let out = out.as_deferred().expect("deferred");
        assert_eq!(out.state(), DeferredState::Fulfilled);
        assert_eq!(out.result(), Some(Value::from(1)));
    }
}
