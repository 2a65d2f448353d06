//! Constructors, capabilities and the species hook that lets subclasses
//! redirect chaining.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::resolving::ResolvingFunctions;
use crate::value::arg;
use crate::{Deferred, Error, Function, Result, Runtime, Value};

pub type ConstructorRef = Arc<dyn Constructor>;

/// Something that builds deferred values from an initializer.
///
/// `new_target` is the constructor the caller asked for, which differs from
/// `self` when a subclass delegates to the intrinsic. Implementations must
/// call `initializer` synchronously with a resolve and a reject function.
pub trait Constructor: Send + Sync {
    fn name(&self) -> &str;

    fn construct(&self, rt: &Runtime, new_target: &ConstructorRef, initializer: Value)
        -> Result<Value>;

    /// Overrides the constructor used for values derived from instances of
    /// this one. `None` keeps the instance's own constructor.
    fn species(&self) -> Option<ConstructorRef> {
        None
    }
}

impl fmt::Debug for dyn Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constructor({})", self.name())
    }
}

/// Identity comparison, ignoring vtable differences.
pub fn same_constructor(a: &ConstructorRef, b: &ConstructorRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// The built-in constructor.
#[derive(Debug, Default)]
pub struct DeferredConstructor;

impl Constructor for DeferredConstructor {
    fn name(&self) -> &str {
        "Deferred"
    }

    fn construct(
        &self,
        rt: &Runtime,
        new_target: &ConstructorRef,
        initializer: Value,
    ) -> Result<Value> {
        let Value::Function(initializer) = initializer else {
            return Err(Error::InvalidInitializer);
        };
        let deferred = Deferred::pending(Some(new_target.clone()));
        let resolvers = ResolvingFunctions::new(rt, &deferred);
        let (resolve, reject) = resolvers.functions();
        if let Err(thrown) = initializer.call(
            &Value::Undefined,
            &[Value::Function(resolve), Value::Function(reject)],
        ) {
            resolvers.reject(thrown);
        }
        Ok(Value::Deferred(deferred))
    }
}

/// A deferred value bundled with the functions that settle it.
#[derive(Debug, Clone)]
pub struct Capability {
    pub promise: Value,
    pub resolve: Function,
    pub reject: Function,
}

/// Builds a capability by running `constructor` with an initializer that
/// captures the resolve/reject pair it is handed.
pub fn new_capability(rt: &Runtime, constructor: &ConstructorRef) -> Result<Capability> {
    let slots = Arc::new(Mutex::new((Value::Undefined, Value::Undefined)));
    let captured = slots.clone();
    let initializer = Function::new(move |args| {
        let mut slots = captured.lock();
        if !slots.0.is_undefined() || !slots.1.is_undefined() {
            return Err(Value::type_error("capability initializer called twice"));
        }
        *slots = (arg(args, 0), arg(args, 1));
        Ok(Value::Undefined)
    });
    let promise = constructor.construct(rt, constructor, Value::Function(initializer))?;
    let (resolve, reject) = slots.lock().clone();
    match (resolve, reject) {
        (Value::Function(resolve), Value::Function(reject)) => Ok(Capability {
            promise,
            resolve,
            reject,
        }),
        (Value::Function(_), _) => Err(Error::InvalidCapability("reject is not callable")),
        _ => Err(Error::InvalidCapability("resolve is not callable")),
    }
}

/// The constructor to use for values derived from `deferred`.
pub fn species_constructor(deferred: &Deferred, default: &ConstructorRef) -> ConstructorRef {
    match deferred.constructor() {
        None => default.clone(),
        Some(own) => own.species().unwrap_or(own),
    }
}

/// Returns `x` itself when it is a deferred value built by exactly
/// `constructor`, otherwise a new value from `constructor` resolved with `x`.
pub fn coerce_to_deferred(rt: &Runtime, constructor: &ConstructorRef, x: Value) -> Result<Value> {
    if let Value::Deferred(d) = &x {
        if d
            .constructor()
            .is_some_and(|own| same_constructor(&own, constructor))
        {
            return Ok(x);
        }
    }
    let capability = new_capability(rt, constructor)?;
    capability
        .resolve
        .call(&Value::Undefined, &[x])
        .map_err(Error::Thrown)?;
    Ok(capability.promise)
}
