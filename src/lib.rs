//! Deferred values: results of asynchronous computations that settle exactly
//! once, with continuations dispatched through a FIFO job queue.
//!
//! # Examples
//!
//! ```
//! use promise_core::{Function, Runtime, Value};
//!
//! let rt = Runtime::new();
//! let d = rt
//!     .new_deferred(Function::new(|args| {
//!         let resolve = args[0].as_function().cloned().expect("resolve");
//!         resolve.call(&Value::Undefined, &[Value::from(5)])
//!     }))
//!     .unwrap();
//! let doubled = rt
//!     .then(
//!         &Value::Deferred(d),
//!         Value::function(|v| Ok(Value::from(v.as_number().unwrap_or(0.0) * 2.0))),
//!         Value::Undefined,
//!     )
//!     .unwrap();
//! rt.run_jobs();
//! assert_eq!(doubled.as_deferred().unwrap().result(), Some(Value::from(10)));
//! ```

pub mod capability;
pub mod combinators;
pub mod deferred;
pub mod foreign;
pub mod host;
pub mod iteration;
pub mod job;
pub mod job_queue;
pub mod reaction;
pub mod resolving;
pub mod runtime;
pub mod value;
pub mod waiter;

pub use capability::{Capability, Constructor, ConstructorRef, DeferredConstructor};
pub use deferred::{Deferred, DeferredState};
pub use host::{ChannelHost, DrainRequest, Host, RejectionOperation, TracingHost};
pub use iteration::{Iterable, IterFn, ValueIterator};
pub use resolving::ResolvingFunctions;
pub use runtime::Runtime;
pub use value::{Completion, ErrorKind, ErrorValue, Function, HostObject, Object, PlainObject, Value};
pub use waiter::Settled;

use thiserror::Error;

/// Misuse detected before a deferred value exists. Everything after that is
/// reported through rejection instead.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("initializer is not callable")]
    InvalidInitializer,

    #[error("constructor did not produce a valid capability: {0}")]
    InvalidCapability(&'static str),

    #[error("receiver is not a deferred value")]
    NotADeferredValue,

    #[error("{0} is not callable")]
    NotCallable(String),

    /// User code threw while the operation ran synchronously.
    #[error("uncaught {0:?}")]
    Thrown(Value),
}

impl Error {
    /// The value to reject with when this error has to travel through
    /// settlement: thrown values as-is, misuse as a TypeError.
    pub fn into_value(self) -> Value {
        match self {
            Error::Thrown(value) => value,
            other => Value::type_error(other.to_string()),
        }
    }
}

impl From<Error> for Value {
    fn from(err: Error) -> Self {
        err.into_value()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
