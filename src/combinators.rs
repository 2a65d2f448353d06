//! `all` and `race`: one aggregate deferred value over many inputs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::capability::{coerce_to_deferred, new_capability, Capability, ConstructorRef};
use crate::iteration::{Iterable, ValueIterator};
use crate::value::invoke;
use crate::{Error, Function, Result, Runtime, Value};

/// Why a combinator loop stopped early.
struct Abrupt {
    reason: Value,
    /// The iterator failed or is exhausted and must not be closed.
    iterator_done: bool,
}

impl Abrupt {
    fn iterator(reason: Value) -> Self {
        Abrupt {
            reason,
            iterator_done: true,
        }
    }

    fn step(err: impl Into<Value>) -> Self {
        Abrupt {
            reason: err.into(),
            iterator_done: false,
        }
    }
}

/// Fulfills with every input's value in iteration order; rejects with the
/// first rejection.
pub fn all<I>(rt: &Runtime, constructor: &ConstructorRef, iterable: &I) -> Result<Value>
where
    I: Iterable + ?Sized,
{
    run_combinator(rt, constructor, iterable, perform_all)
}

/// Settles like whichever input settles first. Never settles on empty input.
pub fn race<I>(rt: &Runtime, constructor: &ConstructorRef, iterable: &I) -> Result<Value>
where
    I: Iterable + ?Sized,
{
    run_combinator(rt, constructor, iterable, perform_race)
}

type Perform = fn(
    &Runtime,
    &ConstructorRef,
    &mut dyn ValueIterator,
    &Capability,
) -> std::result::Result<(), Abrupt>;

fn run_combinator<I>(
    rt: &Runtime,
    constructor: &ConstructorRef,
    iterable: &I,
    perform: Perform,
) -> Result<Value>
where
    I: Iterable + ?Sized,
{
    let capability = new_capability(rt, constructor)?;
    let mut iterator = match iterable.iterate() {
        Ok(iterator) => iterator,
        Err(reason) => return reject_with(capability, reason),
    };
    match perform(rt, constructor, iterator.as_mut(), &capability) {
        Ok(()) => Ok(capability.promise),
        Err(abrupt) => {
            let mut reason = abrupt.reason;
            if !abrupt.iterator_done {
                if let Err(close_err) = iterator.close() {
                    reason = close_err;
                }
            }
            reject_with(capability, reason)
        }
    }
}

fn reject_with(capability: Capability, reason: Value) -> Result<Value> {
    capability
        .reject
        .call(&Value::Undefined, &[reason])
        .map_err(Error::Thrown)?;
    Ok(capability.promise)
}

struct AllState {
    values: Vec<Value>,
    /// Starts at one so the aggregate cannot resolve before iteration ends.
    remaining: usize,
}

impl AllState {
    /// Returns the collected values when this was the last outstanding slot.
    fn release(&mut self) -> Option<Value> {
        self.remaining -= 1;
        (self.remaining == 0).then(|| Value::Array(self.values.clone()))
    }
}

fn perform_all(
    rt: &Runtime,
    constructor: &ConstructorRef,
    iterator: &mut dyn ValueIterator,
    capability: &Capability,
) -> std::result::Result<(), Abrupt> {
    let state = Arc::new(Mutex::new(AllState {
        values: Vec::new(),
        remaining: 1,
    }));
    let mut index = 0;
    loop {
        let Some(next) = iterator.next().map_err(Abrupt::iterator)? else {
            let done = state.lock().release();
            if let Some(values) = done {
                capability
                    .resolve
                    .call(&Value::Undefined, &[values])
                    .map_err(Abrupt::iterator)?;
            }
            return Ok(());
        };
        state.lock().values.push(Value::Undefined);
        let next_promise = coerce_to_deferred(rt, constructor, next).map_err(Abrupt::step)?;

        let slot = index;
        let already_called = AtomicBool::new(false);
        let element_state = state.clone();
        let resolve = capability.resolve.clone();
        let resolve_element = Function::unary(move |x| {
            if already_called.swap(true, Ordering::AcqRel) {
                return Ok(Value::Undefined);
            }
            let done = {
                let mut state = element_state.lock();
                state.values[slot] = x;
                state.release()
            };
            match done {
                Some(values) => resolve.call(&Value::Undefined, &[values]),
                None => Ok(Value::Undefined),
            }
        });
        state.lock().remaining += 1;

        invoke(
            rt,
            &next_promise,
            "then",
            &[
                Value::Function(resolve_element),
                Value::Function(capability.reject.clone()),
            ],
        )
        .map_err(Abrupt::step)?;
        index += 1;
    }
}

fn perform_race(
    rt: &Runtime,
    constructor: &ConstructorRef,
    iterator: &mut dyn ValueIterator,
    capability: &Capability,
) -> std::result::Result<(), Abrupt> {
    while let Some(next) = iterator.next().map_err(Abrupt::iterator)? {
        let next_promise = coerce_to_deferred(rt, constructor, next).map_err(Abrupt::step)?;
        invoke(
            rt,
            &next_promise,
            "then",
            &[
                Value::Function(capability.resolve.clone()),
                Value::Function(capability.reject.clone()),
            ],
        )
        .map_err(Abrupt::step)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::capability::Constructor;
    use crate::deferred::DeferredState;
    use crate::iteration::IterFn;
    use crate::Deferred;

    fn deferred(v: &Value) -> &Deferred {
        v.as_deferred().expect("deferred")
    }

    struct Scripted {
        items: Vec<std::result::Result<Value, Value>>,
        closed: Arc<AtomicUsize>,
        close_result: std::result::Result<(), Value>,
    }

    impl ValueIterator for Scripted {
        fn next(&mut self) -> std::result::Result<Option<Value>, Value> {
            if self.items.is_empty() {
                return Ok(None);
            }
            self.items.remove(0).map(Some)
        }

        fn close(&mut self) -> std::result::Result<(), Value> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            self.close_result.clone()
        }
    }

    #[test]
    fn all_of_nothing_fulfills_with_empty_array() {
        let rt = Runtime::new();
        let p = all(&rt, &rt.intrinsic(), &Vec::<Value>::new()).expect("all");
        assert_eq!(deferred(&p).result(), Some(Value::Array(vec![])));
    }

    #[test]
    fn all_preserves_input_order() {
        let rt = Runtime::new();
        let (late, late_resolvers) = rt.with_resolvers();
        let inputs = vec![Value::Deferred(late), Value::from(2)];
        let p = all(&rt, &rt.intrinsic(), &inputs).expect("all");
        rt.run_jobs();
        assert_eq!(deferred(&p).state(), DeferredState::Pending);
        late_resolvers.resolve(Value::from(1));
        rt.run_jobs();
        assert_eq!(
            deferred(&p).result(),
            Some(Value::from(vec![Value::from(1), Value::from(2)]))
        );
    }

    #[test]
    fn all_rejects_with_first_rejection() {
        let rt = Runtime::new();
        let (never, _resolvers) = rt.with_resolvers();
        let inputs = vec![
            Value::Deferred(rt.reject_value(Value::from("a"))),
            Value::Deferred(never),
        ];
        let p = all(&rt, &rt.intrinsic(), &inputs).expect("all");
        rt.run_jobs();
        assert_eq!(deferred(&p).state(), DeferredState::Rejected);
        assert_eq!(deferred(&p).result(), Some(Value::from("a")));
    }

    #[test]
    fn race_takes_first_settlement() {
        let rt = Runtime::new();
        let (never, _resolvers) = rt.with_resolvers();
        let inputs = vec![Value::Deferred(never), Value::from(7)];
        let p = race(&rt, &rt.intrinsic(), &inputs).expect("race");
        rt.run_jobs();
        assert_eq!(deferred(&p).result(), Some(Value::from(7)));
    }

    #[test]
    fn race_of_nothing_stays_pending() {
        let rt = Runtime::new();
        let p = race(&rt, &rt.intrinsic(), &Vec::<Value>::new()).expect("race");
        rt.run_jobs();
        assert_eq!(deferred(&p).state(), DeferredState::Pending);
    }

    #[test]
    fn non_iterable_rejects_without_closing() {
        let rt = Runtime::new();
        let p = all(&rt, &rt.intrinsic(), &Value::from(3)).expect("all");
        assert_eq!(deferred(&p).state(), DeferredState::Rejected);
    }

    #[test]
    fn failing_next_rejects_without_closing() {
        let rt = Runtime::new();
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let source = IterFn(move || {
            Ok(Box::new(Scripted {
                items: vec![Ok(Value::from(1)), Err(Value::from("step failed"))],
                closed: counter.clone(),
                close_result: Ok(()),
            }) as Box<dyn ValueIterator>)
        });
        let p = race(&rt, &rt.intrinsic(), &source).expect("race");
        assert_eq!(deferred(&p).result(), Some(Value::from("step failed")));
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_then_closes_the_iterator_once() {
        let rt = Runtime::new();
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let poisoned = rt.resolve_value(Value::from(1));
        poisoned.set_property(
            "then",
            Value::function(|_| Err(Value::from("then failed"))),
        );
        let source = IterFn(move || {
            Ok(Box::new(Scripted {
                items: vec![Ok(Value::Deferred(poisoned.clone())), Ok(Value::from(2))],
                closed: counter.clone(),
                close_result: Ok(()),
            }) as Box<dyn ValueIterator>)
        });
        let p = all(&rt, &rt.intrinsic(), &source).expect("all");
        assert_eq!(deferred(&p).result(), Some(Value::from("then failed")));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_failure_replaces_reason() {
        let rt = Runtime::new();
        let poisoned = rt.resolve_value(Value::from(1));
        poisoned.set_property("then", Value::from("not a function"));
        let source = IterFn(move || {
            Ok(Box::new(Scripted {
                items: vec![Ok(Value::Deferred(poisoned.clone()))],
                closed: Arc::new(AtomicUsize::new(0)),
                close_result: Err(Value::from("close failed")),
            }) as Box<dyn ValueIterator>)
        });
        let p = race(&rt, &rt.intrinsic(), &source).expect("race");
        assert_eq!(deferred(&p).result(), Some(Value::from("close failed")));
    }

    /// Hands out a resolve function that always throws.
    struct RefusingResolve;

    impl Constructor for RefusingResolve {
        fn name(&self) -> &str {
            "RefusingResolve"
        }

        fn construct(
            &self,
            rt: &Runtime,
            _new_target: &ConstructorRef,
            initializer: Value,
        ) -> Result<Value> {
            let Value::Function(initializer) = initializer else {
                return Err(Error::InvalidInitializer);
            };
            let (deferred, resolvers) = rt.with_resolvers();
            let resolve = Function::unary(|_| Err(Value::from("resolve refused")));
            let (_, reject) = resolvers.functions();
            initializer
                .call(
                    &Value::Undefined,
                    &[Value::Function(resolve), Value::Function(reject)],
                )
                .map_err(Error::Thrown)?;
            Ok(Value::Deferred(deferred))
        }
    }

    #[test]
    fn exhausted_iterator_is_not_closed_when_resolve_throws() {
        let rt = Runtime::new();
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let source = IterFn(move || {
            Ok(Box::new(Scripted {
                items: vec![],
                closed: counter.clone(),
                close_result: Ok(()),
            }) as Box<dyn ValueIterator>)
        });
        let refusing: ConstructorRef = Arc::new(RefusingResolve);
        let p = all(&rt, &refusing, &source).expect("all");
        assert_eq!(deferred(&p).state(), DeferredState::Rejected);
        assert_eq!(deferred(&p).result(), Some(Value::from("resolve refused")));
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }
}
