//! The iteration protocol combinators consume: a lazy, finite,
//! non-restartable sequence with an explicit close for early exit.

use crate::Value;

pub trait ValueIterator: Send {
    /// `Ok(None)` once exhausted. An `Err` is a thrown value; the iterator is
    /// treated as finished afterwards and is not closed.
    fn next(&mut self) -> Result<Option<Value>, Value>;

    /// Releases resources when the consumer stops before exhaustion.
    fn close(&mut self) -> Result<(), Value> {
        Ok(())
    }
}

pub trait Iterable {
    fn iterate(&self) -> Result<Box<dyn ValueIterator>, Value>;
}

struct VecIter(std::vec::IntoIter<Value>);

impl ValueIterator for VecIter {
    fn next(&mut self) -> Result<Option<Value>, Value> {
        Ok(self.0.next())
    }
}

impl Iterable for [Value] {
    fn iterate(&self) -> Result<Box<dyn ValueIterator>, Value> {
        Ok(Box::new(VecIter(self.to_vec().into_iter())))
    }
}

impl Iterable for Vec<Value> {
    fn iterate(&self) -> Result<Box<dyn ValueIterator>, Value> {
        self.as_slice().iterate()
    }
}

/// Arrays iterate their elements; anything else is not iterable.
impl Iterable for Value {
    fn iterate(&self) -> Result<Box<dyn ValueIterator>, Value> {
        match self {
            Value::Array(items) => items.iterate(),
            other => Err(Value::type_error(format!("{other:?} is not iterable"))),
        }
    }
}

/// An iterable backed by a factory, so callers can supply their own
/// [`ValueIterator`] implementations.
pub struct IterFn<F>(pub F);

impl<F> Iterable for IterFn<F>
where
    F: Fn() -> Result<Box<dyn ValueIterator>, Value>,
{
    fn iterate(&self) -> Result<Box<dyn ValueIterator>, Value> {
        (self.0)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_iterate_in_order() {
        let items = Value::from(vec![Value::from(1), Value::from(2)]);
        let mut iter = items.iterate().expect("iterable");
        assert_eq!(iter.next(), Ok(Some(Value::from(1))));
        assert_eq!(iter.next(), Ok(Some(Value::from(2))));
        assert_eq!(iter.next(), Ok(None));
        assert_eq!(iter.close(), Ok(()));
    }

    #[test]
    fn primitives_are_not_iterable() {
        assert!(Value::from(7).iterate().is_err());
        assert!(Value::Undefined.iterate().is_err());
    }
}
