//! The dynamically typed values that flow through deferred values.
//!
//! Handlers, initializers and foreign `then` methods are all [`Function`]s:
//! they receive a receiver and an argument slice and return a
//! [`Completion`]. A thrown value is an `Err`, so failure crosses job
//! boundaries as data rather than by unwinding.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Deferred, Runtime};

/// Outcome of calling a [`Function`]: `Ok` for a normal return, `Err` for a
/// thrown value.
pub type Completion = Result<Value, Value>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<Value>),
    Error(ErrorValue),
    Function(Function),
    Object(Object),
    Deferred(Deferred),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Whether the value can carry properties, and so may be a thenable.
    pub fn is_object(&self) -> bool {
        matches!(
            self,
            Value::Array(_)
                | Value::Error(_)
                | Value::Function(_)
                | Value::Object(_)
                | Value::Deferred(_)
        )
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_deferred(&self) -> Option<&Deferred> {
        match self {
            Value::Deferred(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn function<F>(f: F) -> Value
    where
        F: Fn(Value) -> Completion + Send + Sync + 'static,
    {
        Value::Function(Function::unary(f))
    }

    /// Shorthand for `Value::Error` with [`ErrorKind::Error`].
    pub fn error(message: impl Into<String>) -> Value {
        Value::Error(ErrorValue::new(ErrorKind::Error, message))
    }

    pub fn type_error(message: impl Into<String>) -> Value {
        Value::Error(ErrorValue::new(ErrorKind::TypeError, message))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Deferred(a), Value::Deferred(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Error(e) => write!(f, "{e}"),
            Value::Function(_) => f.write_str("[function]"),
            Value::Object(_) => f.write_str("[object]"),
            Value::Deferred(d) => write!(f, "{d:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<Deferred> for Value {
    fn from(d: Deferred) -> Self {
        Value::Deferred(d)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<ErrorValue> for Value {
    fn from(e: ErrorValue) -> Self {
        Value::Error(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    TypeError,
    /// A deferred value was resolved with itself.
    SelfResolution,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::SelfResolution => "SelfResolutionError",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    kind: ErrorKind,
    message: String,
}

impl ErrorValue {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

type Callable = dyn Fn(&Value, &[Value]) -> Completion + Send + Sync;

/// A shared callable. Clones compare equal by identity.
#[derive(Clone)]
pub struct Function(Arc<Callable>);

impl Function {
    /// A function that sees its receiver, like a method.
    pub fn method<F>(f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Completion + Send + Sync + 'static,
    {
        Function(Arc::new(f))
    }

    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Completion + Send + Sync + 'static,
    {
        Function(Arc::new(move |_this: &Value, args: &[Value]| f(args)))
    }

    /// A one-argument function; a missing argument reads as `undefined`.
    pub fn unary<F>(f: F) -> Self
    where
        F: Fn(Value) -> Completion + Send + Sync + 'static,
    {
        Function::new(move |args| f(arg(args, 0)))
    }

    pub fn call(&self, this: &Value, args: &[Value]) -> Completion {
        (self.0)(this, args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Function")
    }
}

/// Reads positional argument `index`, `undefined` when absent.
pub fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

/// An object implemented outside this crate. Reading a property may throw.
pub trait HostObject: Send + Sync {
    fn get(&self, key: &str) -> Completion;
}

#[derive(Clone)]
pub struct Object(Arc<dyn HostObject>);

impl Object {
    pub fn new(inner: impl HostObject + 'static) -> Self {
        Object(Arc::new(inner))
    }

    pub fn get(&self, key: &str) -> Completion {
        self.0.get(key)
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }
}

/// An ordinary property bag.
#[derive(Default)]
pub struct PlainObject {
    properties: Mutex<BTreeMap<String, Value>>,
}

impl PlainObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.properties.lock().insert(key.to_owned(), value.into());
    }
}

impl HostObject for PlainObject {
    fn get(&self, key: &str) -> Completion {
        Ok(self.properties.lock().get(key).cloned().unwrap_or_default())
    }
}

/// Reads `key` off `value`.
///
/// Deferred values answer their own overrides first and then the intrinsic
/// `then`/`catch`/`finally` methods bound to `rt`. Primitives have no
/// properties.
pub fn get_property(rt: &Runtime, value: &Value, key: &str) -> Completion {
    match value {
        Value::Deferred(d) => match d.property(key) {
            Some(v) => Ok(v),
            None => Ok(rt.intrinsic_method(key).map(Value::Function).unwrap_or_default()),
        },
        Value::Object(o) => o.get(key),
        Value::Error(e) => Ok(match key {
            "message" => Value::from(e.message()),
            "name" => Value::from(e.kind().name()),
            _ => Value::Undefined,
        }),
        Value::Array(items) if key == "length" => Ok(Value::Number(items.len() as f64)),
        _ => Ok(Value::Undefined),
    }
}

/// Looks up `key` on `value` and calls it with `value` as the receiver.
pub fn invoke(rt: &Runtime, value: &Value, key: &str, args: &[Value]) -> Completion {
    match get_property(rt, value, key)? {
        Value::Function(f) => f.call(value, args),
        _ => Err(Value::type_error(format!("{key} is not a function"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_values_compare_by_identity() {
        let f = Function::unary(Ok);
        let g = Function::unary(Ok);
        assert_eq!(Value::Function(f.clone()), Value::Function(f.clone()));
        assert_ne!(Value::Function(f), Value::Function(g));
        assert_eq!(Value::from(vec![Value::from(1)]), Value::from(vec![Value::from(1)]));
    }

    #[test]
    fn object_like_classification() {
        assert!(!Value::Null.is_object());
        assert!(!Value::from("then").is_object());
        assert!(Value::from(Vec::<Value>::new()).is_object());
        assert!(Value::error("boom").is_object());
        assert!(Value::Object(Object::new(PlainObject::new())).is_object());
    }

    #[test]
    fn missing_arguments_read_as_undefined() {
        let f = Function::new(|args| Ok(arg(args, 3)));
        assert_eq!(f.call(&Value::Undefined, &[]), Ok(Value::Undefined));
    }

    #[test]
    fn error_properties() {
        let rt = Runtime::new();
        let e = Value::error("x");
        assert_eq!(get_property(&rt, &e, "message"), Ok(Value::from("x")));
        assert_eq!(get_property(&rt, &e, "name"), Ok(Value::from("Error")));
        assert_eq!(get_property(&rt, &Value::from(3), "then"), Ok(Value::Undefined));
    }

    #[test]
    fn invoke_requires_a_function() {
        let rt = Runtime::new();
        let obj = Value::Object(Object::new(PlainObject::new().with("then", 4)));
        assert!(matches!(
            invoke(&rt, &obj, "then", &[]),
            Err(Value::Error(e)) if e.kind() == ErrorKind::TypeError
        ));
    }
}
