//! Values carried by promises
//!
//! Resolution and rejection payloads are ordered, variable-length sequences
//! of [`Value`]s. A value may itself be promise-shaped (a native [`Promise`]
//! or anything implementing [`Thenable`]); settlement adopts such values
//! instead of storing them.

use std::fmt;
use std::rc::Rc;

use crate::error::PromiseError;
use crate::promise::{Promise, Status};

/// Ordered resolution or rejection payload
pub type Values = Vec<Value>;

/// Result of a handler or executor. `Err` is a raised fault.
pub type Outcome<T = Values> = std::result::Result<T, Value>;

/// Build a [`Values`] from anything convertible into [`Value`].
///
/// ```
/// use coop_promise::{values, Value};
/// let v = values![1, "two", true];
/// assert_eq!(v[1], Value::from("two"));
/// ```
#[macro_export]
macro_rules! values {
    () => { $crate::Values::new() };
    ($($item:expr),+ $(,)?) => { vec![$($crate::Value::from($item)),+] };
}

/// Capability interface for promise-shaped values.
///
/// Anything that can attach a pair of settle callbacks can be adopted by a
/// promise. Foreign implementations do not participate in cancellation.
pub trait Thenable {
    /// Attach callbacks; exactly one of them must eventually be invoked
    /// at most once.
    fn then(&self, on_resolve: Box<dyn FnOnce(Values)>, on_reject: Box<dyn FnOnce(Values)>);
}

/// A value stored in or passed through a promise
#[derive(Clone)]
pub enum Value {
    /// Absence of a value
    Nil,
    /// Boolean value
    Bool(bool),
    /// Numeric value (IEEE 754 double)
    Number(f64),
    /// String value
    String(String),
    /// Ordered list (combinator results)
    Array(Vec<Value>),
    /// A terminal status tag (`all_settled`, `finally`)
    Status(Status),
    /// Structured fault
    Error(PromiseError),
    /// A native promise
    Promise(Promise),
    /// A foreign promise-shaped value
    Thenable(Rc<dyn Thenable>),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Whether settlement must adopt this value rather than store it
    pub fn is_promise_shaped(&self) -> bool {
        matches!(self, Value::Promise(_) | Value::Thenable(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&PromiseError> {
        match self {
            Value::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn as_status(&self) -> Option<Status> {
        match self {
            Value::Status(status) => Some(*status),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Turn a raised fault into a rejection value. Structured faults pass
    /// through; anything else becomes an `ExecutionError`.
    pub fn into_rejection(self) -> Value {
        match self {
            Value::Error(_) => self,
            other => Value::Error(PromiseError::execution(other.to_string())),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Status(a), Value::Status(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Promise(a), Value::Promise(b)) => a.id() == b.id(),
            (Value::Thenable(a), Value::Thenable(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Status(status) => write!(f, "{:?}", status),
            Value::Error(err) => write!(f, "{:?}", err),
            Value::Promise(p) => write!(f, "{}", p.id()),
            Value::Thenable(_) => write!(f, "[Thenable]"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => write!(f, "[{}]", format_values(items)),
            Value::Status(status) => write!(f, "{}", status),
            Value::Error(err) => write!(f, "{}", err),
            Value::Promise(p) => write!(f, "{}", p.id()),
            Value::Thenable(_) => write!(f, "[Thenable]"),
        }
    }
}

/// Comma-separated rendering of a payload
pub fn format_values(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
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
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Status> for Value {
    fn from(status: Status) -> Self {
        Value::Status(status)
    }
}

impl From<PromiseError> for Value {
    fn from(err: PromiseError) -> Self {
        Value::Error(err)
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}

impl From<&Promise> for Value {
    fn from(p: &Promise) -> Self {
        Value::Promise(p.clone())
    }
}
