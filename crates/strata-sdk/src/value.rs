//! Guest value representation.
//!
//! `Value` is the engine-neutral representation of a guest-visible value.
//! Primitives are stored inline; strings, lists, and host objects are
//! reference-counted so values can be shared across threads and contexts.

use crate::error::{InteropError, InteropResult};
use crate::host::HostRef;
use std::sync::Arc;

/// A guest-visible value.
///
/// # Thread Safety
///
/// `Value` is `Send + Sync`. Heap-backed variants share their payload via
/// `Arc`; cloning a value never deep-copies.
#[derive(Clone)]
pub enum Value {
    /// Absent value
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer (all guest integer widths normalize here)
    Int(i64),
    /// 64-bit float (all guest float widths normalize here)
    Float(f64),
    /// Immutable string
    Str(Arc<str>),
    /// Immutable list of values
    List(Arc<Vec<Value>>),
    /// A host object exposed to guest code
    Host(HostRef),
}

impl Value {
    /// Create a string value
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    /// Create a list value
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }

    /// Create a host object value
    pub fn host(obj: HostRef) -> Self {
        Value::Host(obj)
    }

    /// Name of this value's type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Host(_) => "host-object",
        }
    }

    /// True if this value is `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Extract a boolean
    pub fn as_bool(&self) -> InteropResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(type_mismatch("bool", other)),
        }
    }

    /// Extract an integer
    pub fn as_int(&self) -> InteropResult<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(type_mismatch("int", other)),
        }
    }

    /// Extract a float; integers widen losslessly where possible
    pub fn as_float(&self) -> InteropResult<f64> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            other => Err(type_mismatch("float", other)),
        }
    }

    /// Extract a string slice
    pub fn as_str(&self) -> InteropResult<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(type_mismatch("string", other)),
        }
    }

    /// Extract a list
    pub fn as_list(&self) -> InteropResult<&[Value]> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(type_mismatch("list", other)),
        }
    }

    /// Extract a host object reference
    pub fn as_host(&self) -> InteropResult<&HostRef> {
        match self {
            Value::Host(h) => Ok(h),
            other => Err(type_mismatch("host-object", other)),
        }
    }

    /// True if this value wraps an engine-internal host object that must
    /// never cross a guest/host boundary.
    pub fn is_engine_internal(&self) -> bool {
        match self {
            Value::Host(h) => h.is_engine_internal(),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Host(h) => write!(f, "<host {}>", h.class_name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            // Host objects compare by identity
            (Value::Host(a), Value::Host(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s.as_str()))
    }
}

fn type_mismatch(expected: &str, got: &Value) -> InteropError {
    InteropError::TypeMismatch {
        expected: expected.to_string(),
        got: got.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_accessors() {
        assert!(Value::Bool(true).as_bool().unwrap());
        assert_eq!(Value::Int(42).as_int().unwrap(), 42);
        assert_eq!(Value::Float(1.5).as_float().unwrap(), 1.5);
        assert_eq!(Value::from("hi").as_str().unwrap(), "hi");
    }

    #[test]
    fn test_int_widens_to_float() {
        assert_eq!(Value::Int(3).as_float().unwrap(), 3.0);
    }

    #[test]
    fn test_type_mismatch() {
        let err = Value::Int(1).as_bool().unwrap_err();
        match err {
            InteropError::TypeMismatch { expected, got } => {
                assert_eq!(expected, "bool");
                assert_eq!(got, "int");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_list_value() {
        let v = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(v.as_list().unwrap().len(), 2);
        assert_eq!(v.type_name(), "list");
    }

    #[test]
    fn test_equality() {
        assert_eq!(Value::Int(1), Value::Int(1));
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::from("a"), Value::from("a"));
        assert_eq!(Value::Null, Value::Null);
    }
}
