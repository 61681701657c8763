use std::fmt;
use std::sync::Arc;

use crate::error::HostCallError;

/// A value crossing the host/script boundary.
///
/// Both engines convert their native values to and from this type, so host
/// code never has to know which runtime a script is written for.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Handle(HostHandle),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&HostHandle> {
        match self {
            Value::Handle(h) => Some(h),
            _ => None,
        }
    }

    /// Null or the empty string
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Str(s) => s.is_empty(),
            _ => false,
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
            (Value::Handle(a), Value::Handle(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Handle(h) => f.write_str(&h.describe()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

impl From<HostHandle> for Value {
    fn from(value: HostHandle) -> Self {
        Value::Handle(value)
    }
}

/// An object owned by the host that scripts may call methods on
pub trait HostObject: Send + Sync {
    /// Qualified type name, e.g. `irc::Channel`
    fn type_name(&self) -> &'static str;

    /// Methods callable through [`HostObject::call`]
    fn methods(&self) -> &'static [&'static str];

    fn call(&self, method: &str, args: &[Value]) -> Result<Value, HostCallError>;

    /// String form shown to scripts
    fn describe(&self) -> String;
}

/// Shared reference to a [`HostObject`]. Two handles are equal when they
/// point at the same object.
#[derive(Clone)]
pub struct HostHandle(Arc<dyn HostObject>);

impl HostHandle {
    pub fn new(object: impl HostObject + 'static) -> Self {
        Self(Arc::new(object))
    }

    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    pub fn methods(&self) -> &'static [&'static str] {
        self.0.methods()
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.0.methods().contains(&method)
    }

    pub fn call(&self, method: &str, args: &[Value]) -> Result<Value, HostCallError> {
        self.0.call(method, args)
    }

    pub fn describe(&self) -> String {
        self.0.describe()
    }
}

impl PartialEq for HostHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self.describe())
    }
}

// Argument helpers for HostObject implementations

pub(crate) fn str_arg<'a>(
    args: &'a [Value],
    index: usize,
    method: &str,
) -> Result<&'a str, HostCallError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| HostCallError::BadArgument {
            method: method.to_string(),
            index,
            expected: "a string",
        })
}

/// Optional string argument. Any non-string value is displayed.
pub(crate) fn opt_str_arg(args: &[Value], index: usize) -> String {
    match args.get(index) {
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Dummy;

    impl HostObject for Dummy {
        fn type_name(&self) -> &'static str {
            "test::Dummy"
        }

        fn methods(&self) -> &'static [&'static str] {
            &["ping"]
        }

        fn call(&self, method: &str, _args: &[Value]) -> Result<Value, HostCallError> {
            match method {
                "ping" => Ok("pong".into()),
                other => Err(HostCallError::NoSuchMethod {
                    type_name: self.type_name(),
                    method: other.to_string(),
                }),
            }
        }

        fn describe(&self) -> String {
            "dummy".to_string()
        }
    }

    #[test]
    fn test_handle_identity() {
        let a = HostHandle::new(Dummy);
        let b = a.clone();
        let c = HostHandle::new(Dummy);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.call("ping", &[]).unwrap(), Value::from("pong"));
        assert!(a.call("pong", &[]).is_err());
    }

    #[test]
    fn test_display_and_emptiness() {
        let list = Value::from(vec![Value::Int(1), Value::from("two"), Value::Null]);
        assert_eq!(list.to_string(), "[1, two, null]");
        assert!(Value::Null.is_empty());
        assert!(Value::from("").is_empty());
        assert!(!Value::Int(0).is_empty());
    }
}
