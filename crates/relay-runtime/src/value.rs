//! Host value model
//!
//! `Value` is what callbacks receive and return. `Callable` is the single
//! polymorphic capability the dispatcher depends on; closures, bound methods
//! and plain functions are adapted onto the [`Invocable`] trait.

use crate::ffi::caller::ForeignFunction;
use crate::ffi::memory::{Pointer, StructValue};
use crate::ffi::FfiError;
use std::fmt;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Errors raised by host callables
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    /// Raised explicitly by host code
    #[error("{0}")]
    Raised(String),
    /// Argument of the wrong host type
    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },
    /// A foreign call made from inside the callable failed
    #[error("Foreign call failed: {0}")]
    Foreign(Box<FfiError>),
}

impl HostError {
    pub fn raised(msg: impl Into<String>) -> Self {
        HostError::Raised(msg.into())
    }
}

impl From<FfiError> for HostError {
    fn from(e: FfiError) -> Self {
        HostError::Foreign(Box::new(e))
    }
}

/// Host-side value crossing the native boundary
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    /// Integers are wide enough for every native width in both signedness
    Int(i128),
    Float(f64),
    Str(Arc<str>),
    Pointer(Pointer),
    Struct(StructValue),
    Callable(Callable),
    /// Native function pointer with a known signature
    Function(ForeignFunction),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Host type name, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Pointer(_) => "pointer",
            Value::Struct(_) => "struct",
            Value::Callable(_) => "callable",
            Value::Function(_) => "function",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<Pointer> {
        match self {
            Value::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    /// Call a callable or foreign function value
    pub fn call(&self, args: &[Value]) -> Result<Value, HostError> {
        match self {
            Value::Callable(c) => c.call(args),
            Value::Function(f) => f.call(args).map_err(HostError::from),
            other => Err(HostError::TypeError {
                expected: "callable".to_string(),
                got: other.type_name().to_string(),
            }),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Pointer(p) => write!(f, "{:?}", p),
            Value::Struct(s) => write!(f, "{:?}", s),
            Value::Callable(c) => write!(f, "{:?}", c),
            Value::Function(func) => write!(f, "{:?}", func),
        }
    }
}

// Callables and functions compare by identity, structs by storage
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a.same_storage(b),
            (Value::Callable(a), Value::Callable(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! int_into_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(v as i128)
            }
        })*
    };
}

int_into_value!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize);

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<Callable> for Value {
    fn from(c: Callable) -> Self {
        Value::Callable(c)
    }
}

/// The capability every host callable kind provides
pub trait Invocable: Send + Sync {
    fn invoke(&self, args: &[Value]) -> Result<Value, HostError>;

    /// Short description for logs
    fn describe(&self) -> String {
        "callable".to_string()
    }
}

struct ClosureAdapter<F>(F);

impl<F> Invocable for ClosureAdapter<F>
where
    F: Fn(&[Value]) -> Result<Value, HostError> + Send + Sync,
{
    fn invoke(&self, args: &[Value]) -> Result<Value, HostError> {
        (self.0)(args)
    }

    fn describe(&self) -> String {
        "closure".to_string()
    }
}

/// Method body taking its receiver explicitly
pub type MethodFn = fn(&Value, &[Value]) -> Result<Value, HostError>;

struct MethodAdapter {
    receiver: Value,
    name: String,
    method: MethodFn,
}

impl Invocable for MethodAdapter {
    fn invoke(&self, args: &[Value]) -> Result<Value, HostError> {
        (self.method)(&self.receiver, args)
    }

    fn describe(&self) -> String {
        format!("method {}", self.name)
    }
}

/// Plain function taking only its arguments
pub type PlainFn = fn(&[Value]) -> Result<Value, HostError>;

struct FunctionAdapter(PlainFn);

impl Invocable for FunctionAdapter {
    fn invoke(&self, args: &[Value]) -> Result<Value, HostError> {
        (self.0)(args)
    }

    fn describe(&self) -> String {
        "function".to_string()
    }
}

/// Identity of a callable allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallableId(usize);

/// Reference-counted host callable
///
/// Cloning shares identity: every clone binds to the same trampolines.
#[derive(Clone)]
pub struct Callable(Arc<dyn Invocable>);

impl Callable {
    /// Wrap a closure
    pub fn from_closure<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, HostError> + Send + Sync + 'static,
    {
        Callable(Arc::new(ClosureAdapter(f)))
    }

    /// Bind a method to its receiver
    pub fn method(receiver: Value, name: impl Into<String>, method: MethodFn) -> Self {
        Callable(Arc::new(MethodAdapter {
            receiver,
            name: name.into(),
            method,
        }))
    }

    /// Wrap a plain function
    pub fn function(f: PlainFn) -> Self {
        Callable(Arc::new(FunctionAdapter(f)))
    }

    /// Wrap a custom invocable
    pub fn from_invocable(inner: Arc<dyn Invocable>) -> Self {
        Callable(inner)
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, HostError> {
        self.0.invoke(args)
    }

    pub fn id(&self) -> CallableId {
        CallableId(Arc::as_ptr(&self.0) as *const () as usize)
    }

    pub fn downgrade(&self) -> WeakCallable {
        WeakCallable(Arc::downgrade(&self.0))
    }

    pub fn describe(&self) -> String {
        self.0.describe()
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Callable {}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {:#x}>", self.0.describe(), self.id().0)
    }
}

/// Non-owning callable handle
///
/// A live `WeakCallable` keeps the allocation (and therefore the identity)
/// reserved even after the callable itself has been dropped.
#[derive(Clone)]
pub struct WeakCallable(Weak<dyn Invocable>);

impl WeakCallable {
    pub fn upgrade(&self) -> Option<Callable> {
        self.0.upgrade().map(Callable)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_invocation() {
        let c = Callable::from_closure(|args| Ok(Value::Int(args.len() as i128)));
        assert_eq!(c.call(&[Value::Nil, Value::Nil]).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_method_receives_receiver() {
        fn perform(receiver: &Value, args: &[Value]) -> Result<Value, HostError> {
            let base = receiver.as_int().unwrap_or(0);
            let n = args.first().and_then(Value::as_int).unwrap_or(0);
            Ok(Value::Int(base + n))
        }
        let m = Callable::method(Value::Int(100), "perform", perform);
        assert_eq!(m.call(&[Value::Int(5)]).unwrap(), Value::Int(105));
        assert_eq!(m.describe(), "method perform");
    }

    #[test]
    fn test_plain_function() {
        fn twice(args: &[Value]) -> Result<Value, HostError> {
            match args.first() {
                Some(Value::Int(n)) => Ok(Value::Int(n * 2)),
                other => Err(HostError::TypeError {
                    expected: "integer".to_string(),
                    got: other.map_or("nothing", Value::type_name).to_string(),
                }),
            }
        }
        let f = Callable::function(twice);
        assert_eq!(f.call(&[Value::Int(21)]).unwrap(), Value::Int(42));
        assert!(f.call(&[Value::Nil]).is_err());
    }

    #[test]
    fn test_identity_shared_by_clones() {
        let a = Callable::from_closure(|_| Ok(Value::Nil));
        let b = a.clone();
        let c = Callable::from_closure(|_| Ok(Value::Nil));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_weak_callable_liveness() {
        let a = Callable::from_closure(|_| Ok(Value::Nil));
        let weak = a.downgrade();
        assert!(weak.is_alive());
        assert_eq!(weak.upgrade(), Some(a.clone()));
        drop(a);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_value_call_rejects_non_callable() {
        let err = Value::Int(1).call(&[]).unwrap_err();
        assert!(matches!(err, HostError::TypeError { .. }));
    }
}
