// Runtime value system for Chariot
// Represents values during execution (different from AST which represents parsed code)

use crate::ast::Expression;
use crate::runtime::environment::Scope;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::Runtime;
use indexmap::IndexMap;
use itertools::Itertools;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Map(IndexMap<String, Value>),
    Function(Arc<Closure>),
    Host(HostObject),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Function(_) => "function",
            Value::Host(host) => host.kind(),
        }
    }

    /// Coercion used for trigger/guard/drop style conditions: booleans as-is,
    /// numbers by non-zero, everything else false.
    pub fn as_condition(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0,
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Arc<Closure>> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Lossy conversion to JSON; functions and host objects become descriptive strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            other => serde_json::Value::String(other.to_string()),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Nil),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => write!(f, "[{}]", items.iter().join(", ")),
            Value::Map(map) => write!(
                f,
                "{{{}}}",
                map.iter().map(|(k, v)| format!("{}: {}", k, v)).join(", ")
            ),
            Value::Function(closure) => write!(f, "#<function/{}>", closure.params.len()),
            Value::Host(host) => write!(f, "#<{}>", host.kind()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
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

/// A user-defined function together with the scope it closed over.
#[derive(Clone)]
pub struct Closure {
    pub params: Vec<String>,
    pub body: Arc<Vec<Expression>>,
    pub scope: Scope,
}

impl Closure {
    pub fn new(params: Vec<String>, body: Arc<Vec<Expression>>, scope: Scope) -> Self {
        Closure {
            params,
            body,
            scope,
        }
    }

    /// Copy of this closure capturing `scope` instead; code is shared, not copied.
    pub fn rebind(&self, scope: Scope) -> Closure {
        Closure {
            params: self.params.clone(),
            body: Arc::clone(&self.body),
            scope,
        }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("params", &self.params)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Opaque host value carried through scripts (plans, agents, ...).
#[derive(Clone)]
pub struct HostObject {
    kind: &'static str,
    object: Arc<dyn Any + Send + Sync>,
}

impl HostObject {
    pub fn new<T: Any + Send + Sync>(kind: &'static str, object: T) -> Self {
        HostObject {
            kind,
            object: Arc::new(object),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObject({})", self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Range(usize, usize),
    Variadic(usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Fixed(n) => count == n,
            Arity::Range(min, max) => count >= min && count <= max,
            Arity::Variadic(min) => count >= min,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Fixed(n) => write!(f, "{}", n),
            Arity::Range(min, max) => write!(f, "{}..={}", min, max),
            Arity::Variadic(min) => write!(f, "at least {}", min),
        }
    }
}

/// What a builtin can see of its caller.
pub struct CallContext<'a> {
    pub runtime: &'a Runtime,
    pub scope: &'a Scope,
}

pub type BuiltinFn = dyn Fn(&CallContext<'_>, Vec<Value>) -> RuntimeResult<Value> + Send + Sync;

#[derive(Clone)]
pub struct BuiltinFunction {
    pub name: String,
    pub arity: Arity,
    pub func: Arc<BuiltinFn>,
}

impl BuiltinFunction {
    pub fn new<F>(name: &str, arity: Arity, func: F) -> Self
    where
        F: Fn(&CallContext<'_>, Vec<Value>) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        BuiltinFunction {
            name: name.to_string(),
            arity,
            func: Arc::new(func),
        }
    }

    /// Checks arity, then runs the builtin.
    pub fn invoke(&self, ctx: &CallContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
        if !self.arity.accepts(args.len()) {
            return Err(RuntimeError::ArityMismatch {
                function: self.name.clone(),
                expected: self.arity.to_string(),
                actual: args.len(),
            });
        }
        (self.func)(ctx, args)
    }
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}
