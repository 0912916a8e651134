// Runtime system for Chariot
// Scopes, values, the evaluator and the builtin table

pub mod environment;
pub mod error;
pub mod evaluator;
pub mod stdlib;
pub mod values;

pub use environment::Scope;
pub use error::{RuntimeError, RuntimeResult};
pub use values::{Arity, BuiltinFunction, CallContext, Closure, HostObject, Value};

use crate::ast::Expression;
use crate::parser;
use stdlib::StandardLibrary;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A Chariot interpreter instance.
///
/// `Runtime` is a handle: clones share the same global scope and builtin
/// table. Use [`Runtime::clone_runtime`] for an independent copy.
#[derive(Clone)]
pub struct Runtime {
    state: Arc<RuntimeState>,
}

struct RuntimeState {
    globals: Scope,
    builtins: RwLock<HashMap<String, BuiltinFunction>>,
}

impl Runtime {
    /// Runtime with the standard library loaded.
    pub fn new() -> Self {
        let runtime = Self::bare();
        StandardLibrary::load(&runtime);
        runtime
    }

    /// Runtime with no builtins at all.
    pub fn bare() -> Self {
        Runtime {
            state: Arc::new(RuntimeState {
                globals: Scope::new(),
                builtins: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn globals(&self) -> &Scope {
        &self.state.globals
    }

    /// Registers (or replaces) a builtin.
    pub fn register_builtin(&self, builtin: BuiltinFunction) {
        self.state
            .builtins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(builtin.name.clone(), builtin);
    }

    pub fn builtin(&self, name: &str) -> Option<BuiltinFunction> {
        self.state
            .builtins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn has_builtin(&self, name: &str) -> bool {
        self.state
            .builtins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Parses and evaluates `source` in the global scope, returning the last value.
    pub fn run_source(&self, source: &str) -> RuntimeResult<Value> {
        let program = parser::parse(source)?;
        evaluator::eval_block(self, &program, self.globals())
    }

    pub fn eval(&self, expr: &Expression, scope: &Scope) -> RuntimeResult<Value> {
        evaluator::eval(self, expr, scope)
    }

    pub fn call_closure(&self, closure: &Closure, args: Vec<Value>) -> RuntimeResult<Value> {
        evaluator::call_closure(self, closure, args)
    }

    /// Calls any function value: closures directly, anything else is an error.
    pub fn call_value(&self, callee: &Value, args: Vec<Value>) -> RuntimeResult<Value> {
        match callee {
            Value::Function(closure) => self.call_closure(closure, args),
            other => Err(RuntimeError::NotCallable(other.type_name().to_string())),
        }
    }

    /// Runs a closure body directly in `scope`, without a fresh frame and
    /// without binding parameters.
    pub fn execute_in_scope(&self, closure: &Closure, scope: &Scope) -> RuntimeResult<Value> {
        evaluator::eval_block(self, &closure.body, scope)
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.globals().get(name)
    }

    pub fn set_global(&self, name: &str, value: Value) {
        self.globals().define(name, value);
    }

    /// Independent copy of this runtime.
    ///
    /// Global bindings are copied into a fresh global scope, and closures that
    /// captured the old global scope are rebound to the new one. Builtins are
    /// shared by reference. Mutations in either runtime are invisible to the other.
    pub fn clone_runtime(&self) -> Runtime {
        let copy = Runtime::bare();
        let old_globals = self.globals();
        for (name, value) in self.globals().snapshot() {
            let value = rebind_value(value, old_globals, copy.globals());
            copy.globals().define(name, value);
        }
        {
            let builtins = self
                .state
                .builtins
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let mut target = copy
                .state
                .builtins
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            target.extend(builtins.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        copy
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("globals", &self.globals().local_names())
            .finish()
    }
}

fn rebind_value(value: Value, from: &Scope, to: &Scope) -> Value {
    match value {
        Value::Function(closure) if closure.scope.ptr_eq(from) => {
            Value::Function(Arc::new(closure.rebind(to.clone())))
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| rebind_value(v, from, to))
                .collect(),
        ),
        Value::Map(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (k, rebind_value(v, from, to)))
                .collect(),
        ),
        other => other,
    }
}
