//! The seam between the scheduler and the script interpreter.
//!
//! The scheduler never looks inside closures or values. Everything it needs
//! from an interpreter is expressed by [`ScriptHost`], and `chariot::Runtime`
//! is the implementation used by the script-facing builtins.

use chariot::runtime::{Closure, Runtime, RuntimeError, Scope, Value};
use std::sync::Arc;

/// Execution context a plan's closures are evaluated against.
///
/// Implementations are cheap handles (`Clone`) that may be shared across
/// threads; the agent serializes every evaluation against one context.
pub trait ScriptHost: Clone + Send + Sync + 'static {
    type Closure: Clone + Send + Sync + 'static;
    type Scope: Clone + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Evaluates a zero-argument predicate. An absent closure is `false`.
    fn evaluate_boolean(&self, closure: Option<&Self::Closure>) -> Result<bool, Self::Error>;

    /// Runs the closure body with `scope` as the current frame.
    fn execute_in_scope(
        &self,
        closure: &Self::Closure,
        scope: &Self::Scope,
    ) -> Result<Self::Value, Self::Error>;

    fn global_scope(&self) -> Self::Scope;

    fn new_child_scope(&self, parent: &Self::Scope) -> Self::Scope;

    fn set_in_scope(&self, scope: &Self::Scope, name: &str, value: Self::Value);

    /// Independent copy of this context (globals and functions).
    fn clone_context(&self) -> Self;

    /// Same code, captured scope replaced by `scope`.
    fn rebind_closure(&self, closure: &Self::Closure, scope: &Self::Scope) -> Self::Closure;
}

impl ScriptHost for Runtime {
    type Closure = Arc<Closure>;
    type Scope = Scope;
    type Value = Value;
    type Error = RuntimeError;

    fn evaluate_boolean(&self, closure: Option<&Arc<Closure>>) -> Result<bool, RuntimeError> {
        match closure {
            Some(closure) => Ok(self.call_closure(closure, Vec::new())?.as_condition()),
            None => Ok(false),
        }
    }

    fn execute_in_scope(&self, closure: &Arc<Closure>, scope: &Scope) -> Result<Value, RuntimeError> {
        Runtime::execute_in_scope(self, closure, scope)
    }

    fn global_scope(&self) -> Scope {
        self.globals().clone()
    }

    fn new_child_scope(&self, parent: &Scope) -> Scope {
        parent.child()
    }

    fn set_in_scope(&self, scope: &Scope, name: &str, value: Value) {
        scope.define(name, value);
    }

    fn clone_context(&self) -> Self {
        self.clone_runtime()
    }

    fn rebind_closure(&self, closure: &Arc<Closure>, scope: &Scope) -> Arc<Closure> {
        Arc::new(closure.rebind(scope.clone()))
    }
}
