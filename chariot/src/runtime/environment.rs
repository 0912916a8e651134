// Environment for variable bindings and scope management

use crate::runtime::values::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// A variable scope in the scope chain.
///
/// `Scope` is a cheap handle: clones share the same frame, so a binding made
/// through one handle is visible through every other. Lookups walk the parent
/// chain; writes only ever touch a single frame.
#[derive(Clone)]
pub struct Scope {
    frame: Arc<Frame>,
}

struct Frame {
    parent: Option<Scope>,
    bindings: RwLock<HashMap<String, Value>>,
}

impl Scope {
    /// Creates a new, empty root scope.
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<Scope>) -> Self {
        Scope {
            frame: Arc::new(Frame {
                parent,
                bindings: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Creates a new child scope that inherits from this one.
    pub fn child(&self) -> Scope {
        Self::with_parent(Some(self.clone()))
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.frame.parent.as_ref()
    }

    /// Looks up a symbol by searching this frame and then its parents.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some(value) = current.read_bindings().get(name) {
                return Some(value.clone());
            }
            scope = current.parent();
        }
        None
    }

    /// Defines a new variable or updates an existing one in this frame only.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.frame
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value);
    }

    /// Updates `name` in the nearest frame that already binds it, or defines it
    /// in this frame when no frame does.
    pub fn assign(&self, name: &str, value: Value) {
        let mut scope = Some(self);
        while let Some(current) = scope {
            let mut bindings = current
                .frame
                .bindings
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = bindings.get_mut(name) {
                *slot = value;
                return;
            }
            drop(bindings);
            scope = current.parent();
        }
        self.define(name, value);
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.read_bindings().contains_key(name)
    }

    pub fn remove_local(&self, name: &str) -> Option<Value> {
        self.frame
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Names bound in this frame, sorted.
    pub fn local_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_bindings().keys().cloned().collect();
        names.sort();
        names
    }

    /// Copy of this frame's bindings (parents excluded).
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.read_bindings().clone()
    }

    /// Whether two handles refer to the same frame.
    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.frame, &other.frame)
    }

    fn read_bindings(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Value>> {
        self.frame
            .bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("bindings", &self.local_names())
            .field("has_parent", &self.frame.parent.is_some())
            .finish()
    }
}
