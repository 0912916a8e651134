use crate::host::ScriptHost;
use std::fmt;

/// A declarative unit of work: trigger and guard gate entry, steps run in
/// order, and drop can end an instance early before any step.
///
/// Plans are immutable once built. Moving a plan into another execution
/// context goes through [`Plan::rebind`], which leaves the original untouched.
pub struct Plan<H: ScriptHost> {
    pub name: String,
    /// Declared parameter names. Informational; nothing is bound to them.
    pub params: Vec<String>,
    pub trigger: Option<H::Closure>,
    pub guard: Option<H::Closure>,
    pub steps: Vec<H::Closure>,
    pub drop: Option<H::Closure>,
}

impl<H: ScriptHost> Plan<H> {
    pub fn new(name: impl Into<String>) -> Self {
        Plan {
            name: name.into(),
            params: Vec::new(),
            trigger: None,
            guard: None,
            steps: Vec::new(),
            drop: None,
        }
    }

    pub fn with_params(mut self, params: Vec<String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_trigger(mut self, trigger: Option<H::Closure>) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_guard(mut self, guard: Option<H::Closure>) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_steps(mut self, steps: Vec<H::Closure>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_drop(mut self, drop: Option<H::Closure>) -> Self {
        self.drop = drop;
        self
    }

    /// Shallow copy whose closures capture `host`'s global scope.
    pub fn rebind(&self, host: &H) -> Plan<H> {
        let globals = host.global_scope();
        let rebind = |c: &H::Closure| host.rebind_closure(c, &globals);
        Plan {
            name: self.name.clone(),
            params: self.params.clone(),
            trigger: self.trigger.as_ref().map(rebind),
            guard: self.guard.as_ref().map(rebind),
            steps: self.steps.iter().map(rebind).collect(),
            drop: self.drop.as_ref().map(rebind),
        }
    }
}

impl<H: ScriptHost> Clone for Plan<H> {
    fn clone(&self) -> Self {
        Plan {
            name: self.name.clone(),
            params: self.params.clone(),
            trigger: self.trigger.clone(),
            guard: self.guard.clone(),
            steps: self.steps.clone(),
            drop: self.drop.clone(),
        }
    }
}

impl<H: ScriptHost> fmt::Debug for Plan<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("has_trigger", &self.trigger.is_some())
            .field("has_guard", &self.guard.is_some())
            .field("steps", &self.steps.len())
            .field("has_drop", &self.drop.is_some())
            .finish()
    }
}
