//! Running a single plan instance.

use crate::agent::{Agent, RunContext};
use crate::error::AgentError;
use crate::events::{AgentEvent, EventStatus};
use crate::host::ScriptHost;
use crate::plan::Plan;
use std::fmt;
use std::str::FromStr;

/// Which gates [`Agent::run_plan_once_with_options`] checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Trigger and guard must pass; drop is respected.
    #[default]
    Bdi,
    /// Trigger skipped.
    GuardOnly,
    /// Trigger and guard skipped; drop still respected.
    Force,
    /// Nothing is checked.
    ForceAll,
    /// Check as `Bdi`, but never run a step.
    DryRun,
}

impl RunMode {
    /// Lenient parse: case and surrounding whitespace are ignored, and
    /// anything unrecognized means `Bdi`.
    pub fn parse_lenient(mode: &str) -> RunMode {
        mode.parse().unwrap_or_default()
    }

    fn checks_trigger(self) -> bool {
        matches!(self, RunMode::Bdi | RunMode::DryRun)
    }

    fn checks_guard(self) -> bool {
        matches!(self, RunMode::Bdi | RunMode::GuardOnly | RunMode::DryRun)
    }

    fn respects_drop(self) -> bool {
        !matches!(self, RunMode::ForceAll)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Bdi => "bdi",
            RunMode::GuardOnly => "guard-only",
            RunMode::Force => "force",
            RunMode::ForceAll => "force-all",
            RunMode::DryRun => "dry-run",
        }
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "bdi" => Ok(RunMode::Bdi),
            "guard-only" => Ok(RunMode::GuardOnly),
            "force" => Ok(RunMode::Force),
            "force-all" => Ok(RunMode::ForceAll),
            "dry-run" => Ok(RunMode::DryRun),
            other => Err(format!("unknown run mode '{}'", other)),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<H: ScriptHost> Agent<H> {
    /// Runs every step of `plan` once in a fresh instance scope. Trigger and
    /// guard are not checked; the scheduler has already done so.
    pub fn run_plan_once(&self, plan: &Plan<H>) -> Result<(), AgentError> {
        self.run_plan_once_with_context(plan, &self.run_context())
    }

    /// Like [`Agent::run_plan_once`], but observes `ctx` instead of the
    /// agent's current context.
    pub fn run_plan_once_with_context(
        &self,
        plan: &Plan<H>,
        ctx: &RunContext,
    ) -> Result<(), AgentError> {
        let scope = self.instance_scope();
        self.emit(AgentEvent::plan(self.name(), &plan.name, EventStatus::Start));
        if let StepsOutcome::Completed { .. } = self.execute_steps(plan, &scope, true, ctx)? {
            self.emit(AgentEvent::plan(self.name(), &plan.name, EventStatus::Finish));
        }
        Ok(())
    }

    /// Runs `plan` once under `mode`, seeding the instance scope with `vars`.
    ///
    /// Returns `Ok(false)` when the gates were not met or the plan was dropped
    /// before any step ran, and `Ok(true)` otherwise. In `DryRun` mode
    /// `Ok(true)` means the plan would have run.
    pub fn run_plan_once_with_options<I>(
        &self,
        plan: &Plan<H>,
        vars: I,
        mode: RunMode,
    ) -> Result<bool, AgentError>
    where
        I: IntoIterator<Item = (String, H::Value)>,
    {
        let scope = self.instance_scope();
        for (name, value) in vars {
            self.inner.host.set_in_scope(&scope, &name, value);
        }

        if mode.checks_trigger() && !self.check(plan.trigger.as_ref(), "trigger") {
            return Ok(false);
        }
        if mode.checks_guard() && !self.check(plan.guard.as_ref(), "guard") {
            return Ok(false);
        }
        if mode == RunMode::DryRun {
            return Ok(true);
        }

        let ctx = self.run_context();
        self.emit(AgentEvent::plan(self.name(), &plan.name, EventStatus::Start));
        let executed = match self.execute_steps(plan, &scope, mode.respects_drop(), &ctx)? {
            StepsOutcome::Completed { executed } => executed,
            StepsOutcome::Dropped { executed } => return Ok(executed),
        };
        self.emit(AgentEvent::plan(self.name(), &plan.name, EventStatus::Finish));
        Ok(executed)
    }

    fn instance_scope(&self) -> H::Scope {
        let host = &self.inner.host;
        host.new_child_scope(&host.global_scope())
    }

    fn emit(&self, event: AgentEvent) {
        self.inner.events.broadcast(event);
    }

    /// The step loop shared by both entry points. Emits step events and, on
    /// drop or cancellation, the plan-level event that ends the instance.
    fn execute_steps(
        &self,
        plan: &Plan<H>,
        scope: &H::Scope,
        respect_drop: bool,
        ctx: &RunContext,
    ) -> Result<StepsOutcome, AgentError> {
        let agent = self.name();
        let mut executed = false;
        for (index, step) in plan.steps.iter().enumerate() {
            if respect_drop && self.check(plan.drop.as_ref(), "drop") {
                self.emit(AgentEvent::plan(agent, &plan.name, EventStatus::Drop).at_step(index));
                return Ok(StepsOutcome::Dropped { executed });
            }

            self.emit(AgentEvent::step(agent, &plan.name, index, EventStatus::Start));
            let result = {
                let _exec = self.exec_guard();
                self.inner.host.execute_in_scope(step, scope)
            };
            if let Err(err) = result {
                self.emit(
                    AgentEvent::step(agent, &plan.name, index, EventStatus::Error)
                        .with_error(err.to_string()),
                );
                return Err(AgentError::step_failed(index, err));
            }
            executed = true;
            self.emit(AgentEvent::step(agent, &plan.name, index, EventStatus::Finish));

            if ctx.is_cancelled() {
                self.emit(AgentEvent::plan(agent, &plan.name, EventStatus::Cancel));
                return Err(AgentError::Cancelled);
            }
        }
        Ok(StepsOutcome::Completed { executed })
    }
}

enum StepsOutcome {
    Completed { executed: bool },
    Dropped { executed: bool },
}
