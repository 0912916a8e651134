//! Name-based directory of running agents for external controllers.

use crate::agent::{Agent, AgentInfo};
use crate::config::SchedulerConfig;
use crate::error::AgentError;
use crate::events::EventBus;
use crate::host::ScriptHost;
use crate::plan::Plan;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::info;

/// Owns every named agent together with the event bus they report to.
///
/// Each agent started here gets its own copy of the bootstrap context, so
/// agents never share interpreter state with each other or with the caller.
/// Lookups for unknown names are no-ops returning `false` or `None`.
pub struct AgentRegistry<H: ScriptHost> {
    agents: Mutex<HashMap<String, Agent<H>>>,
    events: EventBus,
    config: SchedulerConfig,
}

impl<H: ScriptHost> AgentRegistry<H> {
    pub fn new(events: EventBus) -> Self {
        Self::with_config(events, SchedulerConfig::default())
    }

    pub fn with_config(events: EventBus, config: SchedulerConfig) -> Self {
        AgentRegistry {
            agents: Mutex::new(HashMap::new()),
            events,
            config,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn agents(&self) -> MutexGuard<'_, HashMap<String, Agent<H>>> {
        self.agents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `plan` on the agent called `name` and makes sure it runs.
    ///
    /// An existing agent keeps its context and settings; the plan is rebound
    /// onto that context. Otherwise a new agent is built on a copy of
    /// `bootstrap` and only recorded once it has started.
    pub fn start(
        &self,
        name: &str,
        bootstrap: &H,
        plan: &Plan<H>,
        max_concurrent: usize,
        poll_interval: Duration,
    ) -> Result<(), AgentError> {
        let mut agents = self.agents();
        if let Some(agent) = agents.get(name) {
            agent.register(plan.rebind(agent.host()));
            return agent.start();
        }

        let agent = Agent::build(
            name.to_string(),
            bootstrap.clone_context(),
            max_concurrent,
            poll_interval,
            self.config.nudge_capacity,
            self.events.clone(),
        );
        agent.register(plan.rebind(agent.host()));
        agent.start()?;
        agents.insert(name.to_string(), agent);
        info!(agent = %name, plan = %plan.name, "registered agent");
        Ok(())
    }

    /// Stops and forgets the agent. Its beliefs are discarded.
    pub fn stop(&self, name: &str) -> bool {
        match self.agents().remove(name) {
            Some(agent) => {
                agent.stop();
                info!(agent = %name, "removed agent");
                true
            }
            None => false,
        }
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents().is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Agent<H>> {
        self.agents().get(name).cloned()
    }

    pub fn publish(&self, name: &str) -> bool {
        self.get(name).map(|agent| agent.publish()).is_some()
    }

    pub fn set_belief(&self, name: &str, key: &str, value: H::Value) -> bool {
        self.get(name)
            .map(|agent| agent.set_belief(key, value))
            .is_some()
    }

    pub fn belief(&self, name: &str, key: &str) -> Option<H::Value> {
        self.get(name).and_then(|agent| agent.belief(key))
    }

    pub fn beliefs(&self, name: &str) -> Option<HashMap<String, H::Value>> {
        self.get(name).map(|agent| agent.beliefs())
    }

    pub fn info(&self, name: &str) -> Option<AgentInfo> {
        self.get(name).map(|agent| agent.info())
    }

    /// Stops and removes every agent, returning how many there were.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<_> = self.agents().drain().collect();
        for (_, agent) in &drained {
            agent.stop();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "agent registry shut down");
        }
        drained.len()
    }
}

impl<H: ScriptHost> std::fmt::Debug for AgentRegistry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.list())
            .field("config", &self.config)
            .finish()
    }
}
