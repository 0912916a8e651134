//! Scheduler configuration
//!
//! Defaults used when agents are created without explicit settings, loadable
//! from a TOML file:
//!
//! ```toml
//! max_concurrent = 2
//! poll_seconds = 5
//! ```

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest accepted slot, nudge or buffer count.
pub const MAX_COUNT: usize = tokio::sync::Semaphore::MAX_PERMITS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Dispatch slots per agent.
    pub max_concurrent: usize,
    /// Seconds between periodic scans.
    pub poll_seconds: u64,
    /// Buffered nudges before further ones coalesce.
    pub nudge_capacity: usize,
    /// Channel capacity for event subscribers created by hosts.
    pub event_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            poll_seconds: 3,
            nudge_capacity: 64,
            event_buffer: 128,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_seconds)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, AgentError> {
        let config: SchedulerConfig =
            toml::from_str(content).map_err(|e| AgentError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        let fields = [
            ("max_concurrent", self.max_concurrent as u64),
            ("poll_seconds", self.poll_seconds),
            ("nudge_capacity", self.nudge_capacity as u64),
            ("event_buffer", self.event_buffer as u64),
        ];
        if let Some((field, _)) = fields.iter().find(|(_, value)| *value == 0) {
            return Err(AgentError::Config(format!("{} must be at least 1", field)));
        }
        let counts = [
            ("max_concurrent", self.max_concurrent),
            ("nudge_capacity", self.nudge_capacity),
            ("event_buffer", self.event_buffer),
        ];
        match counts.iter().find(|(_, value)| *value > MAX_COUNT) {
            Some((field, _)) => Err(AgentError::Config(format!(
                "{} must be at most {}",
                field, MAX_COUNT
            ))),
            None => Ok(()),
        }
    }
}

/// Reads and validates a scheduler config file.
pub fn load_scheduler_config(path: impl AsRef<Path>) -> Result<SchedulerConfig, AgentError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| AgentError::Config(format!("{}: {}", path.display(), e)))?;
    SchedulerConfig::from_toml_str(&content)
}
