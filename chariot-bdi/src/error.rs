use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by plan execution and agent lifecycle operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A step closure failed; remaining steps of that instance were skipped.
    #[error("step {step} failed: {source}")]
    StepFailed {
        step: usize,
        #[source]
        source: BoxError,
    },

    /// The agent was stopped while the instance was between steps.
    #[error("plan instance cancelled")]
    Cancelled,

    #[error("agent start requires a running tokio runtime")]
    NoAsyncRuntime,

    #[error("invalid scheduler configuration: {0}")]
    Config(String),
}

impl AgentError {
    pub fn step_failed<E>(step: usize, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        AgentError::StepFailed {
            step,
            source: source.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}
