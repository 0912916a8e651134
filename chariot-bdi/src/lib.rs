//! BDI-style plan/agent scheduler for Chariot scripts.
//!
//! A [`Plan`] bundles trigger, guard and drop predicates with an ordered list
//! of steps. An [`Agent`] owns an execution context and periodically (or when
//! nudged) evaluates its plans, dispatching the ones whose trigger and guard
//! hold onto a bounded pool. Lifecycle events go out through an [`EventBus`];
//! the [`AgentRegistry`] gives external controllers name-based access.
//!
//! The scheduler is generic over [`ScriptHost`]; [`builtins`] binds it to
//! `chariot::Runtime` and exposes it to scripts.

pub mod agent;
pub mod builtins;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod host;
pub mod plan;
pub mod registry;

pub use agent::{Agent, AgentInfo, RunContext};
pub use builtins::{register_plan_functions, ScriptAgent, ScriptPlan, ScriptRegistry};
pub use config::{load_scheduler_config, SchedulerConfig, MAX_COUNT};
pub use error::AgentError;
pub use events::{AgentEvent, EventBus, EventStatus, EventSubscription, EventType};
pub use execution::RunMode;
pub use host::ScriptHost;
pub use plan::Plan;
pub use registry::AgentRegistry;
