//! Agents: a plan set, an execution context, a belief store and the loop
//! that keeps re-checking plans against it.

use crate::config::{SchedulerConfig, MAX_COUNT};
use crate::error::AgentError;
use crate::events::EventBus;
use crate::host::ScriptHost;
use crate::plan::Plan;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_NUDGE_CAPACITY: usize = 64;

/// Cancellation signal observed by a plan instance between steps.
///
/// The default context is never cancelled.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    cancel: Option<watch::Receiver<bool>>,
}

impl RunContext {
    pub fn background() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }
}

/// Point-in-time description of an agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub name: String,
    pub plans: Vec<String>,
    pub running: bool,
    pub poll_seconds: f64,
    pub belief_count: usize,
    pub max_concurrent: usize,
}

struct Lifecycle {
    running: bool,
    cancel: Option<watch::Sender<bool>>,
    context: RunContext,
}

pub(crate) struct AgentInner<H: ScriptHost> {
    pub(crate) name: String,
    pub(crate) host: H,
    plans: RwLock<Vec<Arc<Plan<H>>>>,
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    poll_interval: Duration,
    nudge_tx: mpsc::Sender<()>,
    nudge_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<()>>>,
    /// Held for every closure evaluation against `host`.
    exec_lock: Mutex<()>,
    beliefs: RwLock<HashMap<String, H::Value>>,
    lifecycle: Mutex<Lifecycle>,
    pub(crate) events: EventBus,
}

/// Handle to an agent. Clones refer to the same agent.
pub struct Agent<H: ScriptHost> {
    pub(crate) inner: Arc<AgentInner<H>>,
}

impl<H: ScriptHost> Clone for Agent<H> {
    fn clone(&self) -> Self {
        Agent {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: ScriptHost> Agent<H> {
    /// Creates a stopped agent. `max_concurrent` is clamped to
    /// `1..=MAX_COUNT` and a zero poll interval becomes
    /// [`DEFAULT_POLL_INTERVAL`].
    pub fn new(
        name: impl Into<String>,
        host: H,
        max_concurrent: usize,
        poll_interval: Duration,
        events: EventBus,
    ) -> Self {
        Self::build(
            name.into(),
            host,
            max_concurrent,
            poll_interval,
            DEFAULT_NUDGE_CAPACITY,
            events,
        )
    }

    pub fn from_config(
        name: impl Into<String>,
        host: H,
        config: &SchedulerConfig,
        events: EventBus,
    ) -> Self {
        Self::build(
            name.into(),
            host,
            config.max_concurrent,
            config.poll_interval(),
            config.nudge_capacity,
            events,
        )
    }

    pub(crate) fn build(
        name: String,
        host: H,
        max_concurrent: usize,
        poll_interval: Duration,
        nudge_capacity: usize,
        events: EventBus,
    ) -> Self {
        let max_concurrent = max_concurrent.clamp(1, MAX_COUNT);
        let poll_interval = if poll_interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            poll_interval
        };
        let (nudge_tx, nudge_rx) = mpsc::channel(nudge_capacity.clamp(1, MAX_COUNT));
        Agent {
            inner: Arc::new(AgentInner {
                name,
                host,
                plans: RwLock::new(Vec::new()),
                slots: Arc::new(Semaphore::new(max_concurrent)),
                max_concurrent,
                poll_interval,
                nudge_tx,
                nudge_rx: Arc::new(tokio::sync::Mutex::new(nudge_rx)),
                exec_lock: Mutex::new(()),
                beliefs: RwLock::new(HashMap::new()),
                lifecycle: Mutex::new(Lifecycle {
                    running: false,
                    cancel: None,
                    context: RunContext::background(),
                }),
                events,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn host(&self) -> &H {
        &self.inner.host
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle().running
    }

    /// Adds `plan` unless a plan with the same name is already registered.
    /// Returns whether the plan was added.
    pub fn register(&self, plan: impl Into<Arc<Plan<H>>>) -> bool {
        let plan = plan.into();
        let mut plans = self
            .inner
            .plans
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if plans.iter().any(|p| p.name == plan.name) {
            debug!(agent = %self.inner.name, plan = %plan.name, "plan already registered");
            return false;
        }
        plans.push(plan);
        true
    }

    pub fn plan_count(&self) -> usize {
        self.inner
            .plans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn plan_names(&self) -> Vec<String> {
        self.plans_snapshot()
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    fn plans_snapshot(&self) -> Vec<Arc<Plan<H>>> {
        self.inner
            .plans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wakes the scheduling loop. Nudges coalesce when the buffer is full.
    pub fn publish(&self) {
        let _ = self.inner.nudge_tx.try_send(());
    }

    /// Writes a belief and nudges the loop.
    pub fn set_belief(&self, key: impl Into<String>, value: H::Value) {
        self.inner
            .beliefs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
        self.publish();
    }

    pub fn belief(&self, key: &str) -> Option<H::Value> {
        self.inner
            .beliefs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Copy of the belief store.
    pub fn beliefs(&self) -> HashMap<String, H::Value> {
        self.inner
            .beliefs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            name: self.inner.name.clone(),
            plans: self.plan_names(),
            running: self.is_running(),
            poll_seconds: self.inner.poll_interval.as_secs_f64(),
            belief_count: self
                .inner
                .beliefs
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            max_concurrent: self.inner.max_concurrent,
        }
    }

    /// Starts the scheduling loop on the ambient tokio runtime. Starting a
    /// running agent is a no-op.
    pub fn start(&self) -> Result<(), AgentError> {
        let handle = Handle::try_current().map_err(|_| AgentError::NoAsyncRuntime)?;
        let cancelled = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.running {
                return Ok(());
            }
            let (tx, rx) = watch::channel(false);
            lifecycle.running = true;
            lifecycle.cancel = Some(tx);
            lifecycle.context = RunContext {
                cancel: Some(rx.clone()),
            };
            rx
        };
        info!(
            agent = %self.inner.name,
            max_concurrent = self.inner.max_concurrent,
            poll_ms = self.inner.poll_interval.as_millis() as u64,
            "agent started"
        );
        let agent = self.clone();
        handle.spawn(async move { agent.scheduling_loop(cancelled).await });
        Ok(())
    }

    /// Cancels the loop. In-flight instances stop after their current step.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle();
        if !lifecycle.running {
            return;
        }
        if let Some(cancel) = lifecycle.cancel.take() {
            cancel.send_replace(true);
        }
        lifecycle.running = false;
        lifecycle.context = RunContext::background();
        info!(agent = %self.inner.name, "agent stopped");
    }

    /// Cancellation signal for an instance starting now.
    pub fn run_context(&self) -> RunContext {
        self.lifecycle().context.clone()
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn exec_guard(&self) -> MutexGuard<'_, ()> {
        self.inner
            .exec_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Evaluates a trigger/guard/drop predicate. Errors count as `false`.
    pub(crate) fn check(&self, closure: Option<&H::Closure>, what: &str) -> bool {
        let Some(closure) = closure else {
            return false;
        };
        let _exec = self.exec_guard();
        match self.inner.host.evaluate_boolean(Some(closure)) {
            Ok(value) => value,
            Err(err) => {
                debug!(agent = %self.inner.name, "{} evaluation failed: {}", what, err);
                false
            }
        }
    }

    async fn scheduling_loop(self, mut cancelled: watch::Receiver<bool>) {
        let nudge_rx = Arc::clone(&self.inner.nudge_rx);
        let mut nudges = nudge_rx.lock().await;
        let mut ticker = tokio::time::interval(self.inner.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; scanning starts one period in.
        ticker.tick().await;

        while !*cancelled.borrow() {
            tokio::select! {
                changed = cancelled.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => self.schedule_pass(&cancelled).await,
                nudge = nudges.recv() => {
                    if nudge.is_none() {
                        break;
                    }
                    self.schedule_pass(&cancelled).await;
                }
            }
        }
        debug!(agent = %self.inner.name, "scheduling loop exited");
    }

    async fn schedule_pass(&self, cancelled: &watch::Receiver<bool>) {
        let agent = self.clone();
        let handle = Handle::current();
        let ctx = RunContext {
            cancel: Some(cancelled.clone()),
        };
        if let Err(err) =
            tokio::task::spawn_blocking(move || agent.try_schedule(&handle, &ctx)).await
        {
            warn!(agent = %self.inner.name, "schedule pass aborted: {}", err);
        }
    }

    /// One scan over the registered plans. Stops at the first plan that
    /// qualifies while every slot is taken, or once `ctx` is cancelled.
    /// Dispatched instances observe `ctx`, the context of the loop that
    /// started the scan.
    fn try_schedule(&self, handle: &Handle, ctx: &RunContext) {
        for plan in self.plans_snapshot() {
            if ctx.is_cancelled() {
                return;
            }
            if !self.check(plan.trigger.as_ref(), "trigger") {
                continue;
            }
            if !self.check(plan.guard.as_ref(), "guard") {
                continue;
            }
            if ctx.is_cancelled() {
                debug!(agent = %self.inner.name, plan = %plan.name, "agent stopped during scan");
                return;
            }
            let permit = match Arc::clone(&self.inner.slots).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    debug!(
                        agent = %self.inner.name,
                        plan = %plan.name,
                        "all slots busy; deferring scan"
                    );
                    return;
                }
            };
            debug!(agent = %self.inner.name, plan = %plan.name, "dispatching plan");
            let agent = self.clone();
            let ctx = ctx.clone();
            handle.spawn_blocking(move || {
                let _permit = permit;
                if let Err(err) = agent.run_plan_once_with_context(&plan, &ctx) {
                    if err.is_cancelled() {
                        debug!(agent = %agent.inner.name, plan = %plan.name, "plan cancelled");
                    } else {
                        warn!(agent = %agent.inner.name, plan = %plan.name, "plan failed: {}", err);
                    }
                }
            });
        }
    }
}

impl<H: ScriptHost> std::fmt::Debug for Agent<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.inner.name)
            .field("plans", &self.plan_names())
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("poll_interval", &self.inner.poll_interval)
            .finish()
    }
}
