//! Lifecycle events and their fan-out to live subscribers.
//!
//! The bus never blocks a producer: each sink is a bounded channel and a full
//! or closed sink simply misses the event.

use crate::config::MAX_COUNT;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::mpsc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Plan,
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Start,
    Finish,
    Drop,
    Error,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub agent: String,
    pub plan: String,
    /// Omitted on the wire when absent or zero.
    #[serde(default, skip_serializing_if = "omit_step")]
    pub step: Option<usize>,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub time: DateTime<Utc>,
}

fn omit_step(step: &Option<usize>) -> bool {
    matches!(step, None | Some(0))
}

impl AgentEvent {
    pub fn plan(agent: &str, plan: &str, status: EventStatus) -> Self {
        AgentEvent {
            event_type: EventType::Plan,
            agent: agent.to_string(),
            plan: plan.to_string(),
            step: None,
            status,
            error: None,
            time: Utc::now(),
        }
    }

    pub fn step(agent: &str, plan: &str, step: usize, status: EventStatus) -> Self {
        AgentEvent {
            event_type: EventType::Step,
            step: Some(step),
            ..Self::plan(agent, plan, status)
        }
    }

    pub fn at_step(mut self, step: usize) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        let error = error.into();
        self.error = (!error.is_empty()).then_some(error);
        self
    }
}

type Sinks = RwLock<HashMap<u64, mpsc::Sender<AgentEvent>>>;

/// Fan-out of [`AgentEvent`]s to a dynamic set of subscriber channels.
///
/// Cloning yields another handle to the same bus. Independent buses do not
/// share subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    sinks: Sinks,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `sink`; the returned guard removes it when dropped.
    #[must_use = "dropping the subscription unregisters the sink"]
    pub fn register_sink(&self, sink: mpsc::Sender<AgentEvent>) -> EventSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, sink);
        EventSubscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Creates a bounded channel and registers its sender.
    pub fn subscribe(&self, capacity: usize) -> (EventSubscription, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(capacity.clamp(1, MAX_COUNT));
        (self.register_sink(tx), rx)
    }

    /// Offers `event` to every sink without waiting.
    pub fn broadcast(&self, event: AgentEvent) {
        let sinks = self
            .inner
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for (id, sink) in sinks.iter() {
            if let Err(err) = sink.try_send(event.clone()) {
                trace!(sink = id, "dropping agent event: {}", err);
            }
        }
    }

    pub fn sink_count(&self) -> usize {
        self.inner
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drops every sink so receivers observe end-of-stream.
    pub fn close(&self) {
        self.inner
            .sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sinks", &self.sink_count())
            .finish()
    }
}

/// Registration handle returned by [`EventBus::register_sink`].
#[derive(Debug)]
pub struct EventSubscription {
    bus: Weak<BusInner>,
    id: u64,
}

impl EventSubscription {
    /// Removes the sink now instead of when the handle goes out of scope.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.sinks
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}
