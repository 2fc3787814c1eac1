//! Event listeners and how they decide whether to be registered.

use crate::context::ServiceContext;
use crate::permissions::PermissionInfo;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// An event posted on the host event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEvent {
    pub name: String,
    pub payload: serde_json::Value,
}

impl HostEvent {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// What a handler wants done with the event after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Continue,
    Cancel,
}

/// A handler the dispatcher registers on the event bus.
#[async_trait]
pub trait Listener: Send + Sync {
    fn name(&self) -> &str;

    /// Event names this listener handles.
    fn subscriptions(&self) -> Vec<String>;

    /// Full permission keys the listener checks at runtime. Registered when
    /// the owning module is enabled.
    fn permissions(&self) -> Vec<(String, PermissionInfo)> {
        Vec::new()
    }

    async fn handle(&self, event: &HostEvent) -> anyhow::Result<EventOutcome>;

    /// Queried by [`Activation::SelfReporting`] listeners at registration and
    /// on every reload.
    fn should_enable(&self, _ctx: &ServiceContext) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Refresh cached configuration. Called before activation is evaluated.
    fn on_reload(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }
}

pub type ActivationPredicate = Arc<dyn Fn(&ServiceContext) -> anyhow::Result<bool> + Send + Sync>;

/// How the dispatcher decides whether a listener is registered.
#[derive(Clone)]
pub enum Activation {
    /// Registered once and kept; still receives reload notifications.
    Always,
    /// Registered while the predicate holds.
    Conditional(ActivationPredicate),
    /// Registered while [`Listener::should_enable`] holds.
    SelfReporting,
}

impl Activation {
    pub fn conditional<F>(predicate: F) -> Self
    where
        F: Fn(&ServiceContext) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Activation::Conditional(Arc::new(predicate))
    }
}

impl fmt::Debug for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::Always => f.write_str("Always"),
            Activation::Conditional(_) => f.write_str("Conditional(..)"),
            Activation::SelfReporting => f.write_str("SelfReporting"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ListenerState {
    Unregistered,
    Active,
    Inactive,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerState::Unregistered => "unregistered",
            ListenerState::Active => "active",
            ListenerState::Inactive => "inactive",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(pub Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
