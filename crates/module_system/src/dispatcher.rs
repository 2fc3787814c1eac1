//! Registers listeners and tasks against the host's event bus and scheduler.
//!
//! Each listener moves through `Unregistered -> Active | Inactive` when it is
//! registered and may flip between `Active` and `Inactive` on every reload.
//! The event bus is only called when the state actually changes, so repeated
//! reloads never pile up duplicate registrations.

use crate::context::ServiceContext;
use crate::error::{caught, guarded, ActivationError, HostError, ModuleError};
use crate::listener::{Activation, Listener, ListenerId, ListenerState};
use crate::task::{ScheduledTask, TaskId, TaskRegistration};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct ListenerRegistration {
    id: ListenerId,
    module: String,
    listener: Arc<dyn Listener>,
    activation: Activation,
    state: ListenerState,
}

/// Read-only view of a registered listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerSnapshot {
    pub id: ListenerId,
    pub module: String,
    pub name: String,
    pub mode: &'static str,
    pub state: ListenerState,
}

/// What one reload pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub evaluated: usize,
    pub activated: usize,
    pub deactivated: usize,
}

#[derive(Default)]
pub struct ListenerDispatcher {
    registrations: Mutex<Vec<ListenerRegistration>>,
}

impl ListenerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` and evaluates its activation straight away.
    ///
    /// Only an `Always` listener the event bus refuses is an error; every
    /// other failure leaves the listener `Inactive`.
    pub async fn register(
        &self,
        ctx: &ServiceContext,
        module: &str,
        listener: Arc<dyn Listener>,
        activation: Activation,
    ) -> Result<ListenerId, ModuleError> {
        let mut registration = ListenerRegistration {
            id: ListenerId::new(),
            module: module.to_string(),
            listener,
            activation,
            state: ListenerState::Unregistered,
        };

        notify_reload(ctx, &registration);

        if let Activation::Always = registration.activation {
            ctx.event_bus()
                .register_listeners(ctx.owner(), registration.id, registration.listener.clone())
                .await?;
            registration.state = ListenerState::Active;
        } else {
            let wanted = should_be_active(ctx, &registration);
            transition(ctx, &mut registration, wanted).await;
        }

        debug!(
            "👂 Listener {} for {} is {} ({:?})",
            registration.listener.name(),
            module,
            registration.state,
            registration.activation
        );

        let id = registration.id;
        self.registrations.lock().await.push(registration);
        Ok(id)
    }

    /// Delivers the reload signal: every listener gets its `on_reload` hook,
    /// then conditional and self-reporting listeners are re-evaluated.
    pub async fn reload(&self, ctx: &ServiceContext) -> ReloadSummary {
        let mut summary = ReloadSummary::default();
        let mut registrations = self.registrations.lock().await;

        for registration in registrations.iter_mut() {
            summary.evaluated += 1;
            notify_reload(ctx, registration);

            if let Activation::Always = registration.activation {
                continue;
            }

            let before = registration.state;
            let wanted = should_be_active(ctx, registration);
            transition(ctx, registration, wanted).await;

            match (before, registration.state) {
                (ListenerState::Active, ListenerState::Active) => {}
                (_, ListenerState::Active) => summary.activated += 1,
                (ListenerState::Active, _) => summary.deactivated += 1,
                _ => {}
            }
        }

        info!(
            "🔄 Reloaded {} listeners: {} activated, {} deactivated",
            summary.evaluated, summary.activated, summary.deactivated
        );
        summary
    }

    /// Drops the given registrations, unregistering any that are active.
    /// Used to roll back a module whose enable failed.
    pub async fn withdraw(&self, ctx: &ServiceContext, ids: &[ListenerId]) {
        let mut registrations = self.registrations.lock().await;
        let (withdrawn, kept): (Vec<_>, Vec<_>) = registrations.drain(..).partition(|r| ids.contains(&r.id));
        *registrations = kept;
        drop(registrations);

        for registration in withdrawn {
            if registration.state == ListenerState::Active {
                if let Err(e) = ctx.event_bus().unregister_listeners(registration.id).await {
                    warn!("⚠️ Event bus refused to unregister {}: {}", registration.listener.name(), e);
                }
            }
            debug!("Withdrew listener {} of {}", registration.listener.name(), registration.module);
        }
    }

    pub async fn state(&self, id: ListenerId) -> Option<ListenerState> {
        self.registrations
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.state)
    }

    pub async fn snapshot(&self) -> Vec<ListenerSnapshot> {
        self.registrations
            .lock()
            .await
            .iter()
            .map(|r| ListenerSnapshot {
                id: r.id,
                module: r.module.clone(),
                name: r.listener.name().to_string(),
                mode: match r.activation {
                    Activation::Always => "always",
                    Activation::Conditional(_) => "conditional",
                    Activation::SelfReporting => "self-reporting",
                },
                state: r.state,
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.registrations.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.registrations.lock().await.is_empty()
    }
}

fn notify_reload(ctx: &ServiceContext, registration: &ListenerRegistration) {
    if let Err(e) = caught(|| registration.listener.on_reload(ctx)) {
        warn!(
            "⚠️ Reload hook of listener {} in {} failed: {}",
            registration.listener.name(),
            registration.module,
            e
        );
    }
}

/// Evaluates the activation predicate. Failures mean inactive and are only
/// reported in debug mode.
fn should_be_active(ctx: &ServiceContext, registration: &ListenerRegistration) -> bool {
    let result: Result<bool, ActivationError> = match &registration.activation {
        Activation::Always => Ok(true),
        Activation::Conditional(predicate) => guarded(|| predicate(ctx)),
        Activation::SelfReporting => guarded(|| registration.listener.should_enable(ctx)),
    };

    match result {
        Ok(wanted) => wanted,
        Err(e) => {
            if ctx.is_debug() {
                warn!(
                    "⚠️ Could not evaluate listener {} in {}, deactivating: {}",
                    registration.listener.name(),
                    registration.module,
                    e
                );
            }
            false
        }
    }
}

async fn transition(ctx: &ServiceContext, registration: &mut ListenerRegistration, wanted: bool) {
    let bus = ctx.event_bus();
    match (registration.state, wanted) {
        (ListenerState::Active, true) => {}
        (ListenerState::Active, false) => {
            if let Err(e) = bus.unregister_listeners(registration.id).await {
                warn!("⚠️ Event bus refused to unregister {}: {}", registration.listener.name(), e);
            }
            registration.state = ListenerState::Inactive;
        }
        (_, true) => {
            match bus
                .register_listeners(ctx.owner(), registration.id, registration.listener.clone())
                .await
            {
                Ok(()) => registration.state = ListenerState::Active,
                Err(e) => {
                    warn!("⚠️ Event bus refused to register {}: {}", registration.listener.name(), e);
                    registration.state = ListenerState::Inactive;
                }
            }
        }
        (_, false) => registration.state = ListenerState::Inactive,
    }
}

/// Submits recurring tasks. Tasks are submitted once and never withdrawn.
#[derive(Default)]
pub struct TaskDispatcher {
    tasks: Mutex<Vec<TaskRegistration>>,
}

impl TaskDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn submit(
        &self,
        ctx: &ServiceContext,
        module: &str,
        task: Arc<dyn ScheduledTask>,
    ) -> Result<TaskId, ModuleError> {
        let interval = task.interval();
        if interval.is_zero() {
            return Err(HostError::InvalidInterval(task.name().to_string()).into());
        }

        let registration = TaskRegistration {
            id: TaskId::new(),
            module: module.to_string(),
            name: task.name().to_string(),
            interval,
            affinity: task.affinity(),
        };

        ctx.scheduler()
            .submit(ctx.owner(), registration.id, task, interval, registration.affinity)?;

        debug!(
            "⏱️ Task {} for {} submitted every {}ms ({:?})",
            registration.name,
            module,
            interval.as_millis(),
            registration.affinity
        );

        let id = registration.id;
        self.tasks.lock().await.push(registration);
        Ok(id)
    }

    /// Cancels the given tasks and forgets them.
    pub async fn withdraw(&self, ctx: &ServiceContext, ids: &[TaskId]) {
        for id in ids {
            if let Err(e) = ctx.scheduler().cancel(*id) {
                warn!("⚠️ Scheduler refused to cancel task {:?}: {}", id, e);
            }
        }
        self.tasks.lock().await.retain(|r| !ids.contains(&r.id));
    }

    pub async fn registrations(&self) -> Vec<TaskRegistration> {
        self.tasks.lock().await.clone()
    }
}
