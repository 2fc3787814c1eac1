//! Event bus collaborator and a local in-process implementation.

use crate::context::OwnerToken;
use crate::error::HostError;
use crate::listener::{EventOutcome, HostEvent, Listener, ListenerId};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tracing::{debug, error};

/// The host's event bus.
///
/// Registration is keyed by [`ListenerId`]; registering the same id twice
/// replaces the earlier registration rather than adding a second one.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn register_listeners(
        &self,
        owner: &OwnerToken,
        id: ListenerId,
        listener: Arc<dyn Listener>,
    ) -> Result<(), HostError>;

    async fn unregister_listeners(&self, id: ListenerId) -> Result<(), HostError>;

    /// Posts an event to every registered listener subscribed to it.
    /// Returns `true` if any listener cancelled the event.
    async fn post(&self, event: HostEvent) -> Result<bool, HostError>;
}

struct BusEntry {
    owner: OwnerToken,
    listener: Arc<dyn Listener>,
}

/// In-process event bus that fans events out to subscribed listeners.
#[derive(Default)]
pub struct LocalEventBus {
    listeners: DashMap<ListenerId, BusEntry>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_registered(&self, id: ListenerId) -> bool {
        self.listeners.contains_key(&id)
    }

    /// Ids registered by the given owner.
    pub fn registered_by(&self, owner: &OwnerToken) -> Vec<ListenerId> {
        self.listeners
            .iter()
            .filter(|entry| &entry.value().owner == owner)
            .map(|entry| *entry.key())
            .collect()
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn register_listeners(
        &self,
        owner: &OwnerToken,
        id: ListenerId,
        listener: Arc<dyn Listener>,
    ) -> Result<(), HostError> {
        debug!("📝 Registered listener {} ({})", listener.name(), id);
        self.listeners.insert(
            id,
            BusEntry {
                owner: owner.clone(),
                listener,
            },
        );
        Ok(())
    }

    async fn unregister_listeners(&self, id: ListenerId) -> Result<(), HostError> {
        if let Some((_, entry)) = self.listeners.remove(&id) {
            debug!("Unregistered listener {} ({})", entry.listener.name(), id);
        }
        Ok(())
    }

    async fn post(&self, event: HostEvent) -> Result<bool, HostError> {
        // Clone the handlers out so no map guard is held across an await.
        let targets: Vec<Arc<dyn Listener>> = self
            .listeners
            .iter()
            .filter(|entry| entry.value().listener.subscriptions().iter().any(|s| s == &event.name))
            .map(|entry| entry.value().listener.clone())
            .collect();

        if targets.is_empty() {
            debug!("No listeners for event {}", event.name);
            return Ok(false);
        }

        let event = Arc::new(event);
        let mut futures = FuturesUnordered::new();
        for listener in targets {
            let event = event.clone();
            futures.push(async move {
                let result = listener.handle(&event).await;
                (listener, result)
            });
        }

        let mut cancelled = false;
        while let Some((listener, result)) = futures.next().await {
            match result {
                Ok(EventOutcome::Cancel) => cancelled = true,
                Ok(EventOutcome::Continue) => {}
                Err(e) => error!("❌ Listener {} failed on {}: {}", listener.name(), event.name, e),
            }
        }

        Ok(cancelled)
    }
}
