//! The service context handed to every factory, predicate and hook.
//!
//! This replaces a global plugin accessor and a DI container: the context is
//! assembled once at startup and passed explicitly to whatever needs it.

use crate::host::{ConfigStore, EventBus, LocalEventBus, MemoryConfigStore, PlatformQuery, Scheduler, StaticPlatform, TokioScheduler};
use crate::permissions::PermissionRegistry;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Identifies who owns a registration on the event bus or scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerToken(String);

impl OwnerToken {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An optional companion subsystem that some commands require (or refuse).
#[derive(Debug, Clone)]
pub struct Companion {
    pub name: String,
    pub settings: toml::Table,
}

impl Companion {
    pub fn new(name: impl Into<String>, settings: toml::Table) -> Self {
        Self {
            name: name.into(),
            settings,
        }
    }

    /// Reads a boolean setting, `None` if absent or not a bool.
    pub fn setting_bool(&self, key: &str) -> Option<bool> {
        self.settings.get(key).and_then(|v| v.as_bool())
    }
}

/// Typed service locator populated by modules during pre-enable.
#[derive(Default)]
pub struct ServiceMap {
    services: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceMap {
    pub fn insert<T: Send + Sync + 'static>(&self, service: Arc<T>) {
        self.services.insert(TypeId::of::<T>(), service);
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let service = self.services.get(&TypeId::of::<T>())?.value().clone();
        service.downcast::<T>().ok()
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Shared handles to every collaborator, plus startup-wide flags.
pub struct ServiceContext {
    owner: OwnerToken,
    event_bus: Arc<dyn EventBus>,
    scheduler: Arc<dyn Scheduler>,
    platform: Arc<dyn PlatformQuery>,
    config: Arc<dyn ConfigStore>,
    permissions: Arc<PermissionRegistry>,
    services: ServiceMap,
    companion: Option<Companion>,
    debug: bool,
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("owner", &self.owner)
            .field("platform", &self.platform.current_platform_id())
            .field("companion", &self.companion.as_ref().map(|c| c.name.as_str()))
            .field("services", &self.services.len())
            .field("debug", &self.debug)
            .finish()
    }
}

impl ServiceContext {
    pub fn builder(owner: impl Into<String>) -> ServiceContextBuilder {
        ServiceContextBuilder::new(owner)
    }

    pub fn owner(&self) -> &OwnerToken {
        &self.owner
    }

    pub fn event_bus(&self) -> Arc<dyn EventBus> {
        self.event_bus.clone()
    }

    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.scheduler.clone()
    }

    pub fn platform_id(&self) -> String {
        self.platform.current_platform_id()
    }

    pub fn config(&self) -> Arc<dyn ConfigStore> {
        self.config.clone()
    }

    pub fn permissions(&self) -> &Arc<PermissionRegistry> {
        &self.permissions
    }

    pub fn services(&self) -> &ServiceMap {
        &self.services
    }

    pub fn companion(&self) -> Option<&Companion> {
        self.companion.as_ref()
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }
}

/// Builder for [`ServiceContext`]. Unset collaborators fall back to the
/// in-process implementations.
pub struct ServiceContextBuilder {
    owner: OwnerToken,
    event_bus: Option<Arc<dyn EventBus>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    platform: Option<Arc<dyn PlatformQuery>>,
    config: Option<Arc<dyn ConfigStore>>,
    permissions: Option<Arc<PermissionRegistry>>,
    companion: Option<Companion>,
    debug: bool,
}

impl ServiceContextBuilder {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: OwnerToken::new(owner),
            event_bus: None,
            scheduler: None,
            platform: None,
            config: None,
            permissions: None,
            companion: None,
            debug: false,
        }
    }

    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn platform(mut self, platform: Arc<dyn PlatformQuery>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn config(mut self, config: Arc<dyn ConfigStore>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn permissions(mut self, permissions: Arc<PermissionRegistry>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn companion(mut self, companion: Option<Companion>) -> Self {
        self.companion = companion;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn build(self) -> ServiceContext {
        ServiceContext {
            owner: self.owner,
            event_bus: self.event_bus.unwrap_or_else(|| Arc::new(LocalEventBus::new())),
            scheduler: self.scheduler.unwrap_or_else(|| Arc::new(TokioScheduler::new())),
            platform: self.platform.unwrap_or_else(|| Arc::new(StaticPlatform::new("server"))),
            config: self.config.unwrap_or_else(|| Arc::new(MemoryConfigStore::new())),
            permissions: self.permissions.unwrap_or_default(),
            services: ServiceMap::default(),
            companion: self.companion,
            debug: self.debug,
        }
    }
}
