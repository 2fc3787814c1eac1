//! External collaborators the core talks to.
//!
//! The host runtime (event bus, scheduler, platform query and configuration
//! store) is not owned by this crate. Each concern is a trait with a small
//! in-process implementation so the registry can run standalone and in tests.

mod config_store;
mod event_bus;
mod platform;
mod scheduler;

pub use config_store::{lookup_bool, merge_missing, ConfigNode, ConfigStore, MemoryConfigStore, TomlConfigStore};
pub use event_bus::{EventBus, LocalEventBus};
pub use platform::{PlatformQuery, StaticPlatform};
pub use scheduler::{Scheduler, TokioScheduler};
