//! # Module System
//!
//! Registration and dispatch core for feature modules: self-contained bundles
//! of commands, event listeners and recurring tasks.
//!
//! ## Architecture
//!
//! - **Catalog**: a compile-time table of every module and item, keyed by
//!   dotted path. Discovery selects from it by manifest or package prefix.
//! - **ModuleRegistry**: drives discovery and the two-phase lifecycle.
//! - **CommandTree**: the command namespace built from descriptors, with a
//!   flat lookup of every alias path.
//! - **PermissionRegistry**: permission keys aggregated across modules.
//! - **ListenerDispatcher / TaskDispatcher**: register listeners and tasks
//!   against the host's event bus and scheduler and re-evaluate listener
//!   activation on reload.
//! - **ServiceContext**: the collaborators and flags handed explicitly to every
//!   factory, predicate and hook.
//!
//! ## Lifecycle
//!
//! ### Phase 1: Pre-enable
//! Every module's pre-enable hook runs before any module is enabled. A failure
//! here is fatal.
//!
//! ### Phase 2: Enable
//! Each module loads its commands, then listeners, then tasks. A failure marks
//! only that module as failed.
//!
//! ### Reload
//! Listeners receive their reload hook and conditional listeners are
//! re-evaluated. Tasks are never withdrawn.
//!
//! ## Example
//!
//! ```rust,no_run
//! use module_system::*;
//! use std::sync::Arc;
//!
//! struct Warn;
//!
//! #[async_trait::async_trait]
//! impl CommandExecutor for Warn {
//!     async fn execute(&self, invocation: &CommandInvocation) -> anyhow::Result<()> {
//!         println!("{} warned {:?}", invocation.source, invocation.args);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ModuleError> {
//!     let catalog = Catalog::builder()
//!         .module(ModuleInfo::new("warn", "Warn", "nucleus.modules.warn"))
//!         .command(
//!             "nucleus.modules.warn.commands.warn",
//!             CommandSpec::new(
//!                 CommandDescriptor::new("warn.warn", "warn")
//!                     .aliases_from(&["warning", "addwarning"])
//!                     .suffix("notify", "Receive warning notifications", SuggestedLevel::Mod),
//!                 |_| Ok(Warn),
//!             ),
//!         )
//!         .build()?;
//!
//!     let context = Arc::new(ServiceContext::builder("nucleus").build());
//!     let registry = ModuleRegistry::new(context, catalog);
//!     registry.start(&ModuleSource::scan("nucleus.modules")).await?;
//!
//!     assert!(registry.resolve_command("addwarning").await.is_some());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod command;
pub mod command_tree;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod listener;
pub mod module;
pub mod permissions;
pub mod registry;
pub mod task;

pub use catalog::{
    Catalog, CatalogBuilder, CatalogEntry, CatalogItem, CommandSpec, ItemKind, ListenerSpec, Manifest, ManifestModule,
    ModuleInfo, ModuleSource, TaskSpec,
};
pub use command::{
    CommandDescriptor, CommandExecutor, CommandInvocation, CompanionRequirement, PlatformRequirement,
};
pub use command_tree::{BuildEnv, CommandNode, CommandTree, DispatchTarget, Exclusion, ExclusionReason};
pub use context::{Companion, OwnerToken, ServiceContext, ServiceContextBuilder, ServiceMap};
pub use dispatcher::{ListenerDispatcher, ListenerSnapshot, ReloadSummary, TaskDispatcher};
pub use error::{ActivationError, HostError, ModuleError};
pub use host::{
    ConfigNode, ConfigStore, EventBus, LocalEventBus, MemoryConfigStore, PlatformQuery, Scheduler, StaticPlatform,
    TokioScheduler, TomlConfigStore,
};
pub use listener::{Activation, EventOutcome, HostEvent, Listener, ListenerId, ListenerState};
pub use module::{discover_modules, Module, ModuleState, ModuleSummary};
pub use permissions::{
    CommandPermissions, DuplicatePolicy, PermissionEntry, PermissionInfo, PermissionRegistry, SuggestedLevel,
};
pub use registry::{EnableReport, ModuleRegistry, COMMANDS_SECTION};
pub use task::{Affinity, ScheduledTask, TaskId, TaskRegistration};
