//! The module registry: discovery, the two-phase lifecycle and the command
//! table built from every enabled module.

use crate::catalog::{Catalog, CommandSpec, ListenerSpec, ModuleSource};
use crate::command::{CommandDescriptor, CommandExecutor, CommandInvocation};
use crate::command_tree::{BuildEnv, CommandTree, DispatchTarget};
use crate::context::ServiceContext;
use crate::dispatcher::{ListenerDispatcher, ListenerSnapshot, ReloadSummary, TaskDispatcher};
use crate::error::{caught, ModuleError};
use crate::host::{lookup_bool, merge_missing};
use crate::listener::{Listener, ListenerId, ListenerState};
use crate::module::{discover_modules, Module, ModuleItem, ModuleState, ModuleSummary};
use crate::permissions::{CommandPermissions, PermissionInfo, PermissionRegistry};
use crate::task::{ScheduledTask, TaskId, TaskRegistration};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Configuration section holding per-command settings. Each command's node
/// sits at the path of primary aliases from its root command, so
/// `mail send` is configured under `commands.mail.send`.
pub const COMMANDS_SECTION: &str = "commands";

/// Outcome of enabling every pre-enabled module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnableReport {
    pub enabled: Vec<String>,
    /// Module id and the error that failed it.
    pub failed: Vec<(String, String)>,
}

impl EnableReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Default)]
struct CommandTable {
    descriptors: Vec<Arc<CommandDescriptor>>,
    owners: HashMap<String, String>,
    executors: HashMap<String, Arc<dyn CommandExecutor>>,
    tree: Arc<CommandTree>,
}

/// A command table computed for one module but not yet published.
#[derive(Default)]
struct PreparedCommands {
    descriptors: Vec<Arc<CommandDescriptor>>,
    tree: CommandTree,
    executors: Vec<(String, Arc<dyn CommandExecutor>)>,
    /// Ids of every command the module declared, included or not.
    owned: Vec<String>,
    permissions: Vec<CommandPermissions>,
    entries: Vec<(String, PermissionInfo)>,
    defaults: toml::Table,
}

/// Items of one module, constructed but not yet registered anywhere.
struct Staged {
    commands: Vec<(Arc<CommandSpec>, Arc<dyn CommandExecutor>)>,
    listeners: Vec<(Arc<ListenerSpec>, Arc<dyn Listener>)>,
    tasks: Vec<Arc<dyn ScheduledTask>>,
}

pub struct ModuleRegistry {
    context: Arc<ServiceContext>,
    catalog: Arc<Catalog>,
    modules: RwLock<Vec<Module>>,
    commands: RwLock<CommandTable>,
    listeners: ListenerDispatcher,
    tasks: TaskDispatcher,
    /// Serialises lifecycle mutations (load, pre-enable, enable).
    lifecycle: Mutex<()>,
}

impl ModuleRegistry {
    pub fn new(context: Arc<ServiceContext>, catalog: Catalog) -> Self {
        Self {
            context,
            catalog: Arc::new(catalog),
            modules: RwLock::new(Vec::new()),
            commands: RwLock::new(CommandTable::default()),
            listeners: ListenerDispatcher::new(),
            tasks: TaskDispatcher::new(),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn permissions(&self) -> &Arc<PermissionRegistry> {
        self.context.permissions()
    }

    /// Discovers modules from `source` and records them as `Unloaded`.
    /// Returns the number of modules discovered.
    pub async fn load(&self, source: &ModuleSource) -> Result<usize, ModuleError> {
        let _guard = self.lifecycle.lock().await;

        if !self.modules.read().await.is_empty() {
            return Err(ModuleError::InvalidState {
                module: "registry".to_string(),
                state: "loaded".to_string(),
                expected: "empty".to_string(),
            });
        }

        let config = self.context.config();
        let discovered = discover_modules(&self.catalog, source, config.as_ref(), &self.context.platform_id())?;
        if let Err(e) = config.save().await {
            error!("❌ Failed to save module configuration: {}", e);
        }

        let count = discovered.len();
        *self.modules.write().await = discovered;
        info!("📦 Discovered {} modules", count);
        Ok(count)
    }

    /// Runs a module's pre-enable hook. A no-op for a module past `Unloaded`
    /// unless it failed.
    pub async fn pre_enable(&self, id: &str) -> Result<(), ModuleError> {
        let _guard = self.lifecycle.lock().await;
        self.pre_enable_locked(id).await
    }

    async fn pre_enable_locked(&self, id: &str) -> Result<(), ModuleError> {
        let mut modules = self.modules.write().await;
        let module = find_mut(&mut modules, id)?;

        match module.state() {
            ModuleState::Unloaded => {}
            ModuleState::PreEnabled | ModuleState::Enabled => return Ok(()),
            ModuleState::Failed => {
                return Err(ModuleError::InvalidState {
                    module: id.to_string(),
                    state: ModuleState::Failed.to_string(),
                    expected: ModuleState::Unloaded.to_string(),
                })
            }
        }

        if let Some(hook) = module.info().pre_enable.clone() {
            if let Err(source) = caught(|| hook(self.context.as_ref())) {
                module.set_state(ModuleState::Failed);
                return Err(ModuleError::PreEnable {
                    module: id.to_string(),
                    source,
                });
            }
        }

        module.set_state(ModuleState::PreEnabled);
        debug!("Pre-enabled module {}", id);
        Ok(())
    }

    /// Pre-enables every module before any is enabled. The first failure
    /// aborts: the caller must treat it as fatal.
    pub async fn pre_enable_all(&self) -> Result<(), ModuleError> {
        let _guard = self.lifecycle.lock().await;
        for id in self.module_ids().await {
            if let Err(e) = self.pre_enable_locked(&id).await {
                error!("💥 {}", e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Enables a pre-enabled module: commands, then listeners, then tasks.
    ///
    /// Enabling an enabled module does nothing. Every item is constructed
    /// before anything is registered, so a construction failure leaves no
    /// trace. Any error marks the module `Failed`.
    pub async fn enable(&self, id: &str) -> Result<(), ModuleError> {
        let _guard = self.lifecycle.lock().await;
        self.enable_locked(id).await
    }

    async fn enable_locked(&self, id: &str) -> Result<(), ModuleError> {
        let module = {
            let modules = self.modules.read().await;
            let module = find(&modules, id)?;
            match module.state() {
                ModuleState::Enabled => {
                    debug!("Module {} is already enabled", id);
                    return Ok(());
                }
                ModuleState::PreEnabled => module.clone(),
                other => {
                    return Err(ModuleError::InvalidState {
                        module: id.to_string(),
                        state: other.to_string(),
                        expected: ModuleState::PreEnabled.to_string(),
                    })
                }
            }
        };

        let result = self.enable_items(&module).await;

        let mut modules = self.modules.write().await;
        let stored = find_mut(&mut modules, id)?;
        match result {
            Ok(()) => {
                stored.set_state(ModuleState::Enabled);
                info!("✅ Enabled module {}", module.name());
                Ok(())
            }
            Err(e) => {
                stored.set_state(ModuleState::Failed);
                Err(e)
            }
        }
    }

    /// Enables every pre-enabled module. A failing module is logged and
    /// skipped; the rest continue.
    pub async fn enable_all(&self) -> EnableReport {
        let _guard = self.lifecycle.lock().await;
        let mut report = EnableReport::default();

        for id in self.module_ids().await {
            match self.enable_locked(&id).await {
                Ok(()) => report.enabled.push(id),
                Err(e) => {
                    error!("❌ Failed to enable module {}: {}", id, e);
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        report
    }

    /// Discover, pre-enable everything (fatal on failure), enable everything.
    pub async fn start(&self, source: &ModuleSource) -> Result<EnableReport, ModuleError> {
        self.load(source).await?;
        self.pre_enable_all().await?;
        let report = self.enable_all().await;
        info!(
            "🚀 Modules started: {} enabled, {} failed, {} commands",
            report.enabled.len(),
            report.failed.len(),
            self.command_tree().await.len()
        );
        Ok(report)
    }

    /// Re-reads the configuration store, then delivers the reload signal to
    /// every listener. A store that fails to reload keeps its old values.
    pub async fn reload(&self) -> ReloadSummary {
        if let Err(e) = self.context.config().reload().await {
            error!("❌ Failed to reload module configuration: {}", e);
        }
        self.listeners.reload(&self.context).await
    }

    /// Registers a staged module. Nothing becomes visible until listeners
    /// and tasks are in place; a failure on the way withdraws whatever was
    /// registered and leaves the command table and permissions untouched.
    async fn enable_items(&self, module: &Module) -> Result<(), ModuleError> {
        let staged = self.stage(module)?;
        let prepared = self.prepare_commands(&staged.commands).await?;

        let mut pending = prepared.entries.clone();
        for (_, listener) in &staged.listeners {
            pending.extend(listener.permissions());
        }
        for task in &staged.tasks {
            pending.extend(task.permissions());
        }
        self.permissions().check_batch(pending.iter().map(|(key, _)| key.as_str()))?;

        let mut listener_ids = Vec::with_capacity(staged.listeners.len());
        let mut task_ids = Vec::with_capacity(staged.tasks.len());
        let registered = self.register_runtime(module.id(), staged, &mut listener_ids, &mut task_ids).await;

        let committed = match registered {
            Ok(()) => self.permissions().register_batch(module.id(), pending),
            Err(e) => Err(e),
        };
        if let Err(e) = committed {
            self.tasks.withdraw(&self.context, &task_ids).await;
            self.listeners.withdraw(&self.context, &listener_ids).await;
            warn!(
                "↩️ Rolled back {} listeners and {} tasks of {}",
                listener_ids.len(),
                task_ids.len(),
                module.id()
            );
            return Err(e);
        }

        self.commit_commands(module.id(), prepared).await;
        Ok(())
    }

    async fn register_runtime(
        &self,
        module: &str,
        staged: Staged,
        listener_ids: &mut Vec<ListenerId>,
        task_ids: &mut Vec<TaskId>,
    ) -> Result<(), ModuleError> {
        for (spec, listener) in staged.listeners {
            let id = self
                .listeners
                .register(&self.context, module, listener, spec.activation.clone())
                .await?;
            listener_ids.push(id);
        }

        for task in staged.tasks {
            task_ids.push(self.tasks.submit(&self.context, module, task).await?);
        }
        Ok(())
    }

    fn stage(&self, module: &Module) -> Result<Staged, ModuleError> {
        let ctx = self.context.as_ref();
        Ok(Staged {
            commands: instantiate_all(module.id(), module.commands(), |spec| spec.skip_on_error, |spec| {
                spec.instantiate(ctx)
            })?,
            listeners: instantiate_all(module.id(), module.listeners(), |spec| spec.skip_on_error, |spec| {
                spec.instantiate(ctx)
            })?,
            tasks: instantiate_all(module.id(), module.tasks(), |spec| spec.skip_on_error, |spec| {
                spec.instantiate(ctx)
            })?
            .into_iter()
            .map(|(_, task)| task)
            .collect(),
        })
    }

    /// Builds the command tree with the staged commands added, without
    /// touching the live table.
    async fn prepare_commands(
        &self,
        commands: &[(Arc<CommandSpec>, Arc<dyn CommandExecutor>)],
    ) -> Result<PreparedCommands, ModuleError> {
        if commands.is_empty() {
            return Ok(PreparedCommands::default());
        }

        let mut descriptors = self.commands.read().await.descriptors.clone();

        descriptors.extend(commands.iter().map(|(spec, _)| spec.descriptor.clone()));
        let by_id: HashMap<&str, &CommandDescriptor> =
            descriptors.iter().map(|d| (d.id(), d.as_ref())).collect();

        let command_config = self.context.config().get(COMMANDS_SECTION);
        let mut env = BuildEnv::from_context(&self.context);
        for descriptor in &descriptors {
            let mut path = config_path(descriptor, &by_id);
            path.push("enabled");
            if lookup_bool(&command_config, &path) == Some(false) {
                env.disabled.insert(descriptor.id().to_string());
            }
        }

        let tree = CommandTree::build(&descriptors, &env)?;

        let mut prepared = PreparedCommands::default();
        for (spec, executor) in commands {
            let descriptor = &spec.descriptor;
            insert_defaults(&mut prepared.defaults, &config_path(descriptor, &by_id));
            if tree.contains(descriptor.id()) {
                let (permissions, entries) = CommandPermissions::from_descriptor(descriptor);
                prepared.permissions.push(permissions);
                prepared.entries.extend(entries);
                prepared.executors.push((descriptor.id().to_string(), executor.clone()));
            }
            prepared.owned.push(descriptor.id().to_string());
        }
        prepared.descriptors = descriptors;
        prepared.tree = tree;
        Ok(prepared)
    }

    /// Publishes prepared commands: permission sets, the new tree and the
    /// configuration defaults.
    async fn commit_commands(&self, module: &str, prepared: PreparedCommands) {
        if prepared.owned.is_empty() {
            return;
        }

        let registered = prepared.executors.len();
        let total = prepared.owned.len();

        for permissions in prepared.permissions {
            self.permissions().record_command(permissions);
        }

        {
            let mut table = self.commands.write().await;
            table.executors.extend(prepared.executors);
            for id in prepared.owned {
                table.owners.insert(id, module.to_string());
            }
            table.descriptors = prepared.descriptors;
            table.tree = Arc::new(prepared.tree);
        }

        let config = self.context.config();
        config.merge_defaults(COMMANDS_SECTION, &prepared.defaults);
        if let Err(e) = config.save().await {
            error!("❌ Failed to save command configuration for {}: {}", module, e);
        }

        info!("📋 Module {} registered {} of {} commands", module, registered, total);
    }

    async fn module_ids(&self) -> Vec<String> {
        self.modules.read().await.iter().map(|m| m.id().to_string()).collect()
    }

    pub async fn module_state(&self, id: &str) -> Option<ModuleState> {
        self.modules.read().await.iter().find(|m| m.id() == id).map(Module::state)
    }

    pub async fn modules(&self) -> Vec<ModuleSummary> {
        self.modules.read().await.iter().map(Module::summary).collect()
    }

    pub async fn command_tree(&self) -> Arc<CommandTree> {
        self.commands.read().await.tree.clone()
    }

    pub async fn resolve_command(&self, path: &str) -> Option<Arc<CommandDescriptor>> {
        self.commands.read().await.tree.resolve(path)
    }

    /// The module that declared a command.
    pub async fn command_owner(&self, command_id: &str) -> Option<String> {
        self.commands.read().await.owners.get(command_id).cloned()
    }

    /// Routes raw input to the matching command's executor. Returns `None`
    /// when no command matches.
    pub async fn dispatch_command(&self, source: &str, input: &str) -> anyhow::Result<Option<DispatchTarget>> {
        let (target, executor) = {
            let table = self.commands.read().await;
            let Some(target) = table.tree.dispatch_target(input) else {
                return Ok(None);
            };
            let Some(executor) = table.executors.get(target.descriptor.id()).cloned() else {
                return Ok(None);
            };
            (target, executor)
        };

        let invocation = CommandInvocation {
            source: source.to_string(),
            path: target.path.clone(),
            args: target.args.clone(),
        };
        executor.execute(&invocation).await?;
        Ok(Some(target))
    }

    pub async fn listeners(&self) -> Vec<ListenerSnapshot> {
        self.listeners.snapshot().await
    }

    pub async fn listener_state(&self, id: ListenerId) -> Option<ListenerState> {
        self.listeners.state(id).await
    }

    pub async fn tasks(&self) -> Vec<TaskRegistration> {
        self.tasks.registrations().await
    }
}

/// Primary aliases from the root command down to `descriptor`.
fn config_path<'a>(descriptor: &'a CommandDescriptor, by_id: &HashMap<&str, &'a CommandDescriptor>) -> Vec<&'a str> {
    let mut path = vec![descriptor.primary_alias()];
    let mut visited = HashSet::from([descriptor.id()]);
    let mut current = descriptor;

    while let Some(parent) = current.parent().and_then(|id| by_id.get(id).copied()) {
        if !visited.insert(parent.id()) {
            break;
        }
        path.push(parent.primary_alias());
        current = parent;
    }

    path.reverse();
    path
}

/// Adds the default node for one command at `path`, creating parents.
fn insert_defaults(root: &mut toml::Table, path: &[&str]) {
    let mut table = root;
    for segment in path {
        let entry = table
            .entry(segment.to_string())
            .or_insert(toml::Value::Table(toml::Table::new()));
        if !entry.is_table() {
            *entry = toml::Value::Table(toml::Table::new());
        }
        let toml::Value::Table(next) = entry else {
            return;
        };
        table = next;
    }
    merge_missing(table, &command_defaults());
}

fn command_defaults() -> toml::Table {
    let mut node = toml::Table::new();
    node.insert("enabled".to_string(), toml::Value::Boolean(true));
    node.insert("cooldown".to_string(), toml::Value::Integer(0));
    node.insert("warmup".to_string(), toml::Value::Integer(0));
    node.insert("cost".to_string(), toml::Value::Integer(0));
    node
}

fn find<'a>(modules: &'a [Module], id: &str) -> Result<&'a Module, ModuleError> {
    modules.iter().find(|m| m.id() == id).ok_or_else(|| not_loaded(id))
}

fn find_mut<'a>(modules: &'a mut [Module], id: &str) -> Result<&'a mut Module, ModuleError> {
    modules.iter_mut().find(|m| m.id() == id).ok_or_else(|| not_loaded(id))
}

fn not_loaded(id: &str) -> ModuleError {
    ModuleError::Discovery {
        module: id.to_string(),
        item: "module".to_string(),
    }
}

/// Constructs every item, skipping failures of items marked skip-on-error.
fn instantiate_all<S, T>(
    module: &str,
    items: &[ModuleItem<S>],
    skippable: impl Fn(&S) -> bool,
    build: impl Fn(&S) -> anyhow::Result<Arc<T>>,
) -> Result<Vec<(Arc<S>, Arc<T>)>, ModuleError>
where
    T: ?Sized,
{
    let mut built = Vec::with_capacity(items.len());
    for item in items {
        match caught(|| build(item.spec.as_ref())) {
            Ok(instance) => built.push((item.spec.clone(), instance)),
            Err(e) if skippable(item.spec.as_ref()) => {
                warn!("⚠️ Skipping {} in module {}: {}", item.path, module, e);
            }
            Err(source) => {
                return Err(ModuleError::Instantiation {
                    module: module.to_string(),
                    item: item.path.clone(),
                    source,
                })
            }
        }
    }
    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModuleInfo;
    use crate::command::CommandDescriptor;
    use crate::host::{ConfigStore, MemoryConfigStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CommandExecutor for Echo {
        async fn execute(&self, invocation: &CommandInvocation) -> anyhow::Result<()> {
            assert_eq!(invocation.source, "console");
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn registry(config: Arc<MemoryConfigStore>, calls: Arc<AtomicUsize>) -> ModuleRegistry {
        let catalog = Catalog::builder()
            .module(ModuleInfo::new("mail", "Mail", "nucleus.modules.mail"))
            .command(
                "nucleus.modules.mail.commands.mail",
                CommandSpec::new(CommandDescriptor::new("mail.mail", "mail").alias("email"), {
                    let calls = calls.clone();
                    move |_| Ok(Echo { calls: calls.clone() })
                }),
            )
            .command(
                "nucleus.modules.mail.commands.send",
                CommandSpec::new(
                    CommandDescriptor::new("mail.send", "send").subcommand_of("mail.mail"),
                    move |_| Ok(Echo { calls: calls.clone() }),
                ),
            )
            .build()
            .unwrap();
        let ctx = ServiceContext::builder("test").config(config).build();
        ModuleRegistry::new(Arc::new(ctx), catalog)
    }

    #[tokio::test]
    async fn lifecycle_and_dispatch() {
        let config = Arc::new(MemoryConfigStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry(config.clone(), calls.clone());

        let report = registry.start(&ModuleSource::scan("nucleus.modules")).await.unwrap();
        assert_eq!(report.enabled, vec!["mail"]);
        assert_eq!(registry.module_state("mail").await, Some(ModuleState::Enabled));

        let target = registry.dispatch_command("console", "email send Bob hi").await.unwrap().unwrap();
        assert_eq!(target.descriptor.id(), "mail.send");
        assert_eq!(target.args, vec!["Bob", "hi"]);
        assert!(registry.dispatch_command("console", "nothing here").await.unwrap().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let node = config.get(COMMANDS_SECTION);
        assert_eq!(lookup_bool(&node, &["mail", "enabled"]), Some(true));
        assert_eq!(lookup_bool(&node, &["mail", "send", "enabled"]), Some(true));
        assert_eq!(registry.command_owner("mail.send").await.as_deref(), Some("mail"));
    }

    #[tokio::test]
    async fn enable_is_idempotent_and_requires_pre_enable() {
        let registry = registry(Arc::new(MemoryConfigStore::new()), Arc::new(AtomicUsize::new(0)));
        registry.load(&ModuleSource::scan("nucleus")).await.unwrap();

        let err = registry.enable("mail").await.unwrap_err();
        assert!(matches!(err, ModuleError::InvalidState { .. }));

        registry.pre_enable("mail").await.unwrap();
        registry.enable("mail").await.unwrap();
        registry.enable("mail").await.unwrap();
        assert_eq!(registry.command_tree().await.len(), 2);

        assert!(matches!(registry.enable("ban").await, Err(ModuleError::Discovery { .. })));
        assert!(matches!(
            registry.load(&ModuleSource::scan("nucleus")).await,
            Err(ModuleError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn disabled_command_is_left_out() {
        let mut send = toml::Table::new();
        send.insert("enabled".into(), toml::Value::Boolean(false));
        let mut mail = toml::Table::new();
        mail.insert("send".into(), toml::Value::Table(send));
        let mut commands = toml::Table::new();
        commands.insert("mail".into(), toml::Value::Table(mail));
        let mut document = toml::Table::new();
        document.insert(COMMANDS_SECTION.into(), toml::Value::Table(commands));

        let registry = registry(
            Arc::new(MemoryConfigStore::from_table(document)),
            Arc::new(AtomicUsize::new(0)),
        );
        registry.start(&ModuleSource::scan("nucleus")).await.unwrap();

        let tree = registry.command_tree().await;
        assert!(tree.resolve("mail").is_some());
        assert!(tree.resolve("mail send").is_none());
    }

    #[tokio::test]
    async fn subcommands_sharing_an_alias_are_configured_apart() {
        let document: toml::Table = toml::from_str(
            r#"
            [commands.mail.clear]
            enabled = false
            "#,
        )
        .unwrap();
        let config = Arc::new(MemoryConfigStore::from_table(document));
        let catalog = Catalog::builder()
            .module(ModuleInfo::new("mail", "Mail", "nucleus.modules.mail"))
            .command(
                "nucleus.modules.mail.commands.mail",
                CommandSpec::new(CommandDescriptor::new("mail.mail", "mail"), |_| {
                    Ok(Echo { calls: Arc::default() })
                }),
            )
            .command(
                "nucleus.modules.mail.commands.clear",
                CommandSpec::new(CommandDescriptor::new("mail.clear", "clear").subcommand_of("mail.mail"), |_| {
                    Ok(Echo { calls: Arc::default() })
                }),
            )
            .module(ModuleInfo::new("warn", "Warn", "nucleus.modules.warn"))
            .command(
                "nucleus.modules.warn.commands.warnings",
                CommandSpec::new(CommandDescriptor::new("warn.warnings", "warnings"), |_| {
                    Ok(Echo { calls: Arc::default() })
                }),
            )
            .command(
                "nucleus.modules.warn.commands.clear",
                CommandSpec::new(
                    CommandDescriptor::new("warn.clear", "clear").subcommand_of("warn.warnings"),
                    |_| Ok(Echo { calls: Arc::default() }),
                ),
            )
            .build()
            .unwrap();
        let ctx = ServiceContext::builder("test").config(config.clone()).build();
        let registry = ModuleRegistry::new(Arc::new(ctx), catalog);
        registry.start(&ModuleSource::scan("nucleus.modules")).await.unwrap();

        let tree = registry.command_tree().await;
        assert!(tree.resolve("mail clear").is_none());
        assert_eq!(tree.resolve("warnings clear").unwrap().id(), "warn.clear");

        let node = config.get(COMMANDS_SECTION);
        assert_eq!(lookup_bool(&node, &["mail", "clear", "enabled"]), Some(false));
        assert_eq!(lookup_bool(&node, &["warnings", "clear", "enabled"]), Some(true));
    }
}
