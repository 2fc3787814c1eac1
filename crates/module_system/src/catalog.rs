//! The compile-time registration table.
//!
//! Every command, listener and task the host knows about is registered here
//! under a dotted path (`nucleus.modules.warn.commands.warn`). Discovery picks
//! entries out of the catalog either by an explicit manifest or by package
//! prefix.

use crate::command::{CommandDescriptor, CommandExecutor, PlatformRequirement};
use crate::context::ServiceContext;
use crate::error::ModuleError;
use crate::listener::{Activation, Listener};
use crate::task::ScheduledTask;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

pub type Factory<T> = Arc<dyn Fn(&ServiceContext) -> anyhow::Result<Arc<T>> + Send + Sync>;

/// Runs before any module is enabled. Typically registers services.
pub type PreEnableHook = Arc<dyn Fn(&ServiceContext) -> anyhow::Result<()> + Send + Sync>;

pub struct CommandSpec {
    pub descriptor: Arc<CommandDescriptor>,
    factory: Factory<dyn CommandExecutor>,
    pub skip_on_error: bool,
}

impl CommandSpec {
    pub fn new<E, F>(descriptor: CommandDescriptor, factory: F) -> Self
    where
        E: CommandExecutor + 'static,
        F: Fn(&ServiceContext) -> anyhow::Result<E> + Send + Sync + 'static,
    {
        Self {
            descriptor: Arc::new(descriptor),
            factory: Arc::new(move |ctx: &ServiceContext| -> anyhow::Result<Arc<dyn CommandExecutor>> {
                Ok(Arc::new(factory(ctx)?) as Arc<dyn CommandExecutor>)
            }),
            skip_on_error: false,
        }
    }

    /// Construction failures skip the command with a warning.
    pub fn skip_on_error(mut self) -> Self {
        self.skip_on_error = true;
        self
    }

    pub fn instantiate(&self, ctx: &ServiceContext) -> anyhow::Result<Arc<dyn CommandExecutor>> {
        (self.factory)(ctx)
    }
}

pub struct ListenerSpec {
    pub name: String,
    pub activation: Activation,
    pub platform: PlatformRequirement,
    factory: Factory<dyn Listener>,
    pub skip_on_error: bool,
}

impl ListenerSpec {
    pub fn new<L, F>(name: impl Into<String>, activation: Activation, factory: F) -> Self
    where
        L: Listener + 'static,
        F: Fn(&ServiceContext) -> anyhow::Result<L> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            activation,
            platform: PlatformRequirement::Any,
            factory: Arc::new(move |ctx: &ServiceContext| -> anyhow::Result<Arc<dyn Listener>> {
                Ok(Arc::new(factory(ctx)?) as Arc<dyn Listener>)
            }),
            skip_on_error: false,
        }
    }

    pub fn requires_platform(mut self, platform: PlatformRequirement) -> Self {
        self.platform = platform;
        self
    }

    pub fn skip_on_error(mut self) -> Self {
        self.skip_on_error = true;
        self
    }

    pub fn instantiate(&self, ctx: &ServiceContext) -> anyhow::Result<Arc<dyn Listener>> {
        (self.factory)(ctx)
    }
}

pub struct TaskSpec {
    pub name: String,
    pub platform: PlatformRequirement,
    factory: Factory<dyn ScheduledTask>,
    pub skip_on_error: bool,
}

impl TaskSpec {
    pub fn new<T, F>(name: impl Into<String>, factory: F) -> Self
    where
        T: ScheduledTask + 'static,
        F: Fn(&ServiceContext) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            platform: PlatformRequirement::Any,
            factory: Arc::new(move |ctx: &ServiceContext| -> anyhow::Result<Arc<dyn ScheduledTask>> {
                Ok(Arc::new(factory(ctx)?) as Arc<dyn ScheduledTask>)
            }),
            skip_on_error: false,
        }
    }

    pub fn requires_platform(mut self, platform: PlatformRequirement) -> Self {
        self.platform = platform;
        self
    }

    pub fn skip_on_error(mut self) -> Self {
        self.skip_on_error = true;
        self
    }

    pub fn instantiate(&self, ctx: &ServiceContext) -> anyhow::Result<Arc<dyn ScheduledTask>> {
        (self.factory)(ctx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Command,
    Listener,
    Task,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ItemKind::Command => "command",
            ItemKind::Listener => "listener",
            ItemKind::Task => "task",
        };
        f.write_str(kind)
    }
}

#[derive(Clone)]
pub enum CatalogItem {
    Command(Arc<CommandSpec>),
    Listener(Arc<ListenerSpec>),
    Task(Arc<TaskSpec>),
    /// A base type that can never be loaded on its own.
    Abstract(ItemKind),
}

impl CatalogItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            CatalogItem::Command(_) => ItemKind::Command,
            CatalogItem::Listener(_) => ItemKind::Listener,
            CatalogItem::Task(_) => ItemKind::Task,
            CatalogItem::Abstract(kind) => *kind,
        }
    }
}

#[derive(Clone)]
pub struct CatalogEntry {
    pub path: String,
    pub item: CatalogItem,
}

impl CatalogEntry {
    pub fn is_abstract(&self) -> bool {
        matches!(self.item, CatalogItem::Abstract(_))
    }

    pub fn kind(&self) -> ItemKind {
        self.item.kind()
    }
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("path", &self.path)
            .field("kind", &self.kind())
            .field("abstract", &self.is_abstract())
            .finish()
    }
}

/// Static description of a module.
#[derive(Clone)]
pub struct ModuleInfo {
    pub id: String,
    pub name: String,
    /// Namespace prefix for the module's catalog paths.
    pub package: String,
    pub config_defaults: Option<toml::Table>,
    pub pre_enable: Option<PreEnableHook>,
}

impl ModuleInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            package: package.into(),
            config_defaults: None,
            pre_enable: None,
        }
    }

    pub fn config_defaults(mut self, defaults: toml::Table) -> Self {
        self.config_defaults = Some(defaults);
        self
    }

    pub fn pre_enable<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ServiceContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.pre_enable = Some(Arc::new(hook));
        self
    }

    /// Whether `path` lies inside this module's package.
    pub fn owns(&self, path: &str) -> bool {
        path.strip_prefix(&self.package)
            .map(|rest| rest.starts_with('.'))
            .unwrap_or(false)
    }
}

impl fmt::Debug for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("package", &self.package)
            .field("has_defaults", &self.config_defaults.is_some())
            .field("has_pre_enable", &self.pre_enable.is_some())
            .finish()
    }
}

/// Every module and item known at compile time.
#[derive(Default)]
pub struct Catalog {
    modules: Vec<Arc<ModuleInfo>>,
    entries: Vec<CatalogEntry>,
    by_path: HashMap<String, usize>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    pub fn module(&self, id: &str) -> Option<&Arc<ModuleInfo>> {
        self.modules.iter().find(|m| m.id == id)
    }

    /// Modules in declaration order.
    pub fn modules(&self) -> &[Arc<ModuleInfo>] {
        &self.modules
    }

    pub fn entry(&self, path: &str) -> Option<&CatalogEntry> {
        self.by_path.get(path).map(|&index| &self.entries[index])
    }

    /// Entries in declaration order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Concrete entries inside `module`'s package, in declaration order.
    pub fn entries_for<'a>(&'a self, module: &'a ModuleInfo) -> impl Iterator<Item = &'a CatalogEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| module.owns(&entry.path) && !entry.is_abstract())
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("modules", &self.modules.len())
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[derive(Default)]
pub struct CatalogBuilder {
    modules: Vec<ModuleInfo>,
    entries: Vec<CatalogEntry>,
}

impl CatalogBuilder {
    pub fn module(mut self, info: ModuleInfo) -> Self {
        self.modules.push(info);
        self
    }

    pub fn command(self, path: impl Into<String>, spec: CommandSpec) -> Self {
        self.entry(path, CatalogItem::Command(Arc::new(spec)))
    }

    pub fn listener(self, path: impl Into<String>, spec: ListenerSpec) -> Self {
        self.entry(path, CatalogItem::Listener(Arc::new(spec)))
    }

    pub fn task(self, path: impl Into<String>, spec: TaskSpec) -> Self {
        self.entry(path, CatalogItem::Task(Arc::new(spec)))
    }

    pub fn abstract_entry(self, path: impl Into<String>, kind: ItemKind) -> Self {
        self.entry(path, CatalogItem::Abstract(kind))
    }

    fn entry(mut self, path: impl Into<String>, item: CatalogItem) -> Self {
        self.entries.push(CatalogEntry { path: path.into(), item });
        self
    }

    pub fn build(self) -> Result<Catalog, ModuleError> {
        let mut seen_modules = std::collections::HashSet::new();
        for module in &self.modules {
            if !seen_modules.insert(module.id.as_str()) {
                return Err(ModuleError::DuplicateItem(format!("module {}", module.id)));
            }
        }

        let mut by_path = HashMap::new();
        for (index, entry) in self.entries.iter().enumerate() {
            if by_path.insert(entry.path.clone(), index).is_some() {
                return Err(ModuleError::DuplicateItem(entry.path.clone()));
            }
        }

        Ok(Catalog {
            modules: self.modules.into_iter().map(Arc::new).collect(),
            entries: self.entries,
            by_path,
        })
    }
}

/// An explicit list of modules and the catalog paths each one loads.
///
/// ```toml
/// [[module]]
/// id = "warn"
/// commands = ["nucleus.modules.warn.commands.warn"]
/// listeners = ["nucleus.modules.warn.listeners.join"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "module", default)]
    pub modules: Vec<ManifestModule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestModule {
    pub id: String,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub listeners: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
}

impl Manifest {
    pub fn from_toml_str(content: &str) -> Result<Self, ModuleError> {
        toml::from_str(content).map_err(|e| ModuleError::Config(format!("invalid manifest: {}", e)))
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ModuleError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ModuleError::Config(format!("cannot read manifest {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }
}

/// Where discovery takes its module list from.
#[derive(Debug, Clone)]
pub enum ModuleSource {
    Manifest(Manifest),
    /// Every catalog module whose package starts with `prefix`.
    Scan { prefix: String },
}

impl ModuleSource {
    pub fn scan(prefix: impl Into<String>) -> Self {
        ModuleSource::Scan { prefix: prefix.into() }
    }
}
