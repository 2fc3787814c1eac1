//! Modules and discovery.

use crate::catalog::{Catalog, CatalogEntry, CatalogItem, CommandSpec, ItemKind, ListenerSpec, ModuleInfo, ModuleSource, TaskSpec};
use crate::error::ModuleError;
use crate::host::{lookup_bool, ConfigStore};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ModuleState {
    Unloaded,
    PreEnabled,
    Enabled,
    Failed,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            ModuleState::Unloaded => "unloaded",
            ModuleState::PreEnabled => "pre-enabled",
            ModuleState::Enabled => "enabled",
            ModuleState::Failed => "failed",
        };
        f.write_str(state)
    }
}

/// A catalog item selected for a module.
pub struct ModuleItem<T> {
    pub path: String,
    pub spec: Arc<T>,
}

impl<T> Clone for ModuleItem<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            spec: self.spec.clone(),
        }
    }
}

/// A discovered module with the items it will load, in load order.
#[derive(Clone)]
pub struct Module {
    info: Arc<ModuleInfo>,
    commands: Vec<ModuleItem<CommandSpec>>,
    listeners: Vec<ModuleItem<ListenerSpec>>,
    tasks: Vec<ModuleItem<TaskSpec>>,
    state: ModuleState,
}

impl Module {
    fn new(info: Arc<ModuleInfo>) -> Self {
        Self {
            info,
            commands: Vec::new(),
            listeners: Vec::new(),
            tasks: Vec::new(),
            state: ModuleState::Unloaded,
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &Arc<ModuleInfo> {
        &self.info
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ModuleState) {
        self.state = state;
    }

    pub fn commands(&self) -> &[ModuleItem<CommandSpec>] {
        &self.commands
    }

    pub fn listeners(&self) -> &[ModuleItem<ListenerSpec>] {
        &self.listeners
    }

    pub fn tasks(&self) -> &[ModuleItem<TaskSpec>] {
        &self.tasks
    }

    pub fn summary(&self) -> ModuleSummary {
        ModuleSummary {
            id: self.info.id.clone(),
            name: self.info.name.clone(),
            state: self.state,
            commands: self.commands.len(),
            listeners: self.listeners.len(),
            tasks: self.tasks.len(),
        }
    }

    /// Adds a concrete entry. Listeners and tasks that cannot run on
    /// `platform_id` are dropped here; commands are filtered by the tree
    /// builder.
    fn add(&mut self, entry: &CatalogEntry, platform_id: &str) {
        match &entry.item {
            CatalogItem::Command(spec) => self.commands.push(ModuleItem {
                path: entry.path.clone(),
                spec: spec.clone(),
            }),
            CatalogItem::Listener(spec) => {
                if spec.platform.allows(platform_id) {
                    self.listeners.push(ModuleItem {
                        path: entry.path.clone(),
                        spec: spec.clone(),
                    });
                } else {
                    warn!("⚠️ Not loading listener {}: platform {} is not supported", entry.path, platform_id);
                }
            }
            CatalogItem::Task(spec) => {
                if spec.platform.allows(platform_id) {
                    self.tasks.push(ModuleItem {
                        path: entry.path.clone(),
                        spec: spec.clone(),
                    });
                } else {
                    warn!("⚠️ Not loading task {}: platform {} is not supported", entry.path, platform_id);
                }
            }
            CatalogItem::Abstract(_) => {}
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module").field("summary", &self.summary()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    pub id: String,
    pub name: String,
    pub state: ModuleState,
    pub commands: usize,
    pub listeners: usize,
    pub tasks: usize,
}

/// Resolves `source` against the catalog into an ordered list of modules.
///
/// Each discovered module's configuration defaults are merged into its
/// section of `config`; a module whose section has `enabled = false` is left
/// out. The caller is responsible for saving the store.
pub fn discover_modules(
    catalog: &Catalog,
    source: &ModuleSource,
    config: &dyn ConfigStore,
    platform_id: &str,
) -> Result<Vec<Module>, ModuleError> {
    let candidates = match source {
        ModuleSource::Manifest(manifest) => {
            let mut modules: Vec<Module> = Vec::with_capacity(manifest.modules.len());
            for listed in &manifest.modules {
                if modules.iter().any(|m| m.id() == listed.id) {
                    return Err(ModuleError::DuplicateItem(format!("module {} in manifest", listed.id)));
                }
                let info = catalog.module(&listed.id).ok_or_else(|| ModuleError::Discovery {
                    module: listed.id.clone(),
                    item: "module".to_string(),
                })?;

                let mut module = Module::new(info.clone());
                let declared = [
                    (ItemKind::Command, &listed.commands),
                    (ItemKind::Listener, &listed.listeners),
                    (ItemKind::Task, &listed.tasks),
                ];
                for (kind, paths) in declared {
                    for path in paths {
                        let entry = manifest_entry(catalog, &listed.id, path, kind)?;
                        module.add(entry, platform_id);
                    }
                }
                modules.push(module);
            }
            modules
        }
        ModuleSource::Scan { prefix } => {
            let modules: Vec<Module> = catalog
                .modules()
                .iter()
                .filter(|info| in_package(&info.package, prefix))
                .map(|info| {
                    let mut module = Module::new(info.clone());
                    for kind in [ItemKind::Command, ItemKind::Listener, ItemKind::Task] {
                        for entry in catalog.entries_for(info).filter(|e| e.kind() == kind) {
                            module.add(entry, platform_id);
                        }
                    }
                    module
                })
                .collect();
            if modules.is_empty() {
                warn!("⚠️ No modules found under {}", prefix);
            }
            modules
        }
    };

    let mut discovered = Vec::with_capacity(candidates.len());
    for module in candidates {
        if let Some(defaults) = &module.info.config_defaults {
            config.merge_defaults(module.id(), defaults);
        }

        if lookup_bool(&config.get(module.id()), &["enabled"]) == Some(false) {
            info!("Module {} is disabled in configuration, not loading", module.id());
            continue;
        }

        debug!(
            "🔍 Discovered module {} ({} commands, {} listeners, {} tasks)",
            module.id(),
            module.commands.len(),
            module.listeners.len(),
            module.tasks.len()
        );
        discovered.push(module);
    }

    Ok(discovered)
}

/// `package` is `prefix` itself or lies below it, on a `.` boundary.
fn in_package(package: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('.');
    prefix.is_empty()
        || package == prefix
        || package
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with('.'))
            .unwrap_or(false)
}

fn manifest_entry<'a>(
    catalog: &'a Catalog,
    module: &str,
    path: &str,
    kind: ItemKind,
) -> Result<&'a CatalogEntry, ModuleError> {
    let not_found = |what: String| ModuleError::Discovery {
        module: module.to_string(),
        item: what,
    };

    let entry = catalog.entry(path).ok_or_else(|| not_found(format!("{} {}", kind, path)))?;
    if entry.is_abstract() {
        return Err(not_found(format!("concrete {} {}", kind, path)));
    }
    if entry.kind() != kind {
        return Err(not_found(format!("{} {} (found a {})", kind, path, entry.kind())));
    }
    Ok(entry)
}
