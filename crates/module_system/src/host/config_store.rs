//! Configuration store collaborator.
//!
//! Configuration is kept as one TOML node per section (usually a module id,
//! plus the shared `commands` section). [`TomlConfigStore`] persists the whole
//! document to a single file.

use crate::error::HostError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A configuration subtree.
pub type ConfigNode = toml::Value;

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Returns the section's node, or an empty table if it does not exist.
    fn get(&self, section: &str) -> ConfigNode;

    /// Replaces a section.
    fn set(&self, section: &str, node: ConfigNode);

    /// Adds every key from `defaults` that the section does not already have.
    fn merge_defaults(&self, section: &str, defaults: &toml::Table);

    /// Persists the current state.
    async fn save(&self) -> Result<(), HostError>;

    /// Re-reads the backing storage, replacing every section. Stores with
    /// nothing behind them keep their state.
    async fn reload(&self) -> Result<(), HostError> {
        Ok(())
    }
}

/// Recursively copies keys missing from `target` out of `defaults`.
/// Existing values always win, including when their type differs.
pub fn merge_missing(target: &mut toml::Table, defaults: &toml::Table) {
    for (key, default) in defaults {
        match (target.get_mut(key), default) {
            (None, _) => {
                target.insert(key.clone(), default.clone());
            }
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_missing(existing, nested);
            }
            (Some(_), _) => {}
        }
    }
}

/// Follows `path` through nested tables and reads a boolean.
pub fn lookup_bool(node: &ConfigNode, path: &[&str]) -> Option<bool> {
    let mut current = node;
    for key in path {
        current = current.as_table()?.get(*key)?;
    }
    current.as_bool()
}

fn merge_section(sections: &DashMap<String, ConfigNode>, section: &str, defaults: &toml::Table) {
    let mut entry = sections
        .entry(section.to_string())
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    match entry.value_mut() {
        toml::Value::Table(table) => merge_missing(table, defaults),
        _ => warn!("⚠️ Config section {} is not a table, defaults not merged", section),
    }
}

fn snapshot(sections: &DashMap<String, ConfigNode>) -> toml::Table {
    let mut keys: Vec<String> = sections.iter().map(|entry| entry.key().clone()).collect();
    keys.sort();
    let mut table = toml::Table::new();
    for key in keys {
        if let Some(node) = sections.get(&key) {
            table.insert(key, node.value().clone());
        }
    }
    table
}

/// Store kept only in memory; `save` is a no-op.
#[derive(Default)]
pub struct MemoryConfigStore {
    sections: DashMap<String, ConfigNode>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from a parsed TOML document.
    pub fn from_table(table: toml::Table) -> Self {
        let store = Self::new();
        for (key, value) in table {
            store.sections.insert(key, value);
        }
        store
    }

    /// Snapshot of every section, sorted by name.
    pub fn to_table(&self) -> toml::Table {
        snapshot(&self.sections)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    fn get(&self, section: &str) -> ConfigNode {
        self.sections
            .get(section)
            .map(|node| node.value().clone())
            .unwrap_or_else(|| toml::Value::Table(toml::Table::new()))
    }

    fn set(&self, section: &str, node: ConfigNode) {
        self.sections.insert(section.to_string(), node);
    }

    fn merge_defaults(&self, section: &str, defaults: &toml::Table) {
        merge_section(&self.sections, section, defaults);
    }

    async fn save(&self) -> Result<(), HostError> {
        Ok(())
    }
}

/// Store backed by a TOML file on disk.
pub struct TomlConfigStore {
    path: PathBuf,
    sections: DashMap<String, ConfigNode>,
}

impl TomlConfigStore {
    /// Loads the file if it exists; a missing file starts an empty store that
    /// is created on the first [`ConfigStore::save`].
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let path = path.as_ref().to_path_buf();
        let sections = DashMap::new();

        match read_document(&path).await? {
            Some(table) => {
                for (key, value) in table {
                    sections.insert(key, value);
                }
                info!("Loaded module configuration from {}", path.display());
            }
            None => debug!("No module configuration at {}, starting empty", path.display()),
        }

        Ok(Self { path, sections })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigStore for TomlConfigStore {
    fn get(&self, section: &str) -> ConfigNode {
        self.sections
            .get(section)
            .map(|node| node.value().clone())
            .unwrap_or_else(|| toml::Value::Table(toml::Table::new()))
    }

    fn set(&self, section: &str, node: ConfigNode) {
        self.sections.insert(section.to_string(), node);
    }

    fn merge_defaults(&self, section: &str, defaults: &toml::Table) {
        merge_section(&self.sections, section, defaults);
    }

    async fn save(&self) -> Result<(), HostError> {
        let content = toml::to_string_pretty(&snapshot(&self.sections))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, content).await?;
        debug!("Saved module configuration to {}", self.path.display());
        Ok(())
    }

    /// A file that has since disappeared leaves the store as it was.
    async fn reload(&self) -> Result<(), HostError> {
        let Some(table) = read_document(&self.path).await? else {
            warn!("⚠️ Module configuration {} is gone, keeping current values", self.path.display());
            return Ok(());
        };

        self.sections.retain(|key, _| table.contains_key(key));
        for (key, value) in table {
            self.sections.insert(key, value);
        }
        info!("🔄 Reloaded module configuration from {}", self.path.display());
        Ok(())
    }
}

async fn read_document(path: &Path) -> Result<Option<toml::Table>, HostError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(path).await?;
    Ok(Some(toml::from_str(&content)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(src: &str) -> toml::Table {
        toml::from_str(src).expect("valid toml")
    }

    #[test]
    fn merge_keeps_existing_values() {
        let mut target = table("enabled = false\n[limits]\nmax = 3\n");
        let defaults = table("enabled = true\ncooldown = 0\n[limits]\nmax = 10\nmin = 1\n");
        merge_missing(&mut target, &defaults);

        assert_eq!(target["enabled"].as_bool(), Some(false));
        assert_eq!(target["cooldown"].as_integer(), Some(0));
        assert_eq!(target["limits"]["max"].as_integer(), Some(3));
        assert_eq!(target["limits"]["min"].as_integer(), Some(1));
    }

    #[test]
    fn missing_section_is_empty_table() {
        let store = MemoryConfigStore::new();
        let node = store.get("warn");
        assert!(node.as_table().map(|t| t.is_empty()).unwrap_or(false));
        assert_eq!(lookup_bool(&node, &["enabled"]), None);
    }

    #[test]
    fn lookup_bool_walks_nested_tables() {
        let store = MemoryConfigStore::from_table(table("[commands.warn]\nenabled = false\n"));
        assert_eq!(lookup_bool(&store.get("commands"), &["warn", "enabled"]), Some(false));
        assert_eq!(lookup_bool(&store.get("commands"), &["mute", "enabled"]), None);
    }

    #[tokio::test]
    async fn toml_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("modules.toml");

        let store = TomlConfigStore::load(&path).await.unwrap();
        store.merge_defaults("commandspy", &table("use-whitelist = true\ncommands = []\n"));
        store.save().await.unwrap();
        assert!(path.exists());

        let reloaded = TomlConfigStore::load(&path).await.unwrap();
        assert_eq!(lookup_bool(&reloaded.get("commandspy"), &["use-whitelist"]), Some(true));
    }

    #[tokio::test]
    async fn toml_store_reload_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modules.toml");
        tokio::fs::write(&path, "[commandspy]\nuse-whitelist = false\n[afk]\nenabled = true\n")
            .await
            .unwrap();

        let store = TomlConfigStore::load(&path).await.unwrap();
        tokio::fs::write(&path, "[commandspy]\nuse-whitelist = true\n").await.unwrap();
        store.reload().await.unwrap();

        assert_eq!(lookup_bool(&store.get("commandspy"), &["use-whitelist"]), Some(true));
        assert_eq!(lookup_bool(&store.get("afk"), &["enabled"]), None);

        tokio::fs::write(&path, "broken = = toml").await.unwrap();
        assert!(matches!(store.reload().await, Err(HostError::TomlDe(_))));
        assert_eq!(lookup_bool(&store.get("commandspy"), &["use-whitelist"]), Some(true));
    }

    #[tokio::test]
    async fn toml_store_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        tokio::fs::write(&path, "this is = = not toml").await.unwrap();

        let result = TomlConfigStore::load(&path).await;
        assert!(matches!(result, Err(HostError::TomlDe(_))));
    }
}
