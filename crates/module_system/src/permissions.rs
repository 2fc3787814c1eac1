//! Permission registry aggregated across every module.
//!
//! Keys are dotted strings. A duplicate registration either overwrites the
//! earlier description and level ([`DuplicatePolicy::LastWins`], the default)
//! or is refused ([`DuplicatePolicy::Reject`]).

use crate::command::CommandDescriptor;
use crate::error::ModuleError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Suggested default tier for a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedLevel {
    None,
    User,
    Mod,
    #[default]
    Admin,
    Owner,
}

impl fmt::Display for SuggestedLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SuggestedLevel::None => "NONE",
            SuggestedLevel::User => "USER",
            SuggestedLevel::Mod => "MOD",
            SuggestedLevel::Admin => "ADMIN",
            SuggestedLevel::Owner => "OWNER",
        };
        f.write_str(name)
    }
}

/// Description and suggested level declared alongside a permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionInfo {
    pub description: String,
    pub level: SuggestedLevel,
}

impl PermissionInfo {
    pub fn new(description: impl Into<String>, level: SuggestedLevel) -> Self {
        Self {
            description: description.into(),
            level,
        }
    }
}

/// A registered permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionEntry {
    pub key: String,
    pub description: String,
    pub level: SuggestedLevel,
    /// Module that registered the entry last.
    pub module: Option<String>,
}

/// What to do when a key is registered a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    #[default]
    LastWins,
    Reject,
}

/// The permissions belonging to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPermissions {
    pub command: String,
    pub base: String,
    /// Suggested level of the base permission.
    pub level: SuggestedLevel,
    pub suffixes: Vec<String>,
}

impl CommandPermissions {
    /// The permission set a descriptor declares, with the entries its
    /// suffixes would register.
    pub fn from_descriptor(descriptor: &CommandDescriptor) -> (Self, Vec<(String, PermissionInfo)>) {
        let base = descriptor.base_permission();
        let mut suffixes = Vec::new();
        let mut entries = Vec::new();

        for (suffix, info) in descriptor.permission_suffixes() {
            entries.push((format!("{}.{}", base, suffix), info));
            suffixes.push(suffix);
        }

        let permissions = Self {
            command: descriptor.id().to_string(),
            base,
            level: descriptor.suggested_level(),
            suffixes,
        };
        (permissions, entries)
    }

    /// Full key for a suffix of this command's base permission.
    pub fn with_suffix(&self, suffix: &str) -> String {
        format!("{}.{}", self.base, suffix)
    }

    pub fn others(&self) -> String {
        self.with_suffix("others")
    }
}

#[derive(Default)]
pub struct PermissionRegistry {
    entries: DashMap<String, PermissionEntry>,
    commands: DashMap<String, CommandPermissions>,
    policy: DuplicatePolicy,
}

impl PermissionRegistry {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            entries: DashMap::new(),
            commands: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    pub fn register(&self, key: &str, info: PermissionInfo) -> Result<(), ModuleError> {
        self.insert(key, info, None)
    }

    /// Registers a key on behalf of a module.
    pub fn register_for_module(&self, module: &str, key: &str, info: PermissionInfo) -> Result<(), ModuleError> {
        self.insert(key, info, Some(module))
    }

    fn insert(&self, key: &str, info: PermissionInfo, module: Option<&str>) -> Result<(), ModuleError> {
        let entry = PermissionEntry {
            key: key.to_string(),
            description: info.description,
            level: info.level,
            module: module.map(str::to_string),
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => match self.policy {
                DuplicatePolicy::Reject => Err(ModuleError::DuplicatePermission(key.to_string())),
                DuplicatePolicy::LastWins => {
                    debug!(
                        "Permission {} re-registered ({} -> {})",
                        key,
                        occupied.get().level,
                        entry.level
                    );
                    occupied.insert(entry);
                    Ok(())
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    /// Checks that every key could be registered under the current policy
    /// without registering any of them.
    pub fn check_batch<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Result<(), ModuleError> {
        if self.policy == DuplicatePolicy::LastWins {
            return Ok(());
        }

        let mut seen = HashSet::new();
        for key in keys {
            if self.entries.contains_key(key) || !seen.insert(key) {
                return Err(ModuleError::DuplicatePermission(key.to_string()));
            }
        }
        Ok(())
    }

    /// Registers a batch of keys for a module. Either every key is
    /// registered or, on a refused duplicate, none of them.
    pub fn register_batch(&self, module: &str, batch: Vec<(String, PermissionInfo)>) -> Result<(), ModuleError> {
        self.check_batch(batch.iter().map(|(key, _)| key.as_str()))?;

        let mut inserted: Vec<String> = Vec::with_capacity(batch.len());
        for (key, info) in batch {
            if let Err(e) = self.insert(&key, info, Some(module)) {
                // Under Reject every inserted key was vacant before.
                for key in &inserted {
                    self.entries.remove(key);
                }
                return Err(e);
            }
            inserted.push(key);
        }
        Ok(())
    }

    /// Remembers the permission set of a command whose suffix entries were
    /// registered separately.
    pub fn record_command(&self, permissions: CommandPermissions) {
        self.commands.insert(permissions.command.clone(), permissions);
    }

    pub fn lookup(&self, key: &str) -> Option<PermissionEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Every entry, sorted by key.
    pub fn all_entries(&self) -> Vec<PermissionEntry> {
        let mut entries: Vec<PermissionEntry> = self.entries.iter().map(|entry| entry.value().clone()).collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers every suffix a command declares under its base permission
    /// and remembers the command's permission set.
    pub fn register_command(&self, module: &str, descriptor: &CommandDescriptor) -> Result<CommandPermissions, ModuleError> {
        let (permissions, entries) = CommandPermissions::from_descriptor(descriptor);
        self.register_batch(module, entries)?;
        self.record_command(permissions.clone());
        Ok(permissions)
    }

    /// The permission set of a registered command.
    pub fn for_command(&self, command_id: &str) -> Option<CommandPermissions> {
        self.commands.get(command_id).map(|entry| entry.value().clone())
    }
}
