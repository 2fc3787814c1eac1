//! Command descriptors: static metadata describing a command before any
//! runtime binding.

use crate::context::Companion;
use crate::error::{guarded, ActivationError};
use crate::permissions::{PermissionInfo, SuggestedLevel};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Which runtime platforms a command, listener or task can load on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlatformRequirement {
    #[default]
    Any,
    /// Platform ids, matched case-insensitively.
    OneOf(Vec<String>),
}

impl PlatformRequirement {
    pub fn one_of(ids: &[&str]) -> Self {
        PlatformRequirement::OneOf(ids.iter().map(|id| id.to_string()).collect())
    }

    pub fn allows(&self, platform_id: &str) -> bool {
        match self {
            PlatformRequirement::Any => true,
            PlatformRequirement::OneOf(ids) => ids.iter().any(|id| id.eq_ignore_ascii_case(platform_id)),
        }
    }
}

pub type CompanionPredicate = Arc<dyn Fn(&Companion) -> anyhow::Result<bool> + Send + Sync>;

/// Gate on the presence of the optional companion subsystem.
#[derive(Clone, Default)]
pub enum CompanionRequirement {
    #[default]
    Unconditional,
    /// Included only when the companion is present and `when` (if any) holds.
    CompanionOnly {
        when: Option<CompanionPredicate>,
        notify: bool,
    },
    /// Included only when the companion is absent.
    WithoutCompanion { notify: bool },
}

impl fmt::Debug for CompanionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompanionRequirement::Unconditional => f.write_str("Unconditional"),
            CompanionRequirement::CompanionOnly { when, notify } => f
                .debug_struct("CompanionOnly")
                .field("when", &when.is_some())
                .field("notify", notify)
                .finish(),
            CompanionRequirement::WithoutCompanion { notify } => {
                f.debug_struct("WithoutCompanion").field("notify", notify).finish()
            }
        }
    }
}

impl CompanionRequirement {
    pub fn companion_only() -> Self {
        CompanionRequirement::CompanionOnly { when: None, notify: true }
    }

    pub fn companion_when<F>(predicate: F) -> Self
    where
        F: Fn(&Companion) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        CompanionRequirement::CompanionOnly {
            when: Some(Arc::new(predicate)),
            notify: true,
        }
    }

    pub fn without_companion() -> Self {
        CompanionRequirement::WithoutCompanion { notify: true }
    }

    /// Whether a failed gate should be reported at warn level.
    pub fn notifies(&self) -> bool {
        match self {
            CompanionRequirement::Unconditional => false,
            CompanionRequirement::CompanionOnly { notify, .. } => *notify,
            CompanionRequirement::WithoutCompanion { notify } => *notify,
        }
    }

    /// Decides inclusion. An `Err` means the predicate failed and the caller
    /// must exclude the command.
    pub fn evaluate(&self, companion: Option<&Companion>) -> Result<bool, ActivationError> {
        match (self, companion) {
            (CompanionRequirement::Unconditional, _) => Ok(true),
            (CompanionRequirement::CompanionOnly { .. }, None) => Ok(false),
            (CompanionRequirement::CompanionOnly { when: None, .. }, Some(_)) => Ok(true),
            (CompanionRequirement::CompanionOnly { when: Some(when), .. }, Some(companion)) => {
                guarded(|| when(companion))
            }
            (CompanionRequirement::WithoutCompanion { .. }, present) => Ok(present.is_none()),
        }
    }
}

/// Metadata for one command.
///
/// The first alias is the primary alias. Aliases are stored lower-case and
/// compared case-insensitively.
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    id: String,
    aliases: Vec<String>,
    root_aliases: Vec<String>,
    parent: Option<String>,
    permission_prefix: Option<String>,
    main_permission: Option<String>,
    level: SuggestedLevel,
    supports_others: bool,
    suffixes: Vec<(String, PermissionInfo)>,
    platform: PlatformRequirement,
    companion: CompanionRequirement,
    arguments: serde_json::Value,
    description: Option<String>,
}

impl CommandDescriptor {
    pub fn new(id: impl Into<String>, primary_alias: &str) -> Self {
        Self {
            id: id.into(),
            aliases: vec![normalize(primary_alias)],
            root_aliases: Vec::new(),
            parent: None,
            permission_prefix: None,
            main_permission: None,
            level: SuggestedLevel::default(),
            supports_others: false,
            suffixes: Vec::new(),
            platform: PlatformRequirement::Any,
            companion: CompanionRequirement::Unconditional,
            arguments: serde_json::Value::Null,
            description: None,
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        let alias = normalize(alias);
        if !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
        self
    }

    pub fn aliases_from(self, aliases: &[&str]) -> Self {
        aliases.iter().fold(self, |descriptor, alias| descriptor.alias(alias))
    }

    /// An extra alias claimed in the root namespace, even for a subcommand.
    pub fn root_alias(mut self, alias: &str) -> Self {
        self.root_aliases.push(normalize(alias));
        self
    }

    pub fn subcommand_of(mut self, parent_id: impl Into<String>) -> Self {
        self.parent = Some(parent_id.into());
        self
    }

    pub fn permission_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.permission_prefix = Some(prefix.into());
        self
    }

    /// Overrides the primary alias as the last segment of the base permission.
    pub fn main_permission(mut self, main: impl Into<String>) -> Self {
        self.main_permission = Some(main.into());
        self
    }

    pub fn level(mut self, level: SuggestedLevel) -> Self {
        self.level = level;
        self
    }

    pub fn supports_others(mut self) -> Self {
        self.supports_others = true;
        self
    }

    pub fn suffix(mut self, suffix: &str, description: &str, level: SuggestedLevel) -> Self {
        self.suffixes.push((suffix.to_string(), PermissionInfo::new(description, level)));
        self
    }

    pub fn requires_platform(mut self, platform: PlatformRequirement) -> Self {
        self.platform = platform;
        self
    }

    pub fn companion(mut self, companion: CompanionRequirement) -> Self {
        self.companion = companion;
        self
    }

    pub fn arguments(mut self, arguments: serde_json::Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn primary_alias(&self) -> &str {
        &self.aliases[0]
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn root_aliases(&self) -> &[String] {
        &self.root_aliases
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn platform(&self) -> &PlatformRequirement {
        &self.platform
    }

    pub fn companion_requirement(&self) -> &CompanionRequirement {
        &self.companion
    }

    pub fn suggested_level(&self) -> SuggestedLevel {
        self.level
    }

    pub fn argument_schema(&self) -> &serde_json::Value {
        &self.arguments
    }

    pub fn description_text(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// `[prefix.]main`, where `main` is the override or the primary alias.
    pub fn base_permission(&self) -> String {
        let main = self.main_permission.as_deref().unwrap_or_else(|| self.primary_alias());
        match &self.permission_prefix {
            Some(prefix) => format!("{}.{}", prefix, main),
            None => main.to_string(),
        }
    }

    /// Declared suffixes, plus `others` when the command supports targeting
    /// other players.
    pub fn permission_suffixes(&self) -> Vec<(String, PermissionInfo)> {
        let mut suffixes = self.suffixes.clone();
        if self.supports_others && !suffixes.iter().any(|(s, _)| s == "others") {
            suffixes.push((
                "others".to_string(),
                PermissionInfo::new(format!("Allows /{} on other players", self.primary_alias()), SuggestedLevel::Admin),
            ));
        }
        suffixes
    }
}

fn normalize(alias: &str) -> String {
    alias.trim().to_lowercase()
}

/// A resolved command invocation.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    /// Whoever issued the command (player name, "console", ...).
    pub source: String,
    /// The alias path that matched, e.g. `mail send`.
    pub path: String,
    pub args: Vec<String>,
}

/// Executes a command once the host has resolved it.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, invocation: &CommandInvocation) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_are_normalized_and_deduplicated() {
        let descriptor = CommandDescriptor::new("warn.warn", "Warn").aliases_from(&["WARNING", "warn", " addwarning "]);
        assert_eq!(descriptor.aliases(), &["warn", "warning", "addwarning"]);
        assert_eq!(descriptor.primary_alias(), "warn");
    }

    #[test]
    fn base_permission_uses_prefix_and_override() {
        let plain = CommandDescriptor::new("sudo.sudo", "sudo");
        assert_eq!(plain.base_permission(), "sudo");

        let insert = CommandDescriptor::new("item.lore.insert", "insert")
            .permission_prefix("lore")
            .main_permission("set");
        assert_eq!(insert.base_permission(), "lore.set");
    }

    #[test]
    fn supports_others_adds_admin_suffix() {
        let descriptor = CommandDescriptor::new("misc.god", "god").supports_others();
        let suffixes = descriptor.permission_suffixes();
        assert_eq!(suffixes.len(), 1);
        assert_eq!(suffixes[0].0, "others");
        assert_eq!(suffixes[0].1.level, SuggestedLevel::Admin);
    }

    #[test]
    fn platform_match_ignores_case() {
        let requirement = PlatformRequirement::one_of(&["Server"]);
        assert!(requirement.allows("server"));
        assert!(!requirement.allows("client"));
        assert!(PlatformRequirement::Any.allows("anything"));
    }

    #[test]
    fn companion_gate_outcomes() {
        let companion = Companion::new("mixins", toml::Table::new());

        assert!(CompanionRequirement::Unconditional.evaluate(None).unwrap());
        assert!(!CompanionRequirement::companion_only().evaluate(None).unwrap());
        assert!(CompanionRequirement::companion_only().evaluate(Some(&companion)).unwrap());
        assert!(CompanionRequirement::without_companion().evaluate(None).unwrap());
        assert!(!CompanionRequirement::without_companion().evaluate(Some(&companion)).unwrap());

        let failing = CompanionRequirement::companion_when(|_| Err(anyhow::anyhow!("bad config")));
        assert!(failing.evaluate(Some(&companion)).is_err());
    }
}
