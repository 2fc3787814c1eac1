//! Builds the command namespace from descriptors.
//!
//! A tree is built once from the union of every enabled module's descriptors
//! and is immutable afterwards. Rebuilding produces a new tree.

use crate::command::CommandDescriptor;
use crate::context::{Companion, ServiceContext};
use crate::error::ModuleError;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ROOT_SCOPE: &str = "<root>";

/// Runtime facts the builder evaluates descriptors against.
#[derive(Debug, Clone, Default)]
pub struct BuildEnv {
    pub platform_id: String,
    pub companion: Option<Companion>,
    pub debug: bool,
    /// Command ids switched off in configuration.
    pub disabled: HashSet<String>,
}

impl BuildEnv {
    pub fn new(platform_id: impl Into<String>) -> Self {
        Self {
            platform_id: platform_id.into(),
            ..Default::default()
        }
    }

    pub fn from_context(ctx: &ServiceContext) -> Self {
        Self {
            platform_id: ctx.platform_id(),
            companion: ctx.companion().cloned(),
            debug: ctx.is_debug(),
            disabled: HashSet::new(),
        }
    }

    pub fn with_companion(mut self, companion: Companion) -> Self {
        self.companion = Some(companion);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn disable(mut self, command_id: impl Into<String>) -> Self {
        self.disabled.insert(command_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExclusionReason {
    Platform,
    Companion,
    Disabled,
    ParentExcluded,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ExclusionReason::Platform => "platform requirement not met",
            ExclusionReason::Companion => "companion requirement not met",
            ExclusionReason::Disabled => "disabled in configuration",
            ExclusionReason::ParentExcluded => "parent command excluded",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusion {
    pub command: String,
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone)]
pub struct CommandNode {
    pub descriptor: Arc<CommandDescriptor>,
    pub children: Vec<CommandNode>,
}

impl CommandNode {
    pub fn id(&self) -> &str {
        self.descriptor.id()
    }
}

/// The result of matching raw input against the lookup table.
#[derive(Debug, Clone)]
pub struct DispatchTarget {
    pub descriptor: Arc<CommandDescriptor>,
    /// The alias path that matched.
    pub path: String,
    /// Remaining input after the path.
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CommandTree {
    roots: Vec<CommandNode>,
    lookup: HashMap<String, Arc<CommandDescriptor>>,
    excluded: Vec<Exclusion>,
    included: usize,
}

impl CommandTree {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a tree from `descriptors`, in declaration order.
    ///
    /// Fails on duplicate ids, unknown or cyclic parents and alias
    /// collisions inside one scope. Descriptors failing a platform,
    /// companion or configuration gate are excluded, along with their
    /// subcommands.
    pub fn build(descriptors: &[Arc<CommandDescriptor>], env: &BuildEnv) -> Result<Self, ModuleError> {
        let mut by_id: HashMap<&str, &Arc<CommandDescriptor>> = HashMap::new();
        for descriptor in descriptors {
            if by_id.insert(descriptor.id(), descriptor).is_some() {
                return Err(ModuleError::DuplicateItem(descriptor.id().to_string()));
            }
        }

        for descriptor in descriptors {
            check_ancestry(descriptor, &by_id)?;
        }

        let mut verdicts: HashMap<String, Option<ExclusionReason>> = HashMap::new();
        for descriptor in descriptors {
            verdict(descriptor, &by_id, env, &mut verdicts);
        }

        let included: Vec<&Arc<CommandDescriptor>> = descriptors
            .iter()
            .filter(|d| matches!(verdicts.get(d.id()), Some(None)))
            .collect();

        check_scopes(&included)?;

        let mut children_of: HashMap<&str, Vec<&Arc<CommandDescriptor>>> = HashMap::new();
        let mut roots = Vec::new();
        for descriptor in included.iter().copied() {
            match descriptor.parent() {
                Some(parent) => children_of.entry(parent).or_default().push(descriptor),
                None => roots.push(descriptor),
            }
        }

        let mut lookup = HashMap::new();
        let roots: Vec<CommandNode> = roots
            .into_iter()
            .map(|root| build_node(root, &[], &children_of, &mut lookup))
            .collect();

        let excluded: Vec<Exclusion> = descriptors
            .iter()
            .filter_map(|d| match verdicts.get(d.id()) {
                Some(Some(reason)) => Some(Exclusion {
                    command: d.id().to_string(),
                    reason: *reason,
                }),
                _ => None,
            })
            .collect();

        debug!(
            "🌳 Built command tree: {} commands, {} paths, {} excluded",
            included.len(),
            lookup.len(),
            excluded.len()
        );

        Ok(Self {
            roots,
            lookup,
            excluded,
            included: included.len(),
        })
    }

    /// Exact lookup of a space-separated alias path, case-insensitive.
    pub fn resolve(&self, path: &str) -> Option<Arc<CommandDescriptor>> {
        self.lookup.get(&normalize_path(path)).cloned()
    }

    /// Finds the longest alias path that prefixes `input`.
    pub fn dispatch_target(&self, input: &str) -> Option<DispatchTarget> {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        (1..=tokens.len()).rev().find_map(|len| {
            let path = tokens[..len].join(" ").to_lowercase();
            self.lookup.get(&path).map(|descriptor| DispatchTarget {
                descriptor: descriptor.clone(),
                path,
                args: tokens[len..].iter().map(|s| s.to_string()).collect(),
            })
        })
    }

    pub fn roots(&self) -> &[CommandNode] {
        &self.roots
    }

    pub fn excluded(&self) -> &[Exclusion] {
        &self.excluded
    }

    pub fn is_excluded(&self, command_id: &str) -> bool {
        self.excluded.iter().any(|e| e.command == command_id)
    }

    /// Every lookup path, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.lookup.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of included commands.
    pub fn len(&self) -> usize {
        self.included
    }

    pub fn is_empty(&self) -> bool {
        self.included == 0
    }

    pub fn contains(&self, command_id: &str) -> bool {
        self.lookup.values().any(|d| d.id() == command_id)
    }
}

fn normalize_path(path: &str) -> String {
    path.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn check_ancestry(
    descriptor: &Arc<CommandDescriptor>,
    by_id: &HashMap<&str, &Arc<CommandDescriptor>>,
) -> Result<(), ModuleError> {
    let mut seen = HashSet::new();
    seen.insert(descriptor.id());
    let mut current = descriptor;
    while let Some(parent_id) = current.parent() {
        let parent = by_id.get(parent_id).ok_or_else(|| ModuleError::Discovery {
            module: descriptor.id().to_string(),
            item: format!("parent command {}", parent_id),
        })?;
        if !seen.insert(parent.id()) {
            return Err(ModuleError::Discovery {
                module: descriptor.id().to_string(),
                item: format!("acyclic parent chain through {}", parent_id),
            });
        }
        current = parent;
    }
    Ok(())
}

/// Memoised inclusion decision. `None` means included.
fn verdict(
    descriptor: &Arc<CommandDescriptor>,
    by_id: &HashMap<&str, &Arc<CommandDescriptor>>,
    env: &BuildEnv,
    verdicts: &mut HashMap<String, Option<ExclusionReason>>,
) -> Option<ExclusionReason> {
    if let Some(known) = verdicts.get(descriptor.id()) {
        return *known;
    }

    let parent_excluded = descriptor
        .parent()
        .and_then(|parent| by_id.get(parent).copied())
        .map(|parent| verdict(parent, by_id, env, verdicts).is_some())
        .unwrap_or(false);

    let reason = if parent_excluded {
        warn!(
            "⚠️ Not loading /{}: parent command {} was excluded",
            descriptor.primary_alias(),
            descriptor.parent().unwrap_or_default()
        );
        Some(ExclusionReason::ParentExcluded)
    } else {
        own_verdict(descriptor, env)
    };

    verdicts.insert(descriptor.id().to_string(), reason);
    reason
}

fn own_verdict(descriptor: &CommandDescriptor, env: &BuildEnv) -> Option<ExclusionReason> {
    if env.disabled.contains(descriptor.id()) {
        info!("Command /{} is disabled in configuration", descriptor.primary_alias());
        return Some(ExclusionReason::Disabled);
    }

    if !descriptor.platform().allows(&env.platform_id) {
        warn!(
            "⚠️ Not loading /{}: platform {} is not supported",
            descriptor.primary_alias(),
            env.platform_id
        );
        return Some(ExclusionReason::Platform);
    }

    let requirement = descriptor.companion_requirement();
    match requirement.evaluate(env.companion.as_ref()) {
        Ok(true) => None,
        Ok(false) => {
            if requirement.notifies() {
                warn!("⚠️ Not loading /{}: companion requirement not met", descriptor.primary_alias());
            } else {
                debug!("Not loading /{}: companion requirement not met", descriptor.primary_alias());
            }
            Some(ExclusionReason::Companion)
        }
        Err(e) => {
            if env.debug {
                warn!("⚠️ Not loading /{}: {}", descriptor.primary_alias(), e);
            }
            Some(ExclusionReason::Companion)
        }
    }
}

fn check_scopes(included: &[&Arc<CommandDescriptor>]) -> Result<(), ModuleError> {
    let mut claims: HashMap<(&str, &str), &str> = HashMap::new();

    for descriptor in included {
        let scope = descriptor.parent().unwrap_or(ROOT_SCOPE);
        let scoped = descriptor.aliases().iter().map(|a| (scope, a.as_str()));
        let rooted = descriptor.root_aliases().iter().map(|a| (ROOT_SCOPE, a.as_str()));
        for key in scoped.chain(rooted) {
            match claims.get(&key) {
                Some(first) if *first != descriptor.id() => {
                    return Err(ModuleError::DuplicateAlias {
                        alias: key.1.to_string(),
                        scope: key.0.to_string(),
                        first: first.to_string(),
                        second: descriptor.id().to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    claims.insert(key, descriptor.id());
                }
            }
        }
    }
    Ok(())
}

fn build_node(
    descriptor: &Arc<CommandDescriptor>,
    parent_paths: &[String],
    children_of: &HashMap<&str, Vec<&Arc<CommandDescriptor>>>,
    lookup: &mut HashMap<String, Arc<CommandDescriptor>>,
) -> CommandNode {
    let mut paths: Vec<String> = if parent_paths.is_empty() {
        descriptor.aliases().to_vec()
    } else {
        parent_paths
            .iter()
            .flat_map(|parent| descriptor.aliases().iter().map(move |alias| format!("{} {}", parent, alias)))
            .collect()
    };
    paths.extend(descriptor.root_aliases().iter().cloned());

    for path in &paths {
        lookup.insert(path.clone(), descriptor.clone());
    }

    let children = children_of
        .get(descriptor.id())
        .map(|children| {
            children
                .iter()
                .map(|child| build_node(child, &paths, children_of, lookup))
                .collect()
        })
        .unwrap_or_default();

    CommandNode {
        descriptor: descriptor.clone(),
        children,
    }
}
