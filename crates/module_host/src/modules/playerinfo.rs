use super::{path, table, LoggedCommand};
use async_trait::async_trait;
use dashmap::DashMap;
use module_system::{
    CatalogBuilder, CommandDescriptor, CommandExecutor, CommandInvocation, CommandSpec, ModuleInfo, PermissionRegistry,
    ServiceContext, SuggestedLevel,
};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

const ID: &str = "playerinfo";

pub fn register(builder: CatalogBuilder) -> CatalogBuilder {
    builder
        .module(
            ModuleInfo::new(ID, "Player Info", format!("{}.{}", super::PACKAGE, ID))
                .config_defaults(table([("list_grouped", toml::Value::Boolean(false))]))
                .pre_enable(|ctx| {
                    ctx.services().insert(Arc::new(SeenHandler::default()));
                    Ok(())
                }),
        )
        .command(
            path(ID, "commands", "seen"),
            CommandSpec::new(
                CommandDescriptor::new("playerinfo.seen", "seen")
                    .alias("seenplayer")
                    .level(SuggestedLevel::User)
                    .suffix("extended", "Sees IP and location details", SuggestedLevel::Admin),
                |ctx| {
                    Ok(SeenCommand {
                        seen: seen_handler(ctx)?,
                        permissions: ctx.permissions().clone(),
                    })
                },
            ),
        )
        .command(
            path(ID, "commands", "list"),
            CommandSpec::new(
                CommandDescriptor::new("playerinfo.list", "list")
                    .aliases_from(&["listplayers", "ls"])
                    .level(SuggestedLevel::None)
                    .suffix("seevanished", "Sees vanished players", SuggestedLevel::Admin),
                |_| Ok(LoggedCommand::new("list")),
            ),
        )
}

/// Produces the lines a module contributes to `/seen` for one player.
pub type SeenProvider = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// Command id and suffix naming the permission that gates a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenPermission {
    pub command: String,
    pub suffix: String,
}

impl SeenPermission {
    pub fn new(command: &str, suffix: &str) -> Self {
        Self {
            command: command.to_string(),
            suffix: suffix.to_string(),
        }
    }
}

struct ProviderEntry {
    permission: Option<SeenPermission>,
    provider: SeenProvider,
}

/// One module's contribution to a `/seen` answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenSection {
    pub module: String,
    pub permission: Option<String>,
    pub lines: Vec<String>,
}

/// Remembers when each player was last seen and collects what other
/// modules want to add to `/seen`.
#[derive(Default)]
pub struct SeenHandler {
    last_seen: DashMap<String, SystemTime>,
    providers: DashMap<String, ProviderEntry>,
}

impl SeenHandler {
    pub fn record(&self, player: &str) {
        self.last_seen.insert(player.to_lowercase(), SystemTime::now());
    }

    pub fn last_seen(&self, player: &str) -> Option<SystemTime> {
        self.last_seen.get(&player.to_lowercase()).map(|entry| *entry.value())
    }

    /// Registers a provider for `module`, replacing any earlier one.
    ///
    /// # Arguments
    ///
    /// * `module` - Id of the contributing module
    /// * `permission` - Suffix of one of the module's commands gating the
    ///   lines, resolved when `/seen` runs
    /// * `provider` - Called with the player name
    pub fn register_provider<F>(&self, module: &str, permission: Option<SeenPermission>, provider: F)
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        let entry = ProviderEntry {
            permission,
            provider: Arc::new(provider),
        };
        if self.providers.insert(module.to_string(), entry).is_some() {
            debug!("Replaced seen provider of {}", module);
        }
    }

    /// Modules with a registered provider, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut modules: Vec<String> = self.providers.iter().map(|entry| entry.key().clone()).collect();
        modules.sort();
        modules
    }

    /// Collects every provider's lines for `player`, sorted by module.
    ///
    /// A provider whose gating command is not registered is left out.
    pub fn sections(&self, player: &str, permissions: &PermissionRegistry) -> Vec<SeenSection> {
        let mut sections = Vec::new();
        for module in self.providers() {
            let Some((permission, provider)) = self
                .providers
                .get(&module)
                .map(|entry| (entry.permission.clone(), entry.provider.clone()))
            else {
                continue;
            };

            let permission = match permission {
                None => None,
                Some(gate) => match permissions.for_command(&gate.command) {
                    Some(command) => Some(command.with_suffix(&gate.suffix)),
                    None => {
                        debug!("Seen provider of {} skipped, {} is not registered", module, gate.command);
                        continue;
                    }
                },
            };

            sections.push(SeenSection {
                module,
                permission,
                lines: provider(player),
            });
        }
        sections
    }
}

fn seen_handler(ctx: &ServiceContext) -> anyhow::Result<Arc<SeenHandler>> {
    ctx.services()
        .get::<SeenHandler>()
        .ok_or_else(|| anyhow::anyhow!("seen handler service is not registered"))
}

struct SeenCommand {
    seen: Arc<SeenHandler>,
    permissions: Arc<PermissionRegistry>,
}

#[async_trait]
impl CommandExecutor for SeenCommand {
    async fn execute(&self, invocation: &CommandInvocation) -> anyhow::Result<()> {
        let player = invocation
            .args
            .first()
            .ok_or_else(|| anyhow::anyhow!("usage: /{} <player>", invocation.path))?;
        match self.seen.last_seen(player) {
            Some(when) => {
                let ago = when.elapsed().unwrap_or_default();
                info!("👀 {} was last seen {}s ago", player, ago.as_secs());
            }
            None => info!("👀 {} has never been seen", player),
        }
        for section in self.seen.sections(player, &self.permissions) {
            let gate = section.permission.as_deref().unwrap_or("everyone");
            for line in &section.lines {
                info!("👀 [{}] {} ({})", section.module, line, gate);
            }
        }
        self.seen.record(&invocation.source);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_command_requires_handler() {
        let catalog = register(module_system::Catalog::builder()).build().unwrap();
        let ctx = ServiceContext::builder("test").build();
        let seen = match &catalog.entry(&path(ID, "commands", "seen")).unwrap().item {
            module_system::CatalogItem::Command(spec) => spec.clone(),
            _ => panic!("seen is a command"),
        };

        assert!(seen.instantiate(&ctx).is_err());
        let hook = catalog.module(ID).unwrap().pre_enable.clone().unwrap();
        hook(&ctx).unwrap();
        assert!(seen.instantiate(&ctx).is_ok());
    }

    #[tokio::test]
    async fn test_seen_records_the_caller() {
        let handler = Arc::new(SeenHandler::default());
        let command = SeenCommand {
            seen: handler.clone(),
            permissions: Arc::new(PermissionRegistry::default()),
        };
        command
            .execute(&CommandInvocation {
                source: "Alex".to_string(),
                path: "seen".to_string(),
                args: vec!["Sam".to_string()],
            })
            .await
            .unwrap();

        assert!(handler.last_seen("alex").is_some());
        assert!(handler.last_seen("sam").is_none());
    }

    #[test]
    fn test_providers_resolve_their_permission_from_the_command() {
        let handler = SeenHandler::default();
        let permissions = PermissionRegistry::default();
        handler.register_provider("mute", Some(SeenPermission::new("mute.mute", "seen")), |player| {
            vec![format!("{} is muted", player)]
        });
        handler.register_provider("afk", None, |_| vec!["AFK: no".to_string()]);

        let sections = handler.sections("Sam", &permissions);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].module, "afk");
        assert_eq!(sections[0].permission, None);

        permissions
            .register_command(
                "mute",
                &CommandDescriptor::new("mute.mute", "mute").suffix("seen", "Sees mutes", SuggestedLevel::Admin),
            )
            .unwrap();
        let sections = handler.sections("Sam", &permissions);
        assert_eq!(handler.providers(), vec!["afk", "mute"]);
        assert_eq!(sections[1].permission.as_deref(), Some("mute.seen"));
        assert_eq!(sections[1].lines, vec!["Sam is muted"]);
    }
}
