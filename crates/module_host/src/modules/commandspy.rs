use super::{path, section, table, LoggedCommand};
use async_trait::async_trait;
use module_system::{
    Activation, CatalogBuilder, CommandDescriptor, CommandSpec, EventOutcome, HostEvent, Listener, ListenerSpec,
    ModuleInfo, ServiceContext, SuggestedLevel,
};
use std::sync::RwLock;
use tracing::info;

const ID: &str = "commandspy";

pub fn register(builder: CatalogBuilder) -> CatalogBuilder {
    builder
        .module(
            ModuleInfo::new(ID, "Command Spy", format!("{}.{}", super::PACKAGE, ID)).config_defaults(table([
                ("use_whitelist", toml::Value::Boolean(true)),
                (
                    "commands",
                    toml::Value::Array(vec![toml::Value::String("msg".into()), toml::Value::String("r".into())]),
                ),
            ])),
        )
        .command(
            path(ID, "commands", "commandspy"),
            CommandSpec::new(
                CommandDescriptor::new("commandspy.commandspy", "commandspy")
                    .alias("cs")
                    .level(SuggestedLevel::Admin)
                    .suffix("exempt.target", "Commands are never spied on", SuggestedLevel::Admin),
                |_| Ok(LoggedCommand::new("commandspy")),
            ),
        )
        .listener(
            path(ID, "listeners", "spy"),
            ListenerSpec::new("commandspy", Activation::conditional(spy_enabled), |ctx| {
                let listener = CommandSpyListener::default();
                listener.refresh(ctx)?;
                Ok(listener)
            }),
        )
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SpySettings {
    use_whitelist: bool,
    commands: Vec<String>,
}

fn settings(ctx: &ServiceContext) -> anyhow::Result<SpySettings> {
    let section = section(ctx, ID);
    let use_whitelist = match section.get("use_whitelist") {
        None => true,
        Some(value) => value
            .as_bool()
            .ok_or_else(|| anyhow::anyhow!("commandspy.use_whitelist must be a boolean"))?,
    };
    let commands = match section.get("commands") {
        None => Vec::new(),
        Some(value) => value
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("commandspy.commands must be a list"))?
            .iter()
            .filter_map(|c| c.as_str().map(str::to_lowercase))
            .collect(),
    };
    Ok(SpySettings { use_whitelist, commands })
}

/// Spying is pointless with an empty whitelist.
fn spy_enabled(ctx: &ServiceContext) -> anyhow::Result<bool> {
    let settings = settings(ctx)?;
    Ok(!settings.use_whitelist || !settings.commands.is_empty())
}

#[derive(Default)]
struct CommandSpyListener {
    settings: RwLock<SpySettings>,
}

impl CommandSpyListener {
    fn refresh(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        let fresh = settings(ctx)?;
        let mut current = self
            .settings
            .write()
            .map_err(|_| anyhow::anyhow!("commandspy settings lock poisoned"))?;
        *current = fresh;
        Ok(())
    }

    fn watches(&self, command: &str) -> bool {
        match self.settings.read() {
            Ok(settings) => !settings.use_whitelist || settings.commands.iter().any(|c| c == command),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Listener for CommandSpyListener {
    fn name(&self) -> &str {
        "commandspy"
    }

    fn subscriptions(&self) -> Vec<String> {
        vec!["command".to_string()]
    }

    async fn handle(&self, event: &HostEvent) -> anyhow::Result<EventOutcome> {
        let player = event.payload.get("player").and_then(|p| p.as_str()).unwrap_or("console");
        let command = event
            .payload
            .get("command")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_lowercase();
        if self.watches(&command) {
            info!("🕵️ {} ran /{}", player, command);
        }
        Ok(EventOutcome::Continue)
    }

    fn on_reload(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        self.refresh(ctx)
    }
}
