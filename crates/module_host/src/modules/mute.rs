use super::playerinfo::{SeenHandler, SeenPermission};
use super::{path, table, LoggedCommand};
use async_trait::async_trait;
use dashmap::DashSet;
use module_system::{
    Activation, CatalogBuilder, CommandDescriptor, CommandSpec, EventOutcome, HostEvent, Listener, ListenerSpec,
    ModuleInfo, PermissionInfo, SuggestedLevel,
};
use std::sync::Arc;
use tracing::info;

const ID: &str = "mute";

pub fn register(builder: CatalogBuilder) -> CatalogBuilder {
    builder
        .module(
            ModuleInfo::new(ID, "Mute", format!("{}.{}", super::PACKAGE, ID)).config_defaults(table([
                ("block_commands", toml::Value::Array(vec![toml::Value::String("me".into())])),
                ("see_muted_chat", toml::Value::Boolean(false)),
            ])),
        )
        .command(
            path(ID, "commands", "mute"),
            CommandSpec::new(
                CommandDescriptor::new("mute.mute", "mute")
                    .level(SuggestedLevel::Mod)
                    .suffix("exempt.length", "Exempt from the maximum mute length", SuggestedLevel::Admin)
                    .suffix("exempt.target", "Cannot be muted", SuggestedLevel::Admin)
                    .suffix("seemutedchat", "Sees chat from muted players", SuggestedLevel::Admin)
                    .suffix("notify", "Notified when a player is muted", SuggestedLevel::Mod)
                    .suffix("seen", "Sees mute status in /seen", SuggestedLevel::Mod),
                |_| Ok(LoggedCommand::new("mute")),
            ),
        )
        .command(
            path(ID, "commands", "voice"),
            CommandSpec::new(
                CommandDescriptor::new("mute.voice", "voice")
                    .level(SuggestedLevel::Admin)
                    .suffix("auto", "Speaks during global mute", SuggestedLevel::None),
                |_| Ok(LoggedCommand::new("voice")),
            ),
        )
        .listener(
            path(ID, "listeners", "mute"),
            ListenerSpec::new("mute", Activation::Always, |ctx| {
                let listener = MuteListener::default();
                if let Some(seen) = ctx.services().get::<SeenHandler>() {
                    listener.provide_seen(&seen);
                }
                Ok(listener)
            }),
        )
}

/// Cancels chat from players that a `mute` event marked as muted.
#[derive(Default)]
struct MuteListener {
    muted: Arc<DashSet<String>>,
}

impl MuteListener {
    /// Reports mute status in `/seen`, behind the mute command's `seen`
    /// permission.
    fn provide_seen(&self, seen: &SeenHandler) {
        let muted = self.muted.clone();
        seen.register_provider(ID, Some(SeenPermission::new("mute.mute", "seen")), move |player| {
            let state = if muted.contains(player) { "yes" } else { "no" };
            vec![format!("Muted: {}", state)]
        });
    }
}

#[async_trait]
impl Listener for MuteListener {
    fn name(&self) -> &str {
        "mute"
    }

    fn subscriptions(&self) -> Vec<String> {
        vec!["mute".to_string(), "unmute".to_string(), "chat".to_string()]
    }

    fn permissions(&self) -> Vec<(String, PermissionInfo)> {
        vec![(
            "nucleus.mute.seemutedchat.notify".to_string(),
            PermissionInfo::new("Told when muted chat is blocked", SuggestedLevel::Admin),
        )]
    }

    async fn handle(&self, event: &HostEvent) -> anyhow::Result<EventOutcome> {
        let player = event
            .payload
            .get("player")
            .and_then(|p| p.as_str())
            .ok_or_else(|| anyhow::anyhow!("{} event without a player", event.name))?
            .to_string();

        match event.name.as_str() {
            "mute" => {
                self.muted.insert(player);
                Ok(EventOutcome::Continue)
            }
            "unmute" => {
                self.muted.remove(&player);
                Ok(EventOutcome::Continue)
            }
            _ if self.muted.contains(&player) => {
                info!("🔇 Blocked chat from muted player {}", player);
                Ok(EventOutcome::Cancel)
            }
            _ => Ok(EventOutcome::Continue),
        }
    }
}
