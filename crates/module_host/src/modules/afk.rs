use super::{path, section, table, LoggedCommand};
use async_trait::async_trait;
use dashmap::DashMap;
use module_system::host::lookup_bool;
use module_system::{
    Activation, Affinity, CatalogBuilder, CommandDescriptor, CommandSpec, EventOutcome, HostEvent, Listener,
    ListenerSpec, ModuleInfo, ScheduledTask, ServiceContext, SuggestedLevel, TaskSpec,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const ID: &str = "afk";
const COMMAND_ALIASES: [&str; 2] = ["afk", "away"];

pub fn register(builder: CatalogBuilder) -> CatalogBuilder {
    builder
        .module(
            ModuleInfo::new(ID, "AFK", format!("{}.{}", super::PACKAGE, ID))
                .config_defaults(table([
                    ("afk_time_seconds", toml::Value::Integer(300)),
                    (
                        "triggers",
                        toml::Value::Table(table([
                            ("on_command", toml::Value::Boolean(true)),
                            ("on_chat", toml::Value::Boolean(true)),
                        ])),
                    ),
                ]))
                .pre_enable(|ctx| {
                    ctx.services().insert(Arc::new(AfkTracker::default()));
                    Ok(())
                }),
        )
        .command(
            path(ID, "commands", "afk"),
            CommandSpec::new(
                CommandDescriptor::new("afk.afk", COMMAND_ALIASES[0])
                    .aliases_from(&COMMAND_ALIASES)
                    .level(SuggestedLevel::User)
                    .suffix("exempt.toggle", "Cannot be marked AFK", SuggestedLevel::None)
                    .suffix("exempt.kick", "Never kicked for being AFK", SuggestedLevel::Admin)
                    .suffix("notify", "Told when a player is kicked for being AFK", SuggestedLevel::Admin),
                |_| Ok(LoggedCommand::new("afk")),
            ),
        )
        .listener(
            path(ID, "listeners", "command"),
            ListenerSpec::new("afk-command", Activation::SelfReporting, |ctx| {
                Ok(AfkCommandListener { tracker: tracker(ctx)? })
            }),
        )
        .task(
            path(ID, "tasks", "check"),
            TaskSpec::new("afk-check", |ctx| {
                let seconds = section(ctx, ID)
                    .get("afk_time_seconds")
                    .and_then(|v| v.as_integer())
                    .unwrap_or(300);
                Ok(AfkCheck {
                    tracker: tracker(ctx)?,
                    threshold: Duration::from_secs(seconds.max(1) as u64),
                })
            }),
        )
}

/// Last activity per player.
#[derive(Default)]
pub struct AfkTracker {
    last_active: DashMap<String, Instant>,
    away: DashMap<String, ()>,
}

impl AfkTracker {
    pub fn update(&self, player: &str) {
        self.last_active.insert(player.to_string(), Instant::now());
        if self.away.remove(player).is_some() {
            info!("👋 {} is no longer AFK", player);
        }
    }

    /// Marks players idle for at least `threshold`, returning the newly away.
    pub fn sweep(&self, threshold: Duration) -> Vec<String> {
        let idle: Vec<String> = self
            .last_active
            .iter()
            .filter(|entry| entry.value().elapsed() >= threshold)
            .map(|entry| entry.key().clone())
            .collect();
        idle.into_iter()
            .filter(|player| self.away.insert(player.clone(), ()).is_none())
            .collect()
    }
}

fn tracker(ctx: &ServiceContext) -> anyhow::Result<Arc<AfkTracker>> {
    ctx.services()
        .get::<AfkTracker>()
        .ok_or_else(|| anyhow::anyhow!("AFK tracker service is not registered"))
}

/// Counts any command other than `/afk` itself as activity.
struct AfkCommandListener {
    tracker: Arc<AfkTracker>,
}

#[async_trait]
impl Listener for AfkCommandListener {
    fn name(&self) -> &str {
        "afk-command"
    }

    fn subscriptions(&self) -> Vec<String> {
        vec!["command".to_string()]
    }

    async fn handle(&self, event: &HostEvent) -> anyhow::Result<EventOutcome> {
        let player = event.payload.get("player").and_then(|p| p.as_str());
        let command = event.payload.get("command").and_then(|c| c.as_str()).unwrap_or_default();
        if let Some(player) = player {
            if !COMMAND_ALIASES.contains(&command.to_lowercase().as_str()) {
                self.tracker.update(player);
            }
        }
        Ok(EventOutcome::Continue)
    }

    fn should_enable(&self, ctx: &ServiceContext) -> anyhow::Result<bool> {
        Ok(lookup_bool(&ctx.config().get(ID), &["triggers", "on_command"]).unwrap_or(true))
    }
}

struct AfkCheck {
    tracker: Arc<AfkTracker>,
    threshold: Duration,
}

#[async_trait]
impl ScheduledTask for AfkCheck {
    fn name(&self) -> &str {
        "afk-check"
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(1000)
    }

    fn affinity(&self) -> Affinity {
        Affinity::Inline
    }

    async fn run(&self) -> anyhow::Result<()> {
        for player in self.tracker.sweep(self.threshold) {
            info!("💤 {} is now AFK", player);
        }
        debug!("AFK check done");
        Ok(())
    }
}
