use super::{path, section, table, LoggedCommand};
use async_trait::async_trait;
use dashmap::DashMap;
use module_system::{
    Activation, CatalogBuilder, CommandDescriptor, CommandSpec, EventOutcome, HostEvent, Listener, ListenerSpec,
    ModuleInfo, ServiceContext, SuggestedLevel,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

const ID: &str = "back";
const TARGETS: [&str; 3] = ["teleport", "death", "portal"];

pub fn register(builder: CatalogBuilder) -> CatalogBuilder {
    let targets = TARGETS
        .iter()
        .map(|target| (*target, toml::Value::Boolean(true)))
        .collect::<Vec<_>>();
    let mut descriptor = CommandDescriptor::new("back.back", "back")
        .alias("return")
        .level(SuggestedLevel::User)
        .suffix("exempt.bordercheck", "Ignores the world border on /back", SuggestedLevel::Admin);
    for target in TARGETS {
        descriptor = descriptor.suffix(
            &format!("targets.{}", target),
            &format!("Returns to where a {} happened", target),
            SuggestedLevel::User,
        );
    }

    builder
        .module(
            ModuleInfo::new(ID, "Back", format!("{}.{}", super::PACKAGE, ID)).config_defaults(table([(
                "targets",
                toml::Value::Table(targets.into_iter().map(|(k, v)| (k.to_string(), v)).collect()),
            )])),
        )
        .command(
            path(ID, "commands", "back"),
            CommandSpec::new(descriptor, |_| Ok(LoggedCommand::new("back"))),
        )
        .listener(
            path(ID, "listeners", "back"),
            ListenerSpec::new("back", Activation::Always, |_| Ok(BackListener::default())),
        )
}

/// Records the last location a player left, for the event kinds enabled in
/// `back.targets`.
#[derive(Default)]
struct BackListener {
    on_teleport: AtomicBool,
    on_death: AtomicBool,
    on_portal: AtomicBool,
    last_location: DashMap<String, serde_json::Value>,
}

impl BackListener {
    fn flag(&self, event: &str) -> Option<&AtomicBool> {
        match event {
            "teleport" => Some(&self.on_teleport),
            "death" => Some(&self.on_death),
            "portal" => Some(&self.on_portal),
            _ => None,
        }
    }
}

#[async_trait]
impl Listener for BackListener {
    fn name(&self) -> &str {
        "back"
    }

    fn subscriptions(&self) -> Vec<String> {
        TARGETS.iter().map(|t| t.to_string()).collect()
    }

    async fn handle(&self, event: &HostEvent) -> anyhow::Result<EventOutcome> {
        let enabled = self
            .flag(&event.name)
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false);
        if !enabled {
            return Ok(EventOutcome::Continue);
        }

        let player = event
            .payload
            .get("player")
            .and_then(|p| p.as_str())
            .ok_or_else(|| anyhow::anyhow!("{} event without a player", event.name))?;
        let from = event.payload.get("from").cloned().unwrap_or(serde_json::Value::Null);
        debug!("Saved /back location for {} after {}", player, event.name);
        self.last_location.insert(player.to_string(), from);
        Ok(EventOutcome::Continue)
    }

    fn on_reload(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        let targets = section(ctx, ID)
            .get("targets")
            .and_then(|t| t.as_table().cloned())
            .unwrap_or_default();
        for target in TARGETS {
            let enabled = targets.get(target).and_then(|v| v.as_bool()).unwrap_or(true);
            if let Some(flag) = self.flag(target) {
                flag.store(enabled, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use module_system::MemoryConfigStore;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_disabled_targets_are_ignored() {
        let config = MemoryConfigStore::from_table(toml::from_str("[back.targets]\ndeath = false\n").unwrap());
        let ctx = ServiceContext::builder("test").config(Arc::new(config)).build();
        let listener = BackListener::default();
        listener.on_reload(&ctx).unwrap();

        let death = json!({ "player": "Alex", "from": { "x": 1 } });
        listener.handle(&HostEvent::new("death", death)).await.unwrap();
        assert!(listener.last_location.is_empty());

        let teleport = json!({ "player": "Alex", "from": { "x": 2 } });
        listener.handle(&HostEvent::new("teleport", teleport)).await.unwrap();
        assert_eq!(listener.last_location.get("Alex").unwrap().value(), &json!({ "x": 2 }));
    }

    #[test]
    fn test_command_declares_target_suffixes() {
        let catalog = register(module_system::Catalog::builder()).build().unwrap();
        let spec = match &catalog.entry(&path(ID, "commands", "back")).unwrap().item {
            module_system::CatalogItem::Command(spec) => spec.clone(),
            _ => panic!("back is a command"),
        };
        let suffixes: Vec<String> = spec
            .descriptor
            .permission_suffixes()
            .into_iter()
            .map(|(suffix, _)| suffix)
            .collect();
        assert!(suffixes.contains(&"targets.portal".to_string()));
        assert_eq!(suffixes.len(), 4);
    }
}
