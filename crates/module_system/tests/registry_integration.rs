//! End-to-end tests for discovery, the module lifecycle, the command table,
//! permissions and listener reloads.

use async_trait::async_trait;
use module_system::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Quiet;

#[async_trait]
impl CommandExecutor for Quiet {
    async fn execute(&self, _invocation: &CommandInvocation) -> anyhow::Result<()> {
        Ok(())
    }
}

struct ChatListener {
    name: &'static str,
    permissions: Vec<(String, PermissionInfo)>,
}

impl ChatListener {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            permissions: Vec::new(),
        }
    }
}

#[async_trait]
impl Listener for ChatListener {
    fn name(&self) -> &str {
        self.name
    }

    fn subscriptions(&self) -> Vec<String> {
        vec!["chat".to_string()]
    }

    fn permissions(&self) -> Vec<(String, PermissionInfo)> {
        self.permissions.clone()
    }

    async fn handle(&self, _event: &HostEvent) -> anyhow::Result<EventOutcome> {
        Ok(EventOutcome::Continue)
    }
}

struct Fixture {
    bus: Arc<LocalEventBus>,
    config: Arc<MemoryConfigStore>,
    context: Arc<ServiceContext>,
}

fn fixture(platform: &str, companion: Option<Companion>, policy: DuplicatePolicy) -> Fixture {
    let bus = Arc::new(LocalEventBus::new());
    let config = Arc::new(MemoryConfigStore::new());
    let context = ServiceContext::builder("nucleus")
        .event_bus(bus.clone())
        .config(config.clone())
        .platform(Arc::new(StaticPlatform::new(platform)))
        .permissions(Arc::new(PermissionRegistry::new(policy)))
        .companion(companion)
        .debug(true)
        .build();
    Fixture {
        bus,
        config,
        context: Arc::new(context),
    }
}

fn server() -> Fixture {
    fixture("server", None, DuplicatePolicy::LastWins)
}

fn warn_catalog() -> CatalogBuilder {
    Catalog::builder()
        .module(ModuleInfo::new("warn", "Warn", "nucleus.modules.warn"))
        .command(
            "nucleus.modules.warn.commands.warn",
            CommandSpec::new(
                CommandDescriptor::new("warn.warn", "warn")
                    .aliases_from(&["warning", "addwarning"])
                    .level(SuggestedLevel::Mod)
                    .suffix("exempt.length", "Exempt from warning length limits", SuggestedLevel::Admin)
                    .suffix("exempt.target", "Cannot be warned", SuggestedLevel::Admin)
                    .suffix("notify", "Notified of new warnings", SuggestedLevel::Mod),
                |_| Ok(Quiet),
            ),
        )
}

#[tokio::test]
async fn test_warn_aliases_and_permissions() {
    let fx = server();
    let registry = ModuleRegistry::new(fx.context.clone(), warn_catalog().build().unwrap());

    let report = registry.start(&ModuleSource::scan("nucleus.modules")).await.unwrap();
    assert!(report.is_clean());

    let tree = registry.command_tree().await;
    assert_eq!(tree.len(), 1);
    for alias in ["warn", "warning", "addwarning"] {
        assert_eq!(tree.resolve(alias).unwrap().id(), "warn.warn");
    }

    let entries = registry.permissions().all_entries();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.key.starts_with("warn.")));
    assert_eq!(
        registry.permissions().for_command("warn.warn").unwrap().suffixes,
        vec!["exempt.length", "exempt.target", "notify"]
    );
}

#[tokio::test]
async fn test_duplicate_root_alias_fails_second_module_only() {
    let fx = server();
    let catalog = Catalog::builder()
        .module(ModuleInfo::new("server", "Server", "nucleus.modules.server"))
        .module(ModuleInfo::new("info", "Info", "nucleus.modules.info"))
        .command(
            "nucleus.modules.server.commands.status",
            CommandSpec::new(CommandDescriptor::new("server.status", "status"), |_| Ok(Quiet)),
        )
        .command(
            "nucleus.modules.info.commands.status",
            CommandSpec::new(CommandDescriptor::new("info.status", "Status"), |_| Ok(Quiet)),
        )
        .build()
        .unwrap();
    let registry = ModuleRegistry::new(fx.context.clone(), catalog);

    let report = registry.start(&ModuleSource::scan("nucleus")).await.unwrap();
    assert_eq!(report.enabled, vec!["server"]);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("server.status") && report.failed[0].1.contains("info.status"));
    assert_eq!(registry.module_state("info").await, Some(ModuleState::Failed));
    assert_eq!(registry.resolve_command("status").await.unwrap().id(), "server.status");
}

#[test]
fn test_duplicate_root_alias_over_union() {
    let descriptors = vec![
        Arc::new(CommandDescriptor::new("server.status", "status")),
        Arc::new(CommandDescriptor::new("info.status", "status")),
    ];
    match CommandTree::build(&descriptors, &BuildEnv::new("server")) {
        Err(ModuleError::DuplicateAlias { alias, first, second, .. }) => {
            assert_eq!(alias, "status");
            assert_eq!(first, "server.status");
            assert_eq!(second, "info.status");
        }
        other => panic!("expected duplicate alias, got {:?}", other),
    }
}

fn spy_catalog() -> Catalog {
    Catalog::builder()
        .module(ModuleInfo::new("commandspy", "Command Spy", "nucleus.modules.commandspy"))
        .listener(
            "nucleus.modules.commandspy.listeners.spy",
            ListenerSpec::new(
                "commandspy",
                Activation::conditional(|ctx| {
                    let node = ctx.config().get("commandspy");
                    let enabled = node
                        .get("spy")
                        .and_then(|spy| spy.get("enabled"))
                        .map(|v| v.as_bool().ok_or_else(|| anyhow::anyhow!("spy.enabled is not a bool")))
                        .transpose()?;
                    Ok(enabled.unwrap_or(true))
                }),
                |_| Ok(ChatListener::new("commandspy")),
            ),
        )
        .build()
        .unwrap()
}

fn set_spy(config: &MemoryConfigStore, value: toml::Value) {
    let mut spy = toml::Table::new();
    spy.insert("enabled".into(), value);
    let mut section = toml::Table::new();
    section.insert("spy".into(), toml::Value::Table(spy));
    config.set("commandspy", toml::Value::Table(section));
}

#[tokio::test]
async fn test_conditional_listener_flips_without_duplicates() {
    let fx = server();
    let registry = ModuleRegistry::new(fx.context.clone(), spy_catalog());
    registry.start(&ModuleSource::scan("nucleus")).await.unwrap();

    let listeners = registry.listeners().await;
    assert_eq!(listeners.len(), 1);
    let id = listeners[0].id;
    assert_eq!(listeners[0].mode, "conditional");
    assert_eq!(registry.listener_state(id).await, Some(ListenerState::Active));

    set_spy(&fx.config, toml::Value::Boolean(false));
    assert_eq!(registry.reload().await.deactivated, 1);
    assert_eq!(registry.listener_state(id).await, Some(ListenerState::Inactive));
    assert_eq!(fx.bus.listener_count(), 0);

    set_spy(&fx.config, toml::Value::Boolean(true));
    for _ in 0..3 {
        registry.reload().await;
    }
    assert_eq!(registry.listener_state(id).await, Some(ListenerState::Active));
    assert_eq!(fx.bus.listener_count(), 1);
}

#[tokio::test]
async fn test_failing_predicate_deactivates_quietly() {
    let fx = server();
    let registry = ModuleRegistry::new(fx.context.clone(), spy_catalog());
    registry.start(&ModuleSource::scan("nucleus")).await.unwrap();
    let id = registry.listeners().await[0].id;

    set_spy(&fx.config, toml::Value::String("yes".into()));
    let summary = registry.reload().await;
    assert_eq!(summary.deactivated, 1);
    assert_eq!(registry.listener_state(id).await, Some(ListenerState::Inactive));
    assert_eq!(registry.module_state("commandspy").await, Some(ModuleState::Enabled));
}

#[tokio::test]
async fn test_manifest_with_unknown_path_is_discovery_error() {
    let fx = server();
    let registry = ModuleRegistry::new(fx.context.clone(), warn_catalog().build().unwrap());
    let manifest = Manifest::from_toml_str(
        r#"
        [[module]]
        id = "warn"
        commands = ["nucleus.modules.warn.commands.unwarn"]
        "#,
    )
    .unwrap();

    let err = registry.start(&ModuleSource::Manifest(manifest)).await.unwrap_err();
    assert!(matches!(err, ModuleError::Discovery { ref module, .. } if module == "warn"));
    assert!(registry.modules().await.is_empty());
}

#[tokio::test]
async fn test_scan_ignores_abstract_entries_and_foreign_packages() {
    let fx = server();
    let catalog = warn_catalog()
        .abstract_entry("nucleus.modules.warn.commands.base", ItemKind::Command)
        .command(
            "nucleus.other.commands.stray",
            CommandSpec::new(CommandDescriptor::new("other.stray", "stray"), |_| Ok(Quiet)),
        )
        .build()
        .unwrap();
    let registry = ModuleRegistry::new(fx.context.clone(), catalog);
    registry.start(&ModuleSource::scan("nucleus.modules")).await.unwrap();

    let modules = registry.modules().await;
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].commands, 1);
    assert!(registry.resolve_command("stray").await.is_none());
}

#[tokio::test]
async fn test_pre_enable_failure_aborts_startup() {
    let fx = server();
    let catalog = warn_catalog()
        .module(
            ModuleInfo::new("playerinfo", "Player Info", "nucleus.modules.playerinfo")
                .pre_enable(|_| Err(anyhow::anyhow!("seen handler unavailable"))),
        )
        .build()
        .unwrap();
    let registry = ModuleRegistry::new(fx.context.clone(), catalog);

    let err = registry.start(&ModuleSource::scan("nucleus")).await.unwrap_err();
    assert!(matches!(err, ModuleError::PreEnable { ref module, .. } if module == "playerinfo"));
    assert!(registry.command_tree().await.is_empty());
    assert_eq!(registry.module_state("warn").await, Some(ModuleState::PreEnabled));
    assert_eq!(registry.module_state("playerinfo").await, Some(ModuleState::Failed));
}

struct SeenHandler {
    providers: usize,
}

#[tokio::test]
async fn test_pre_enable_services_reach_factories() {
    let fx = server();
    let seen = Arc::new(AtomicUsize::new(0));
    let observed = seen.clone();
    let catalog = Catalog::builder()
        .module(
            ModuleInfo::new("playerinfo", "Player Info", "nucleus.modules.playerinfo").pre_enable(|ctx| {
                ctx.services().insert(Arc::new(SeenHandler { providers: 3 }));
                Ok(())
            }),
        )
        .command(
            "nucleus.modules.playerinfo.commands.seen",
            CommandSpec::new(CommandDescriptor::new("playerinfo.seen", "seen"), move |ctx| {
                let handler = ctx
                    .services()
                    .get::<SeenHandler>()
                    .ok_or_else(|| anyhow::anyhow!("SeenHandler not registered"))?;
                observed.store(handler.providers, Ordering::SeqCst);
                Ok(Quiet)
            }),
        )
        .build()
        .unwrap();
    let registry = ModuleRegistry::new(fx.context.clone(), catalog);

    assert!(registry.start(&ModuleSource::scan("nucleus")).await.unwrap().is_clean());
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failing_listener_factory_optional_vs_required() {
    let fx = server();
    let catalog = Catalog::builder()
        .module(ModuleInfo::new("afk", "AFK", "nucleus.modules.afk"))
        .module(ModuleInfo::new("mute", "Mute", "nucleus.modules.mute"))
        .command(
            "nucleus.modules.afk.commands.afk",
            CommandSpec::new(CommandDescriptor::new("afk.afk", "afk"), |_| Ok(Quiet)),
        )
        .listener(
            "nucleus.modules.afk.listeners.broken",
            ListenerSpec::new("broken", Activation::Always, |_| -> anyhow::Result<ChatListener> {
                Err(anyhow::anyhow!("no afk config"))
            })
            .skip_on_error(),
        )
        .listener(
            "nucleus.modules.afk.listeners.chat",
            ListenerSpec::new("chat", Activation::Always, |_| Ok(ChatListener::new("afk-chat"))),
        )
        .command(
            "nucleus.modules.mute.commands.mute",
            CommandSpec::new(CommandDescriptor::new("mute.mute", "mute"), |_| Ok(Quiet)),
        )
        .listener(
            "nucleus.modules.mute.listeners.broken",
            ListenerSpec::new("broken", Activation::Always, |_| -> anyhow::Result<ChatListener> {
                panic!("mute listener exploded")
            }),
        )
        .build()
        .unwrap();
    let registry = ModuleRegistry::new(fx.context.clone(), catalog);

    let report = registry.start(&ModuleSource::scan("nucleus")).await.unwrap();
    assert_eq!(report.enabled, vec!["afk"]);
    assert_eq!(report.failed[0].0, "mute");
    assert!(report.failed[0].1.contains("nucleus.modules.mute.listeners.broken"));

    assert_eq!(fx.bus.listener_count(), 1);
    assert!(registry.resolve_command("afk").await.is_some());
    assert!(registry.resolve_command("mute").await.is_none());
}

#[tokio::test]
async fn test_platform_and_companion_exclusions() {
    let fx = fixture(
        "server",
        Some(Companion::new("mixins", toml::Table::new())),
        DuplicatePolicy::LastWins,
    );
    let catalog = Catalog::builder()
        .module(ModuleInfo::new("misc", "Misc", "nucleus.modules.misc"))
        .command(
            "nucleus.modules.misc.commands.speed",
            CommandSpec::new(
                CommandDescriptor::new("misc.speed", "speed").companion(CompanionRequirement::companion_only()),
                |_| Ok(Quiet),
            ),
        )
        .command(
            "nucleus.modules.misc.commands.fly",
            CommandSpec::new(
                CommandDescriptor::new("misc.fly", "fly").companion(CompanionRequirement::without_companion()),
                |_| Ok(Quiet),
            ),
        )
        .command(
            "nucleus.modules.misc.commands.world",
            CommandSpec::new(
                CommandDescriptor::new("misc.world", "world").requires_platform(PlatformRequirement::one_of(&["CLIENT"])),
                |_| Ok(Quiet),
            ),
        )
        .command(
            "nucleus.modules.misc.commands.world_info",
            CommandSpec::new(
                CommandDescriptor::new("misc.world.info", "info")
                    .subcommand_of("misc.world")
                    .suffix("others", "View other worlds", SuggestedLevel::Admin),
                |_| Ok(Quiet),
            ),
        )
        .build()
        .unwrap();
    let registry = ModuleRegistry::new(fx.context.clone(), catalog);
    registry.start(&ModuleSource::scan("nucleus")).await.unwrap();

    let tree = registry.command_tree().await;
    assert_eq!(tree.paths(), vec!["speed"]);
    let reasons: Vec<(String, ExclusionReason)> =
        tree.excluded().iter().map(|e| (e.command.clone(), e.reason)).collect();
    assert_eq!(
        reasons,
        vec![
            ("misc.fly".to_string(), ExclusionReason::Companion),
            ("misc.world".to_string(), ExclusionReason::Platform),
            ("misc.world.info".to_string(), ExclusionReason::ParentExcluded),
        ]
    );
    assert!(registry.permissions().lookup("info.others").is_none());
}

#[tokio::test]
async fn test_reject_policy_fails_duplicate_listener_permission() {
    let fx = fixture("server", None, DuplicatePolicy::Reject);
    let shared = || -> anyhow::Result<ChatListener> {
        let mut listener = ChatListener::new("mention");
        listener.permissions = vec![(
            "nucleus.chat.mention".to_string(),
            PermissionInfo::new("Mention players in chat", SuggestedLevel::User),
        )];
        Ok(listener)
    };
    let catalog = Catalog::builder()
        .module(ModuleInfo::new("chat", "Chat", "nucleus.modules.chat"))
        .module(ModuleInfo::new("message", "Message", "nucleus.modules.message"))
        .listener(
            "nucleus.modules.chat.listeners.mention",
            ListenerSpec::new("mention", Activation::Always, move |_| shared()),
        )
        .listener(
            "nucleus.modules.message.listeners.mention",
            ListenerSpec::new("mention", Activation::Always, move |_| shared()),
        )
        .build()
        .unwrap();
    let registry = ModuleRegistry::new(fx.context.clone(), catalog);

    let report = registry.start(&ModuleSource::scan("nucleus")).await.unwrap();
    assert_eq!(report.enabled, vec!["chat"]);
    assert!(report.failed[0].1.contains("nucleus.chat.mention"));
    assert_eq!(
        registry.permissions().lookup("nucleus.chat.mention").unwrap().module.as_deref(),
        Some("chat")
    );
}

#[tokio::test]
async fn test_failed_module_leaves_nothing_registered() {
    let fx = fixture("server", None, DuplicatePolicy::Reject);
    let format = |name: &'static str| -> anyhow::Result<ChatListener> {
        let mut listener = ChatListener::new(name);
        listener.permissions = vec![(
            "nucleus.chat.format".to_string(),
            PermissionInfo::new("Use formatting codes", SuggestedLevel::User),
        )];
        Ok(listener)
    };
    let catalog = Catalog::builder()
        .module(ModuleInfo::new("chat", "Chat", "nucleus.modules.chat"))
        .command(
            "nucleus.modules.chat.commands.chat",
            CommandSpec::new(
                CommandDescriptor::new("chat.chat", "chat").suffix("colour", "Use colours", SuggestedLevel::User),
                |_| Ok(Quiet),
            ),
        )
        .listener(
            "nucleus.modules.chat.listeners.format",
            ListenerSpec::new("format", Activation::Always, move |_| format("format")),
        )
        .listener(
            "nucleus.modules.chat.listeners.legacy",
            ListenerSpec::new("legacy", Activation::Always, move |_| format("legacy")),
        )
        .build()
        .unwrap();
    let registry = ModuleRegistry::new(fx.context.clone(), catalog);

    let report = registry.start(&ModuleSource::scan("nucleus")).await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(registry.module_state("chat").await, Some(ModuleState::Failed));

    assert!(registry.dispatch_command("console", "chat").await.unwrap().is_none());
    assert!(registry.command_owner("chat.chat").await.is_none());
    assert!(registry.listeners().await.is_empty());
    assert_eq!(fx.bus.listener_count(), 0);
    assert!(registry.permissions().lookup("chat.colour").is_none());
    assert!(registry.permissions().lookup("nucleus.chat.format").is_none());
    assert!(registry.permissions().for_command("chat.chat").is_none());
}

struct Stalled;

#[async_trait]
impl ScheduledTask for Stalled {
    fn name(&self) -> &str {
        "stalled"
    }

    fn interval(&self) -> Duration {
        Duration::ZERO
    }

    async fn run(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_failed_task_withdraws_registered_listeners() {
    let fx = server();
    let catalog = Catalog::builder()
        .module(ModuleInfo::new("afk", "AFK", "nucleus.modules.afk"))
        .listener(
            "nucleus.modules.afk.listeners.chat",
            ListenerSpec::new("afk-chat", Activation::Always, |_| Ok(ChatListener::new("afk-chat"))),
        )
        .task("nucleus.modules.afk.tasks.stalled", TaskSpec::new("stalled", |_| Ok(Stalled)))
        .build()
        .unwrap();
    let registry = ModuleRegistry::new(fx.context.clone(), catalog);

    let report = registry.start(&ModuleSource::scan("nucleus")).await.unwrap();
    assert_eq!(report.failed[0].0, "afk");
    assert_eq!(fx.bus.listener_count(), 0);
    assert!(registry.listeners().await.is_empty());
    assert!(registry.tasks().await.is_empty());
}

struct Heartbeat {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl ScheduledTask for Heartbeat {
    fn name(&self) -> &str {
        "afk-check"
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn affinity(&self) -> Affinity {
        Affinity::Background
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tasks_are_submitted_once_and_run() {
    let fx = server();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let catalog = Catalog::builder()
        .module(ModuleInfo::new("afk", "AFK", "nucleus.modules.afk"))
        .task(
            "nucleus.modules.afk.tasks.check",
            TaskSpec::new("afk-check", move |_| Ok(Heartbeat { runs: counter.clone() })),
        )
        .build()
        .unwrap();
    let registry = ModuleRegistry::new(fx.context.clone(), catalog);
    registry.start(&ModuleSource::scan("nucleus")).await.unwrap();
    registry.enable("afk").await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;

    let tasks = registry.tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].affinity, Affinity::Background);
    assert!(runs.load(Ordering::SeqCst) > 0);
}
