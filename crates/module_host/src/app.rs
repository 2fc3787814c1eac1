//! The running host: wires collaborators together, starts the modules and
//! serves the console until shutdown.

use crate::cli::CliArgs;
use crate::config::AppConfig;
use crate::logging::setup_logging;
use crate::modules;
use crate::signals::{HostSignal, SignalListener};
use module_system::{
    CommandNode, ConfigStore, EventBus, HostEvent, LocalEventBus, Manifest, ModuleRegistry, ModuleSource,
    PermissionRegistry, ServiceContext, StaticPlatform, TokioScheduler, TomlConfigStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// What a console line asked the host to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleOutcome {
    Continue,
    Shutdown,
}

/// The host process: configuration, the module registry and the scheduler
/// its tasks run on.
pub struct Application {
    config: AppConfig,
    registry: Arc<ModuleRegistry>,
    scheduler: Arc<TokioScheduler>,
}

impl Application {
    /// Creates the application from command line arguments.
    ///
    /// Loads the host configuration, applies the CLI overrides on top,
    /// validates the result and sets up logging before anything else runs.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command line arguments
    ///
    /// # Returns
    ///
    /// The application ready to [`run`](Self::run), or an error if the
    /// configuration is invalid or the module configuration cannot be read.
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        // Configuration comes before logging so the level can be applied.
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(platform) = args.platform {
            config.host.platform = platform;
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if let Some(manifest) = args.manifest {
            config.modules.manifest = Some(manifest.to_string_lossy().to_string());
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        if args.debug {
            config.host.debug = true;
        }

        if let Err(e) = config.validate() {
            return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
        }

        setup_logging(&config.logging)?;

        let store = TomlConfigStore::load(&config.modules.config_file).await?;
        let scheduler = Arc::new(TokioScheduler::new());
        let registry = build_registry(&config, Arc::new(store), scheduler.clone())?;

        info!(
            "📂 Config: {} | Modules: {} | Platform: {}",
            args.config_path.display(),
            config.modules.config_file,
            config.host.platform
        );

        Ok(Self {
            config,
            registry: Arc::new(registry),
            scheduler,
        })
    }

    async fn source(&self) -> anyhow::Result<ModuleSource> {
        match &self.config.modules.manifest {
            Some(path) => {
                let manifest = Manifest::from_file(PathBuf::from(path)).await?;
                info!("📜 Loading {} modules from manifest {}", manifest.modules.len(), path);
                Ok(ModuleSource::Manifest(manifest))
            }
            None => Ok(ModuleSource::scan(self.config.modules.scan_prefix.clone())),
        }
    }

    /// Starts every module and serves signals and the console until a
    /// shutdown is requested.
    ///
    /// # Returns
    ///
    /// `Ok(())` after a clean shutdown. Fails if startup is aborted by a
    /// pre-enable failure or signal handlers cannot be installed.
    pub async fn run(self) -> anyhow::Result<()> {
        info!("🌟 Starting module host");

        let source = self.source().await?;
        let report = self.registry.start(&source).await?;
        for (module, reason) in &report.failed {
            warn!("⚠️ Module {} failed to enable: {}", module, reason);
        }

        let mut signals = SignalListener::new()?;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        info!("✅ Module host is running");
        info!("🛑 Press Ctrl+C to shut down, send SIGHUP or type :reload to reload");

        loop {
            tokio::select! {
                signal = signals.recv() => match signal? {
                    HostSignal::Shutdown => break,
                    HostSignal::Reload => {
                        let summary = self.registry.reload().await;
                        info!("🔄 Reloaded {} listeners", summary.evaluated);
                    }
                },
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => {
                        if handle_console_line(&self.registry, &line).await == ConsoleOutcome::Shutdown {
                            break;
                        }
                    }
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("⚠️ Console input closed: {}", e);
                        stdin_open = false;
                    }
                },
            }
        }

        info!("🛑 Shutdown requested");
        self.scheduler.shutdown();
        info!("👋 Module host stopped");
        Ok(())
    }
}

/// Builds the service context and the module registry over the host's
/// catalog.
///
/// # Arguments
///
/// * `config` - Validated host configuration
/// * `store` - Where module and command settings live
/// * `scheduler` - Runs the tasks modules submit
pub fn build_registry(
    config: &AppConfig,
    store: Arc<dyn ConfigStore>,
    scheduler: Arc<TokioScheduler>,
) -> anyhow::Result<ModuleRegistry> {
    let context = ServiceContext::builder("module_host")
        .event_bus(Arc::new(LocalEventBus::new()))
        .scheduler(scheduler)
        .platform(Arc::new(StaticPlatform::new(config.host.platform.clone())))
        .config(store)
        .permissions(Arc::new(PermissionRegistry::new(config.permissions.duplicate_policy)))
        .companion(config.companion.as_ref().map(|c| c.to_companion()))
        .debug(config.host.debug)
        .build();

    Ok(ModuleRegistry::new(Arc::new(context), modules::catalog()?))
}

/// Runs one console line. Lines starting with `:` are host builtins,
/// anything else is dispatched as a command issued by the console.
///
/// # Returns
///
/// [`ConsoleOutcome::Shutdown`] for `:stop` and `:quit`, otherwise
/// [`ConsoleOutcome::Continue`]. Command failures are logged, never returned.
pub async fn handle_console_line(registry: &ModuleRegistry, line: &str) -> ConsoleOutcome {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleOutcome::Continue;
    }

    let Some(builtin) = line.strip_prefix(':') else {
        match registry.dispatch_command("console", line).await {
            Ok(Some(_)) => {}
            Ok(None) => warn!("❓ Unknown command: {}", line),
            Err(e) => error!("❌ Command '{}' failed: {}", line, e),
        }
        return ConsoleOutcome::Continue;
    };

    let (name, rest) = builtin.split_once(' ').unwrap_or((builtin, ""));
    match name {
        "stop" | "quit" => return ConsoleOutcome::Shutdown,
        "reload" => {
            let summary = registry.reload().await;
            info!(
                "🔄 Reload: {} evaluated, {} activated, {} deactivated",
                summary.evaluated, summary.activated, summary.deactivated
            );
        }
        "modules" => {
            for module in registry.modules().await {
                info!(
                    "📦 {} ({}) {}: {} commands, {} listeners, {} tasks",
                    module.id, module.name, module.state, module.commands, module.listeners, module.tasks
                );
            }
        }
        "permissions" => {
            for entry in registry.permissions().all_entries() {
                info!("🔑 {} [{}] {}", entry.key, entry.level, entry.description);
            }
        }
        "commands" => {
            for line in describe_commands(registry).await {
                info!("📋 {}", line);
            }
        }
        "listeners" => {
            for listener in registry.listeners().await {
                info!("👂 {}/{} {} ({})", listener.module, listener.name, listener.state, listener.mode);
            }
        }
        "event" => {
            let (event, payload) = rest.trim().split_once(' ').unwrap_or((rest.trim(), "{}"));
            if event.is_empty() {
                warn!("Usage: :event <name> [json]");
                return ConsoleOutcome::Continue;
            }
            match serde_json::from_str::<serde_json::Value>(payload) {
                Ok(payload) => match registry.context().event_bus().post(HostEvent::new(event, payload)).await {
                    Ok(cancelled) => info!("📨 Posted {} (cancelled: {})", event, cancelled),
                    Err(e) => error!("❌ Failed to post {}: {}", event, e),
                },
                Err(e) => warn!("⚠️ Invalid event payload: {}", e),
            }
        }
        other => warn!("❓ Unknown builtin :{}", other),
    }
    ConsoleOutcome::Continue
}

/// Describes every included command, depth first in declaration order.
///
/// # Arguments
///
/// * `registry` - The running module registry
///
/// # Returns
///
/// One line per command: its primary alias path, the suggested level of its
/// base permission, then its description and argument schema when declared.
pub async fn describe_commands(registry: &ModuleRegistry) -> Vec<String> {
    let tree = registry.command_tree().await;
    let mut lines = Vec::with_capacity(tree.len());
    let mut pending: Vec<(String, &CommandNode)> = tree
        .roots()
        .iter()
        .rev()
        .map(|node| (node.descriptor.primary_alias().to_string(), node))
        .collect();

    while let Some((path, node)) = pending.pop() {
        let descriptor = &node.descriptor;
        let level = registry
            .permissions()
            .for_command(descriptor.id())
            .map(|permissions| permissions.level.to_string())
            .unwrap_or_else(|| "-".to_string());

        let mut line = format!("/{} [{}]", path, level);
        if let Some(description) = descriptor.description_text() {
            line.push_str(&format!(" {}", description));
        }
        if !descriptor.argument_schema().is_null() {
            line.push_str(&format!(" {}", descriptor.argument_schema()));
        }
        lines.push(line);

        for child in node.children.iter().rev() {
            pending.push((format!("{} {}", path, child.descriptor.primary_alias()), child));
        }
    }
    lines
}
