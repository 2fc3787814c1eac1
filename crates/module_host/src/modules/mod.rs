//! The host's module catalog.
//!
//! Handlers here carry no game logic: commands and listeners log what they
//! were asked to do, which is enough to exercise registration, permissions,
//! activation and dispatch end to end.

mod afk;
mod back;
mod commandspy;
mod mail;
mod mute;
pub(crate) mod playerinfo;
mod warn;

use async_trait::async_trait;
use module_system::{Catalog, CatalogBuilder, CommandExecutor, CommandInvocation, ModuleError, ServiceContext};
use tracing::info;

/// Package every sample module lives under.
pub const PACKAGE: &str = "nucleus.modules";

pub fn catalog() -> Result<Catalog, ModuleError> {
    let registrations: [fn(CatalogBuilder) -> CatalogBuilder; 7] = [
        warn::register,
        mute::register,
        afk::register,
        commandspy::register,
        mail::register,
        playerinfo::register,
        back::register,
    ];
    registrations
        .iter()
        .fold(Catalog::builder(), |builder, register| register(builder))
        .build()
}

/// Catalog path of an item inside a module package.
fn path(module: &str, kind: &str, name: &str) -> String {
    format!("{}.{}.{}.{}", PACKAGE, module, kind, name)
}

/// A module's configuration section as a table.
fn section(ctx: &ServiceContext, module: &str) -> toml::Table {
    match ctx.config().get(module) {
        toml::Value::Table(table) => table,
        _ => toml::Table::new(),
    }
}

fn table<const N: usize>(entries: [(&str, toml::Value); N]) -> toml::Table {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Executor that reports the invocation and does nothing else.
pub struct LoggedCommand {
    name: &'static str,
}

impl LoggedCommand {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl CommandExecutor for LoggedCommand {
    async fn execute(&self, invocation: &CommandInvocation) -> anyhow::Result<()> {
        info!(
            "💬 {} ran /{} ({}) with {:?}",
            invocation.source, invocation.path, self.name, invocation.args
        );
        Ok(())
    }
}
