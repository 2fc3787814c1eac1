use super::{path, table, LoggedCommand};
use module_system::{CatalogBuilder, CommandDescriptor, CommandSpec, ModuleInfo, SuggestedLevel};

const ID: &str = "warn";

pub fn register(builder: CatalogBuilder) -> CatalogBuilder {
    builder
        .module(
            ModuleInfo::new(ID, "Warn", format!("{}.{}", super::PACKAGE, ID)).config_defaults(table([
                ("show_on_login", toml::Value::Boolean(true)),
                ("expire_warnings", toml::Value::Boolean(true)),
                ("default_length_seconds", toml::Value::Integer(-1)),
                ("max_length_seconds", toml::Value::Integer(-1)),
            ])),
        )
        .command(
            path(ID, "commands", "warn"),
            CommandSpec::new(
                CommandDescriptor::new("warn.warn", "warn")
                    .aliases_from(&["warning", "addwarning"])
                    .level(SuggestedLevel::Mod)
                    .suffix("exempt.length", "Exempt from the maximum warning length", SuggestedLevel::Admin)
                    .suffix("exempt.target", "Cannot be warned", SuggestedLevel::Admin)
                    .suffix("notify", "Notified when a player is warned", SuggestedLevel::Mod)
                    .description("Warns a player"),
                |_| Ok(LoggedCommand::new("warn")),
            ),
        )
        .command(
            path(ID, "commands", "checkwarnings"),
            CommandSpec::new(
                CommandDescriptor::new("warn.checkwarnings", "checkwarnings")
                    .aliases_from(&["checkwarning", "warnings"])
                    .level(SuggestedLevel::Mod)
                    .description("Lists a player's warnings"),
                |_| Ok(LoggedCommand::new("checkwarnings")),
            ),
        )
        .command(
            path(ID, "commands", "clearwarnings"),
            CommandSpec::new(
                CommandDescriptor::new("warn.clearwarnings", "clearwarnings")
                    .alias("removeallwarnings")
                    .level(SuggestedLevel::Admin)
                    .description("Removes every warning of a player"),
                |_| Ok(LoggedCommand::new("clearwarnings")),
            ),
        )
}
