use super::{path, LoggedCommand};
use module_system::{CatalogBuilder, CommandDescriptor, CommandSpec, ModuleInfo, SuggestedLevel};

const ID: &str = "mail";

/// `/mail` with `send`, `read` and `clear` beneath it. Subcommand permissions
/// all share the `mail` prefix.
pub fn register(builder: CatalogBuilder) -> CatalogBuilder {
    builder
        .module(ModuleInfo::new(ID, "Mail", format!("{}.{}", super::PACKAGE, ID)))
        .command(
            path(ID, "commands", "mail"),
            CommandSpec::new(
                CommandDescriptor::new("mail.mail", "mail")
                    .alias("email")
                    .level(SuggestedLevel::User)
                    .description("Reads your mail"),
                |_| Ok(LoggedCommand::new("mail")),
            ),
        )
        .command(
            path(ID, "commands", "send"),
            CommandSpec::new(
                CommandDescriptor::new("mail.send", "send")
                    .alias("s")
                    .subcommand_of("mail.mail")
                    .permission_prefix("mail")
                    .level(SuggestedLevel::User)
                    .arguments(serde_json::json!({ "player": "user", "message": "remaining" })),
                |_| Ok(LoggedCommand::new("mail send")),
            ),
        )
        .command(
            path(ID, "commands", "read"),
            CommandSpec::new(
                CommandDescriptor::new("mail.read", "read")
                    .subcommand_of("mail.mail")
                    .permission_prefix("mail")
                    .level(SuggestedLevel::User)
                    .supports_others(),
                |_| Ok(LoggedCommand::new("mail read")),
            ),
        )
        .command(
            path(ID, "commands", "clear"),
            CommandSpec::new(
                CommandDescriptor::new("mail.clear", "clear")
                    .subcommand_of("mail.mail")
                    .permission_prefix("mail")
                    .level(SuggestedLevel::User),
                |_| Ok(LoggedCommand::new("mail clear")),
            ),
        )
}
