//! Command-line interface for the module host.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments. Every option overrides the matching setting in
/// the configuration file.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the host configuration file
    pub config_path: PathBuf,
    /// Optional override for the platform id
    pub platform: Option<String>,
    /// Optional override for the log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Whether to enable debug mode (reports activation predicate failures)
    pub debug: bool,
    /// Optional module manifest, replacing the package scan
    pub manifest: Option<PathBuf>,
}

impl CliArgs {
    /// Builds the clap command definition.
    pub fn command() -> Command {
        Command::new("Module Host")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Loads feature modules and dispatches their commands, listeners and tasks")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("host.toml"),
            )
            .arg(
                Arg::new("platform")
                    .short('p')
                    .long("platform")
                    .value_name("ID")
                    .help("Platform id modules are evaluated against (e.g., server, client)"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("debug")
                    .long("debug")
                    .help("Enable debug mode")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("manifest")
                    .long("manifest")
                    .value_name("FILE")
                    .help("Module manifest to load instead of scanning the catalog"),
            )
    }

    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    /// Converts matches produced by [`CliArgs::command`].
    ///
    /// # Arguments
    ///
    /// * `matches` - Matches from [`CliArgs::command`]
    ///
    /// # Returns
    ///
    /// The arguments, with `host.toml` as the configuration path when none
    /// was given.
    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("host.toml")),
            platform: matches.get_one::<String>("platform").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            debug: matches.get_flag("debug"),
            manifest: matches.get_one::<String>("manifest").map(PathBuf::from),
        }
    }
}
