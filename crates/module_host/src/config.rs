//! Host configuration loaded from TOML.
//!
//! The host file (`host.toml` by default) controls the platform, how modules
//! are discovered and logging. Module settings themselves live in a separate
//! store file (`[modules] config_file`) owned by the module system.

use module_system::{Companion, DuplicatePolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Host configuration loaded from the host TOML file.
///
/// Covers the platform, module discovery, permission handling, logging and
/// the optional companion subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub host: HostSettings,
    pub modules: ModuleSettings,
    #[serde(default)]
    pub permissions: PermissionSettings,
    pub logging: LoggingSettings,
    /// Present when the optional companion subsystem is installed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub companion: Option<CompanionSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Platform id matched against platform requirements
    pub platform: String,
    /// Report activation predicate failures
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSettings {
    /// File backing the module configuration store
    pub config_file: String,
    /// Package prefix scanned when no manifest is given
    pub scan_prefix: String,
    /// Optional manifest listing modules and their items explicitly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
}

/// How the permission registry treats a key registered twice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionSettings {
    /// `last-wins` (default) or `reject`
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionSettings {
    pub name: String,
    #[serde(default)]
    pub settings: toml::Table,
}

impl CompanionSettings {
    pub fn to_companion(&self) -> Companion {
        Companion::new(self.name.clone(), self.settings.clone())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: HostSettings {
                platform: "server".to_string(),
                debug: false,
            },
            modules: ModuleSettings {
                config_file: "modules.toml".to_string(),
                scan_prefix: crate::modules::PACKAGE.to_string(),
                manifest: None,
            },
            permissions: PermissionSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
            companion: None,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, writing the default
    /// configuration to `path` first if it does not exist.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the host configuration file
    ///
    /// # Returns
    ///
    /// The parsed configuration, or an error if the file cannot be read,
    /// written or parsed.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the configuration settings.
    ///
    /// # Returns
    ///
    /// `Ok(())` if valid, otherwise a message naming the first bad setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.platform.trim().is_empty() {
            return Err("Platform id cannot be empty".to_string());
        }

        if self.modules.config_file.is_empty() {
            return Err("Module config file cannot be empty".to_string());
        }

        if self.modules.manifest.is_none() && self.modules.scan_prefix.is_empty() {
            return Err("Either a scan prefix or a manifest is required".to_string());
        }

        if let Some(companion) = &self.companion {
            if companion.name.is_empty() {
                return Err("Companion name cannot be empty".to_string());
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
