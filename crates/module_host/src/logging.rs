//! Logging setup.

use crate::config::LoggingSettings;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialises the global subscriber. `RUST_LOG` overrides the configured
/// level.
///
/// # Arguments
///
/// * `settings` - Level filter and output format
///
/// # Returns
///
/// An error if a global subscriber is already installed.
pub fn setup_logging(settings: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let registry = tracing_subscriber::registry().with(filter);

    if settings.json_format {
        registry
            .with(fmt::layer().json().with_target(false).with_thread_names(true))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_ansi(true).with_target(false).with_thread_names(true))
            .try_init()?;
    }

    tracing::info!("🔧 Logging initialized with level: {}", settings.level);
    Ok(())
}
