//! Signal handling: shutdown and configuration reload.

use tokio::signal;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    Shutdown,
    Reload,
}

/// Listens for process signals.
///
/// * **Unix platforms**: SIGINT and SIGTERM shut down, SIGHUP reloads
/// * **Windows**: Ctrl+C shuts down; there is no reload signal
pub struct SignalListener {
    #[cfg(unix)]
    sigint: signal::unix::Signal,
    #[cfg(unix)]
    sigterm: signal::unix::Signal,
    #[cfg(unix)]
    sighup: signal::unix::Signal,
}

impl SignalListener {
    pub fn new() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use signal::unix::{signal, SignalKind};
            Ok(Self {
                sigint: signal(SignalKind::interrupt())?,
                sigterm: signal(SignalKind::terminate())?,
                sighup: signal(SignalKind::hangup())?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Waits for the next signal.
    pub async fn recv(&mut self) -> std::io::Result<HostSignal> {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.sigint.recv() => {
                    info!("📡 Received SIGINT");
                    Ok(HostSignal::Shutdown)
                }
                _ = self.sigterm.recv() => {
                    info!("📡 Received SIGTERM");
                    Ok(HostSignal::Shutdown)
                }
                _ = self.sighup.recv() => {
                    info!("📡 Received SIGHUP");
                    Ok(HostSignal::Reload)
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("📡 Received Ctrl+C");
            Ok(HostSignal::Shutdown)
        }
    }
}
