//! Module host entry point.
//!
//! Loads `host.toml`, starts every module in the catalog and serves a small
//! console on stdin: lines are dispatched as commands, `:`-prefixed lines are
//! host builtins (`:reload`, `:modules`, `:listeners`, `:permissions`,
//! `:event <name> [json]`, `:stop`).

mod app;
mod cli;
mod config;
mod logging;
mod modules;
mod signals;

use app::Application;
use cli::CliArgs;
use tracing::error;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }
}
