pub mod auth;
pub mod config;
pub mod connection;
pub mod console;
pub mod db;
pub mod errors;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod session;
pub mod settings;
pub mod supervisor;
pub mod views;

pub use crate::config::{ConsoleConfig, StopPolicy};
pub use crate::console::Console;
pub use crate::errors::{AppError, AppResult};
pub use crate::logging::{LogSettings, LogSinks};
pub use crate::pipeline::{SettingsPipeline, PASSWORD_PLACEHOLDER};
pub use crate::settings::{Setting, SettingsStore};
pub use crate::supervisor::Supervisor;

use anyhow::Context;

pub async fn run() -> anyhow::Result<()> {
    let config_path = ConsoleConfig::config_path();
    let config = ConsoleConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let logs = LogSinks::install().context("failed to install log sinks")?;

    let console = Console::open(&config, &config_path, logs).context("failed to open console")?;
    if let Some(report) = console.boot().await.context("failed to boot console")? {
        for failure in &report.failed {
            tracing::warn!(parser = %failure.parser, error = %failure.error, "parser failed to autostart");
        }
    }
    tracing::info!(
        database = %config.database.display(),
        parsers = ?config.parsers,
        "dofler console ready"
    );

    wait_for_shutdown().await;
    tracing::info!("shutting down parsers");
    console.shutdown().await;
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(error) => {
                tracing::warn!(error = %error, "cannot listen for SIGTERM, waiting for ctrl-c only");
            }
        }
    }

    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "ctrl-c listener failed");
    }
}
