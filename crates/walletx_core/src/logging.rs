use std::path::PathBuf;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::WalletxConfig;

const DEFAULT_FILTER: &str = "info,walletx_escrow=debug,walletx_chain=debug";
const LOG_FILE_PREFIX: &str = "walletx";

/// Where escrow and chain events are written.
///
/// Escrow operations log every broadcast hash, so the daily `walletx.*` files
/// are what a user sends in when a transaction "disappeared". `RUST_LOG`
/// always wins over `filter`.
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub filter: String,
    /// Mirror events to stderr in compact form.
    pub console: bool,
}

impl LogSettings {
    /// `~/.walletx/logs`, debug for the escrow and chain crates, with console.
    pub fn app() -> Result<Self> {
        Ok(Self {
            dir: WalletxConfig::logs_dir()?,
            filter: DEFAULT_FILTER.to_string(),
            console: true,
        })
    }

    /// Files only, for tests and hosts that own the terminal.
    pub fn file_only(dir: impl Into<PathBuf>, filter: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            filter: filter.into(),
            console: false,
        }
    }

    /// Install the global subscriber. Keep the guard alive or buffered lines
    /// are lost on exit. A second install in one process is an error.
    pub fn install(&self) -> Result<WorkerGuard> {
        std::fs::create_dir_all(&self.dir)?;

        let appender = tracing_appender::rolling::daily(&self.dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.filter));

        let file = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(false)
            .with_writer(writer);
        let console = self
            .console
            .then(|| fmt::layer().with_target(false).compact());

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file)
            .with(console)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

        Ok(guard)
    }
}

/// Application logging: see [`LogSettings::app`].
pub fn init_logging() -> Result<WorkerGuard> {
    LogSettings::app()?.install()
}

/// File-only logging under `logs_dir`.
pub fn init_logging_to_dir(logs_dir: impl Into<PathBuf>, filter: &str) -> Result<WorkerGuard> {
    LogSettings::file_only(logs_dir, filter).install()
}
