use std::path::Path;

use anyhow::{Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::KeelConfig;

const LOG_FILE_PREFIX: &str = "keel";
const KEEL_CRATES: [&str; 3] = ["keel_core", "keel_chain", "keel_deploy"];

/// Filter used when `RUST_LOG` is unset: dependencies at `warn`, keel
/// crates at `level`.
pub fn default_filter(level: &str) -> String {
    let mut filter = String::from("warn");
    for krate in KEEL_CRATES {
        filter.push_str(&format!(",{krate}={level}"));
    }
    filter
}

/// Log to `~/.keel/logs/` (daily rotation) and to stderr at the
/// configured level. Keep the returned guard alive until exit.
pub fn init_logging(config: &KeelConfig) -> Result<WorkerGuard> {
    let logs_dir = KeelConfig::logs_dir()?;
    install(&logs_dir, &default_filter(&config.log_level), true)
}

/// File-only logging into `logs_dir`, for tests or embedding.
pub fn init_logging_to_dir(logs_dir: &Path, filter: &str) -> Result<WorkerGuard> {
    install(logs_dir, filter, false)
}

fn install(logs_dir: &Path, filter: &str, console: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)?;

    let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(filter)
            .map_err(|e| anyhow!("Invalid log filter '{filter}': {e}"))?,
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer);
    let console_layer = console.then(|| {
        fmt::layer()
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}
