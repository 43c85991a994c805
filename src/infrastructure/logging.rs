use crate::infrastructure::error::InfraError;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "reminder_dashboard=info";
const LOG_FILE_NAME: &str = "engine.log";

/// Installs stderr and file logging. Keep the guard alive for the lifetime of the process.
pub fn init_logging(logs_dir: &Path) -> Result<WorkerGuard, InfraError> {
    std::fs::create_dir_all(logs_dir)?;
    let appender = tracing_appender::rolling::never(logs_dir, LOG_FILE_NAME);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .map_err(|error| InfraError::InvalidConfig(format!("invalid RUST_LOG / log filter: {error}")))?;

    let init_result = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init();

    if let Err(error) = init_result {
        tracing::debug!(%error, "tracing subscriber already set, continuing");
    }

    Ok(guard)
}
