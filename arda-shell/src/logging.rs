//! Log subscriber setup for the shell binary.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{ShellError, ShellResult};

pub const DEFAULT_LOG_FILTER: &str = "arda_shell=info,arda_query=info,arda_router=info";

/// Filter from `RUST_LOG`, else the configured filter, else [`DEFAULT_LOG_FILTER`].
pub fn env_filter(config: &LoggingConfig) -> ShellResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = config.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    EnvFilter::try_new(directives).map_err(|e| ShellError::Logging(e.to_string()))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LoggingConfig) -> ShellResult<()> {
    let registry = tracing_subscriber::registry().with(env_filter(config)?);
    let installed = match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Plain => registry.with(fmt::layer()).try_init(),
    };
    installed.map_err(|e| ShellError::Logging(e.to_string()))?;

    tracing::info!(format = ?config.format, "Logging initialized");
    Ok(())
}
