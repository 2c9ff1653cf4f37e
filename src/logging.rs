//! Tracing subscriber setup.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

use crate::settings::{LogConfig, LogFormat};

/// Install the global subscriber. `RUST_LOG` wins over `config.level`.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow!("invalid log level '{}': {}", config.level, e))?;
    let subscriber = Registry::default().with(filter);

    match config.format {
        LogFormat::Json => subscriber.with(fmt::layer().json()).try_init(),
        LogFormat::Plain => subscriber.with(fmt::layer()).try_init(),
    }
    .map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}
