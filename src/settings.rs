//! Service settings: an optional TOML file layered with environment
//! variables.
//!
//! ```toml
//! [networks.devnet]
//! endpoints = ["https://api.devnet.solana.com", "https://devnet.helius-rpc.com"]
//! commitment = "confirmed"
//!
//! [retry]
//! max_retries = 3
//!
//! [[instances]]
//! symbol = "SOL/USD"
//! protocol = "pyth"
//! poll_interval_ms = 2000
//!
//! [server]
//! bind_addr = "0.0.0.0:8083"
//!
//! [log]
//! level = "debug"
//! format = "json"
//! ```
//!
//! Any key can be overridden with `ORACLE_SYNC__<SECTION>__<KEY>`, e.g.
//! `ORACLE_SYNC__LOG__LEVEL=debug`.

use anyhow::{Context, Result};
use oracle_sync_core::OracleSyncConfig;
use serde::{Deserialize, Serialize};

/// Environment variable naming the settings file.
pub const CONFIG_PATH_ENV: &str = "ORACLE_SYNC_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "oracle-sync.toml";
/// Legacy override of `server.bind_addr`.
pub const BIND_ADDR_ENV: &str = "ORACLE_BIND_ADDR";
const ENV_PREFIX: &str = "ORACLE_SYNC";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(flatten)]
    pub oracle: OracleSyncConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// WebSocket server for dashboard clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    /// 0.0.0.0 for Docker/production.
    pub bind_addr: String,
    /// Seconds between health snapshots pushed to clients.
    pub health_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "0.0.0.0:8083".to_string(),
            health_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level or filter directive, e.g. "info" or "oracle_sync_core=debug".
    /// `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
        }
    }
}

impl Settings {
    /// Load from the file named by `ORACLE_SYNC_CONFIG` (default
    /// `oracle-sync.toml`, optional) and the environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut settings = Self::load_from(&path)?;
        if let Ok(addr) = std::env::var(BIND_ADDR_ENV) {
            settings.server.bind_addr = addr;
        }
        Ok(settings)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                // values arrive as strings; numbers and bools must be typed
                // before they pass through the flattened oracle sections
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder
            .build()
            .context(format!("Failed to build configuration from '{}'", path))?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        settings
            .oracle
            .validate()
            .context("Invalid oracle configuration")?;
        Ok(settings)
    }
}
