//! Static configuration consumed by the sync core.
//!
//! Values are read once at startup (see the service binary's settings
//! loader) and only checked for presence here.

use std::collections::BTreeMap;
use std::time::Duration;

use oracle_sync_types::{Address, Commitment, InstanceSpec, Network, OracleSource};
use serde::{Deserialize, Serialize};

use crate::error::{OracleError, Result};
use crate::feeds::FeedTable;
use crate::retry::RetryPolicy;

/// Public RPC endpoints used when no configuration is given.
const DEFAULT_ENDPOINTS: &[(Network, &str)] = &[
    (Network::MainnetBeta, "https://api.mainnet-beta.solana.com"),
    (Network::Devnet, "https://api.devnet.solana.com"),
    (Network::Testnet, "https://api.testnet.solana.com"),
    (Network::Localnet, "http://127.0.0.1:8899"),
];

/// Mainnet accounts for the default feed table: (symbol, pyth, chainlink, switchboard).
const DEFAULT_FEEDS: &[(&str, Option<&str>, Option<&str>, Option<&str>)] = &[
    (
        "SOL/USD",
        Some("H6ARHf6YXhGYeQfUzQNGk6rDNnLBQKrenN712K4AQJEG"),
        Some("CH31Xns5z3M1cTAbKW34jcxPPciazARpijcHj9rxtemt"),
        Some("GvDMxPzN1sCj7L26YDK2HnMRXEQmQ2aemov8YBtPS7vR"),
    ),
    (
        "BTC/USD",
        Some("GVXRSBjFk6e6J3NbVPXohDJetcTjaeeuykUpbQF8UoMU"),
        None,
        None,
    ),
    (
        "ETH/USD",
        Some("JBu1AL4obBcCMqKBBxhpWCNUt136ijcuMZLFvTP7iWdB"),
        None,
        None,
    ),
];

/// Top-level configuration of the sync core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSyncConfig {
    /// RPC endpoints per network, first entry is the primary.
    pub networks: BTreeMap<Network, NetworkConfig>,
    pub retry: RetryPolicy,
    pub transport: TransportConfig,
    pub sync: SyncConfig,
    pub feeds: FeedsConfig,
    /// Feeds to register at startup. Empty means every feed in the table.
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub commitment: Commitment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Per-request HTTP timeout.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub default_poll_interval_ms: u64,
    pub min_poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    /// Age after which a price is flagged stale.
    pub stale_threshold_ms: i64,
    /// Buffer of the event broadcast channel.
    pub event_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    /// Network the feed table's accounts live on.
    pub network: Network,
    pub symbols: Vec<FeedEntry>,
}

/// Account addresses for one symbol, one per program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub symbol: String,
    #[serde(default)]
    pub pyth: Option<Address>,
    #[serde(default)]
    pub chainlink: Option<Address>,
    #[serde(default)]
    pub switchboard: Option<Address>,
}

impl FeedEntry {
    pub fn address(&self, source: OracleSource) -> Option<Address> {
        match source {
            OracleSource::Pyth => self.pyth,
            OracleSource::Chainlink => self.chainlink,
            OracleSource::Switchboard => self.switchboard,
        }
    }
}

/// A feed to register at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub symbol: String,
    pub protocol: OracleSource,
    /// Defaults to the feed table's network.
    #[serde(default)]
    pub network: Option<Network>,
    /// Defaults to the feed table's address for `protocol`.
    #[serde(default)]
    pub account: Option<Address>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for OracleSyncConfig {
    fn default() -> Self {
        let networks = DEFAULT_ENDPOINTS
            .iter()
            .map(|(network, url)| {
                (
                    *network,
                    NetworkConfig {
                        endpoints: vec![url.to_string()],
                        commitment: Commitment::default(),
                    },
                )
            })
            .collect();

        Self {
            networks,
            retry: RetryPolicy::default(),
            transport: TransportConfig::default(),
            sync: SyncConfig::default(),
            feeds: FeedsConfig::default(),
            instances: Vec::new(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_poll_interval_ms: 5_000,
            min_poll_interval_ms: 1_000,
            max_poll_interval_ms: 60_000,
            stale_threshold_ms: 300_000,
            event_capacity: 1024,
        }
    }
}

impl SyncConfig {
    /// Resolve a requested poll interval against the configured bounds.
    pub fn clamp_poll_interval(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_poll_interval_ms)
            .clamp(self.min_poll_interval_ms, self.max_poll_interval_ms)
    }
}

impl Default for FeedsConfig {
    fn default() -> Self {
        let parse = |s: Option<&str>| s.and_then(|s| s.parse().ok());
        Self {
            network: Network::MainnetBeta,
            symbols: DEFAULT_FEEDS
                .iter()
                .map(|(symbol, pyth, chainlink, switchboard)| FeedEntry {
                    symbol: symbol.to_string(),
                    pyth: parse(*pyth),
                    chainlink: parse(*chainlink),
                    switchboard: parse(*switchboard),
                })
                .collect(),
        }
    }
}

impl OracleSyncConfig {
    /// Presence checks only; values are otherwise trusted.
    pub fn validate(&self) -> Result<()> {
        for (network, config) in &self.networks {
            if config.endpoints.is_empty() {
                return Err(OracleError::Config(format!(
                    "network {network} has no RPC endpoints"
                )));
            }
        }
        if !self.networks.contains_key(&self.feeds.network) {
            return Err(OracleError::Config(format!(
                "feed table network {} has no RPC endpoints",
                self.feeds.network
            )));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(OracleError::Config(
                "retry backoff_multiplier must be at least 1".to_string(),
            ));
        }
        if self.sync.min_poll_interval_ms > self.sync.max_poll_interval_ms {
            return Err(OracleError::Config(
                "min_poll_interval_ms exceeds max_poll_interval_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Registration specs for the startup feeds.
    ///
    /// With no `instances` configured, every (symbol, program) pair in the
    /// feed table is polled at the default interval.
    pub fn instance_specs(&self, table: &FeedTable) -> Result<Vec<InstanceSpec>> {
        if self.instances.is_empty() {
            return Ok(table
                .entries()
                .flat_map(|entry| {
                    OracleSource::all().iter().filter_map(move |source| {
                        entry.address(*source).map(|address| InstanceSpec {
                            protocol: *source,
                            network: table.network(),
                            account_address: address,
                            symbol: entry.symbol.clone(),
                            poll_interval_ms: self.sync.clamp_poll_interval(None),
                            enabled: true,
                        })
                    })
                })
                .collect());
        }

        self.instances
            .iter()
            .map(|instance| {
                let account_address = match instance.account {
                    Some(address) => address,
                    None => table.address(&instance.symbol, instance.protocol)?,
                };
                Ok(InstanceSpec {
                    protocol: instance.protocol,
                    network: instance.network.unwrap_or(table.network()),
                    account_address,
                    symbol: instance.symbol.clone(),
                    poll_interval_ms: self.sync.clamp_poll_interval(instance.poll_interval_ms),
                    enabled: instance.enabled,
                })
            })
            .collect()
    }
}
