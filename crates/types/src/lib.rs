//! Wire-format types for the oracle sync event feed.
//!
//! Everything in here is a plain value type shared between the sync core and
//! its consumers (the dashboard WebSocket feed, health checks, configuration).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// A 32-byte on-chain account address, rendered as base58.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 32]);

impl Address {
    pub const LEN: usize = 32;

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build an address from a byte slice of exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Errors returned when parsing a base58 address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("invalid base58 encoding: {0}")]
    Encoding(String),

    #[error("expected 32 bytes, decoded {0}")]
    Length(usize),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| AddressParseError::Encoding(e.to_string()))?;
        let len = bytes.len();
        Self::from_slice(&bytes).ok_or(AddressParseError::Length(len))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Ledger clusters the service knows how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    MainnetBeta,
    Devnet,
    Testnet,
    Localnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::MainnetBeta => "mainnet-beta",
            Network::Devnet => "devnet",
            Network::Testnet => "testnet",
            Network::Localnet => "localnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet-beta" | "mainnet" => Ok(Network::MainnetBeta),
            "devnet" => Ok(Network::Devnet),
            "testnet" => Ok(Network::Testnet),
            "localnet" | "localhost" => Ok(Network::Localnet),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// Durability level requested for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

/// The oracle program a price was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleSource {
    /// Pyth push-oracle price account.
    Pyth,
    /// Chainlink OCR2 store feed (push oracle without a confidence interval).
    Chainlink,
    /// Switchboard V2 aggregator.
    Switchboard,
}

impl OracleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OracleSource::Pyth => "pyth",
            OracleSource::Chainlink => "chainlink",
            OracleSource::Switchboard => "switchboard",
        }
    }

    /// Returns all supported sources.
    pub fn all() -> &'static [OracleSource] {
        &[
            OracleSource::Pyth,
            OracleSource::Chainlink,
            OracleSource::Switchboard,
        ]
    }
}

impl fmt::Display for OracleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized price read from one oracle account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceFeed {
    /// The asset symbol (e.g., "SOL/USD")
    pub symbol: String,

    /// Display price (mantissa scaled by the account's exponent)
    pub price: f64,

    /// Confidence interval (+/- this amount), `0` when the program has none
    pub confidence: f64,

    /// Unix timestamp in milliseconds when this price was published
    pub timestamp_ms: i64,

    /// Slot the price was published in
    pub slot: u64,

    /// Program the price was decoded from
    pub source: OracleSource,

    /// Number of decimal places carried by the on-chain mantissa
    pub decimals: u8,
}

/// A price update pushed to consumers, tagged with its freshness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    #[serde(flatten)]
    pub feed: PriceFeed,

    /// True when the price is older than the configured stale threshold
    pub is_stale: bool,

    /// Instance that produced the update, if it came from a poll loop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// Registration request for a feed to poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub protocol: OracleSource,
    pub network: Network,
    pub account_address: Address,
    pub symbol: String,
    pub poll_interval_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// One registered feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleInstance {
    pub id: String,
    pub protocol: OracleSource,
    pub network: Network,
    pub account_address: Address,
    pub symbol: String,
    pub poll_interval_ms: u64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OracleInstance {
    /// Deterministic instance id for a (program, network, account) triple.
    pub fn derive_id(protocol: OracleSource, network: Network, address: &Address) -> String {
        let digest = Sha256::digest(format!("{protocol}:{network}:{address}").as_bytes());
        digest[..16].iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn from_spec(spec: InstanceSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::derive_id(spec.protocol, spec.network, &spec.account_address),
            protocol: spec.protocol,
            network: spec.network,
            account_address: spec.account_address,
            symbol: spec.symbol,
            poll_interval_ms: spec.poll_interval_ms,
            enabled: spec.enabled,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle status of an instance's poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Stopped,
    Active,
    Error,
}

/// Sync bookkeeping for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_processed_slot: Option<u64>,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: SyncStatus::Stopped,
            last_sync_at: None,
            last_processed_slot: None,
            error_count: 0,
            last_error: None,
            updated_at: now,
        }
    }
}

/// Instance counts by status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total: usize,
    pub active: usize,
    pub stopped: usize,
    pub error: usize,
}

/// Events emitted by the sync service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A poll produced a price
    PriceUpdate(PriceUpdate),

    /// An instance crossed the error threshold and stopped polling
    SyncError { instance_id: String, error: String },

    /// A poll loop was started
    SyncStarted { instance_id: String },

    /// A poll loop was stopped on request
    SyncStopped { instance_id: String },

    /// A feed was registered
    InstanceRegistered(OracleInstance),

    /// A feed was unregistered
    InstanceUnregistered(OracleInstance),

    /// Periodic health snapshot (published by the service host)
    Health(HealthSummary),
}

impl SyncEvent {
    /// The instance this event concerns, if any.
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            SyncEvent::PriceUpdate(update) => update.instance_id.as_deref(),
            SyncEvent::SyncError { instance_id, .. }
            | SyncEvent::SyncStarted { instance_id }
            | SyncEvent::SyncStopped { instance_id } => Some(instance_id),
            SyncEvent::InstanceRegistered(instance)
            | SyncEvent::InstanceUnregistered(instance) => Some(&instance.id),
            SyncEvent::Health(_) => None,
        }
    }
}
