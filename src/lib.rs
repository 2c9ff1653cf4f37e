//! Oracle Sync Service
//!
//! This crate keeps on-chain oracle prices in sync for the monitoring
//! dashboard.
//!
//! # Features
//!
//! - **Account decoding** for Pyth, Chainlink and Switchboard price accounts
//! - **Independent poll loops** per feed with error thresholds
//! - **Endpoint failover** with retry and backoff over Solana JSON-RPC
//! - **WebSocket broadcast** of price updates and sync health
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use oracle_sync::{
//!     ConnectionManager, FeedTable, HttpTransportFactory, OracleSource, PriceFeedService,
//!     Settings,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let config = &settings.oracle;
//!     let connections = Arc::new(ConnectionManager::new(
//!         config.networks.clone(),
//!         config.retry.clone(),
//!         Arc::new(HttpTransportFactory::new(config.transport.timeout())?),
//!     ));
//!     let feeds = PriceFeedService::new(connections, FeedTable::from_config(&config.feeds));
//!
//!     for feed in feeds
//!         .get_multiple_price_feeds(&["SOL/USD", "BTC/USD", "ETH/USD"], OracleSource::Pyth, 3)
//!         .await
//!     {
//!         println!("{}: ${:.2}", feed.symbol, feed.price);
//!     }
//!     Ok(())
//! }
//! ```

pub mod logging;
pub mod server;
pub mod settings;

pub use oracle_sync_core::{
    decoder_for, is_stale, AccountDecoder, ConnectionManager, FeedStatus, FeedTable,
    HttpTransportFactory, OracleError, OracleSyncConfig, PriceFeedService, RetryPolicy,
    SyncService, ERROR_THRESHOLD,
};
pub use oracle_sync_types::{
    Address, HealthSummary, InstanceSpec, Network, OracleInstance, OracleSource, PriceFeed,
    PriceUpdate, SyncEvent, SyncState, SyncStatus,
};
pub use server::run_server;
pub use settings::{LogConfig, LogFormat, ServerConfig, Settings};
