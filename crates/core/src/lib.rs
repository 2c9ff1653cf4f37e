//! Oracle sync core.
//!
//! Reads Pyth, Chainlink and Switchboard price accounts over Solana
//! JSON-RPC and keeps any number of them polled on independent schedules.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use oracle_sync_core::{
//!     ConnectionManager, FeedTable, HttpTransportFactory, OracleSyncConfig, PriceFeedService,
//!     SyncService,
//! };
//! use oracle_sync_types::OracleSource;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), oracle_sync_core::OracleError> {
//!     let config = OracleSyncConfig::default();
//!     let factory = HttpTransportFactory::new(config.transport.timeout())?;
//!     let connections = Arc::new(ConnectionManager::new(
//!         config.networks.clone(),
//!         config.retry.clone(),
//!         Arc::new(factory),
//!     ));
//!     let feeds = Arc::new(PriceFeedService::new(
//!         connections,
//!         FeedTable::from_config(&config.feeds),
//!     ));
//!
//!     let sol = feeds.get_price_feed("SOL/USD", OracleSource::Pyth).await?;
//!     println!("{}: ${:.2} +/- {:.4}", sol.symbol, sol.price, sol.confidence);
//!
//!     let sync = SyncService::new(feeds.clone(), &config.sync);
//!     let mut events = sync.subscribe();
//!     for spec in config.instance_specs(feeds.table())? {
//!         let instance = sync.register_instance(spec)?;
//!         sync.start_sync(&instance.id).await?;
//!     }
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod decoder;
pub mod error;
pub mod feeds;
pub mod retry;
pub mod sync;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{
    FeedEntry, FeedsConfig, InstanceConfig, NetworkConfig, OracleSyncConfig, SyncConfig,
    TransportConfig,
};
pub use connection::{AccountInfo, ConnectionManager, LatestBlockhash, MAX_MULTIPLE_ACCOUNTS};
pub use decoder::{decoder_for, scale, AccountDecoder, FeedStatus, PriceRecord};
pub use error::{LayoutError, OracleError, Result};
pub use feeds::{is_stale, FeedTable, PriceFeedService};
pub use retry::{with_retry, RetryPolicy};
pub use sync::{SyncService, ERROR_THRESHOLD};
pub use transport::{HttpTransport, HttpTransportFactory, RpcTransport, TransportFactory};
