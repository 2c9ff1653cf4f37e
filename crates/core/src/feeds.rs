//! Symbol lookup and normalization of decoded accounts into [`PriceFeed`]s.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use oracle_sync_types::{Address, Network, OracleSource, PriceFeed};
use tracing::{debug, warn};

use crate::config::{FeedEntry, FeedsConfig};
use crate::connection::ConnectionManager;
use crate::decoder::{decoder_for, AccountDecoder, PriceRecord};
use crate::error::{OracleError, Result};

/// Static map of symbols to the accounts publishing them.
#[derive(Debug, Clone)]
pub struct FeedTable {
    network: Network,
    entries: Vec<FeedEntry>,
}

impl FeedTable {
    pub fn new(network: Network, entries: Vec<FeedEntry>) -> Self {
        Self { network, entries }
    }

    pub fn from_config(config: &FeedsConfig) -> Self {
        Self::new(config.network, config.symbols.clone())
    }

    /// Network every account in the table lives on.
    pub fn network(&self) -> Network {
        self.network
    }

    pub fn entries(&self) -> impl Iterator<Item = &FeedEntry> {
        self.entries.iter()
    }

    pub fn entry(&self, symbol: &str) -> Option<&FeedEntry> {
        self.entries.iter().find(|entry| entry.symbol == symbol)
    }

    /// Account of `symbol` on `source`, or [`OracleError::NotFound`].
    pub fn address(&self, symbol: &str, source: OracleSource) -> Result<Address> {
        self.entry(symbol)
            .and_then(|entry| entry.address(source))
            .ok_or_else(|| OracleError::NotFound {
                symbol: symbol.to_string(),
                oracle: source,
            })
    }
}

/// `true` when `feed` is strictly older than `threshold_ms` at `now_ms`.
pub fn is_stale(now_ms: i64, feed: &PriceFeed, threshold_ms: i64) -> bool {
    now_ms.saturating_sub(feed.timestamp_ms) > threshold_ms
}

/// Fetches, decodes and normalizes oracle accounts.
pub struct PriceFeedService {
    connections: Arc<ConnectionManager>,
    table: FeedTable,
}

impl PriceFeedService {
    pub fn new(connections: Arc<ConnectionManager>, table: FeedTable) -> Self {
        Self { connections, table }
    }

    pub fn table(&self) -> &FeedTable {
        &self.table
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Current price of `symbol` from the table's `source` account.
    pub async fn get_price_feed(&self, symbol: &str, source: OracleSource) -> Result<PriceFeed> {
        let address = self.table.address(symbol, source)?;
        let decoder = decoder_for(source);
        self.fetch_feed(self.table.network, &address, symbol, decoder.as_ref())
            .await
    }

    /// Fetch `address` on `network` and decode it with `decoder`.
    pub async fn fetch_feed(
        &self,
        network: Network,
        address: &Address,
        symbol: &str,
        decoder: &dyn AccountDecoder,
    ) -> Result<PriceFeed> {
        let account = self.connections.get_account_info(network, address).await?;
        let record = decoder.decode(&account.data)?;
        self.normalize(network, symbol, record).await
    }

    async fn normalize(&self, network: Network, symbol: &str, record: PriceRecord) -> Result<PriceFeed> {
        if !record.status.is_trading() {
            return Err(OracleError::FeedUnavailable {
                symbol: symbol.to_string(),
                status: record.status,
            });
        }

        let publish_time = if record.publish_time > 0 {
            record.publish_time
        } else {
            debug!(
                "{} {} has no publish time, using block time of slot {}",
                symbol, record.source, record.slot
            );
            self.connections
                .get_block_time(network, record.slot)
                .await?
                .ok_or_else(|| {
                    OracleError::MalformedResponse(format!(
                        "no block time for slot {}",
                        record.slot
                    ))
                })?
        };

        Ok(PriceFeed {
            symbol: symbol.to_string(),
            price: record.price(),
            confidence: record.confidence(),
            timestamp_ms: publish_time.saturating_mul(1000),
            slot: record.slot,
            source: record.source,
            decimals: record.decimals(),
        })
    }

    /// Prices for `symbols` with at most `concurrency_limit` fetches in
    /// flight.
    ///
    /// Results keep the input order. Symbols that fail are logged and left
    /// out; this never returns an error.
    pub async fn get_multiple_price_feeds(
        &self,
        symbols: &[&str],
        source: OracleSource,
        concurrency_limit: usize,
    ) -> Vec<PriceFeed> {
        stream::iter(symbols.iter().map(|symbol| async move {
            (*symbol, self.get_price_feed(symbol, source).await)
        }))
        .buffered(concurrency_limit.max(1))
        .filter_map(|(symbol, result)| async move {
            match result {
                Ok(feed) => Some(feed),
                Err(e) => {
                    warn!("Failed to fetch {} {} price: {}", source, symbol, e);
                    None
                }
            }
        })
        .collect()
        .await
    }

    /// Same result as [`Self::get_multiple_price_feeds`] using
    /// `getMultipleAccounts` round trips instead of one request per symbol.
    pub async fn get_price_feeds_batched(
        &self,
        symbols: &[&str],
        source: OracleSource,
    ) -> Vec<PriceFeed> {
        let mut resolved = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            match self.table.address(symbol, source) {
                Ok(address) => resolved.push((*symbol, address)),
                Err(e) => warn!("Failed to fetch {} {} price: {}", source, symbol, e),
            }
        }

        let addresses: Vec<Address> = resolved.iter().map(|(_, address)| *address).collect();
        let accounts = match self
            .connections
            .get_multiple_accounts_info(self.table.network, &addresses)
            .await
        {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!("Failed to fetch {} {} accounts: {}", addresses.len(), source, e);
                return Vec::new();
            }
        };

        let decoder = decoder_for(source);
        let mut feeds = Vec::with_capacity(resolved.len());
        for ((symbol, address), account) in resolved.into_iter().zip(accounts) {
            let result = match account {
                Some(account) => match decoder.decode(&account.data) {
                    Ok(record) => self.normalize(self.table.network, symbol, record).await,
                    Err(e) => Err(e),
                },
                None => Err(OracleError::AccountNotFound(address)),
            };
            match result {
                Ok(feed) => feeds.push(feed),
                Err(e) => warn!("Failed to fetch {} {} price: {}", source, symbol, e),
            }
        }
        feeds
    }
}
