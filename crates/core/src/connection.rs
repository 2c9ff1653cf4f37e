//! Per-network RPC client cache with retry and endpoint failover.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use base64::Engine;
use oracle_sync_types::{Address, Commitment, Network};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::error::{OracleError, Result};
use crate::retry::{with_retry, RetryPolicy};
use crate::transport::{RpcTransport, TransportFactory};

/// Most accounts a single `getMultipleAccounts` request may name.
pub const MAX_MULTIPLE_ACCOUNTS: usize = 100;

/// A fetched account with its data already decoded from base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub data: Vec<u8>,
    pub owner: Address,
    pub lamports: u64,
    /// Slot the node answered at.
    pub slot: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestBlockhash {
    pub blockhash: String,
    pub last_valid_block_height: u64,
    pub slot: u64,
}

#[derive(Deserialize)]
struct RpcContext {
    slot: u64,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    context: RpcContext,
    value: T,
}

#[derive(Deserialize)]
struct RpcAccount {
    data: (String, String),
    owner: String,
    lamports: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlockhash {
    blockhash: String,
    last_valid_block_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    network: Network,
    endpoint: String,
}

/// Owns one transport per (network, endpoint) and the active endpoint index
/// of every network.
pub struct ConnectionManager {
    networks: BTreeMap<Network, NetworkConfig>,
    retry: RetryPolicy,
    factory: Arc<dyn TransportFactory>,
    clients: RwLock<HashMap<CacheKey, Arc<dyn RpcTransport>>>,
    active: RwLock<HashMap<Network, usize>>,
}

impl ConnectionManager {
    pub fn new(
        networks: BTreeMap<Network, NetworkConfig>,
        retry: RetryPolicy,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            networks,
            retry,
            factory,
            clients: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
        }
    }

    fn network(&self, network: Network) -> Result<&NetworkConfig> {
        self.networks
            .get(&network)
            .filter(|config| !config.endpoints.is_empty())
            .ok_or_else(|| {
                OracleError::Connection(format!("no RPC endpoints configured for {network}"))
            })
    }

    pub fn commitment(&self, network: Network) -> Commitment {
        self.networks
            .get(&network)
            .map(|config| config.commitment)
            .unwrap_or_default()
    }

    /// URL currently used for `network`.
    pub fn active_endpoint(&self, network: Network) -> Result<String> {
        let config = self.network(network)?;
        let index = self
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&network)
            .copied()
            .unwrap_or(0);
        Ok(config.endpoints[index % config.endpoints.len()].clone())
    }

    /// Transport for the active endpoint of `network`, built on first use.
    pub fn client(&self, network: Network) -> Result<Arc<dyn RpcTransport>> {
        let endpoint = self.active_endpoint(network)?;
        self.cached(network, &endpoint)
    }

    /// Transport for an arbitrary URL, cached under its own key.
    pub fn client_for_url(&self, network: Network, url: &str) -> Result<Arc<dyn RpcTransport>> {
        self.cached(network, url)
    }

    fn cached(&self, network: Network, endpoint: &str) -> Result<Arc<dyn RpcTransport>> {
        let key = CacheKey {
            network,
            endpoint: endpoint.to_string(),
        };
        if let Some(client) = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(client.clone());
        }

        let client = self.factory.connect(endpoint)?;
        debug!("created RPC client for {network} at {endpoint}");
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        Ok(clients.entry(key).or_insert(client).clone())
    }

    /// Switch `network` to its next configured endpoint.
    ///
    /// The cached transport for the new endpoint is rebuilt. Callers still
    /// holding the previous transport finish their request on it.
    pub fn rotate_endpoint(&self, network: Network) -> Result<String> {
        let config = self.network(network)?;
        let len = config.endpoints.len();
        if len < 2 {
            return Err(OracleError::NoAlternativeEndpoint { network });
        }

        let (previous, next) = {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            let index = active.entry(network).or_insert(0);
            let previous = config.endpoints[*index % len].clone();
            *index = (*index + 1) % len;
            (previous, config.endpoints[*index].clone())
        };

        let client = self.factory.connect(&next)?;
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                CacheKey {
                    network,
                    endpoint: next.clone(),
                },
                client,
            );

        info!("Rotated {} RPC endpoint: {} -> {}", network, previous, next);
        Ok(next)
    }

    /// Issue `method` on the active endpoint with retries.
    ///
    /// When the retries run out on a transient error and the network has
    /// other endpoints, the next one is activated before returning.
    async fn request(&self, network: Network, method: &str, params: Value) -> Result<Value> {
        let result = with_retry(&self.retry, || {
            let params = params.clone();
            async move {
                let client = self.client(network)?;
                client.call(method, params).await
            }
        })
        .await;

        if let Err(err) = &result {
            let alternatives = self
                .network(network)
                .map(|config| config.endpoints.len() > 1)
                .unwrap_or(false);
            if alternatives && err.root().is_retryable() {
                warn!("{method} on {network} failed: {err}");
                if let Err(rotate_err) = self.rotate_endpoint(network) {
                    warn!("failed to rotate {network} endpoint: {rotate_err}");
                }
            }
        }
        result
    }

    fn account_params(&self, network: Network) -> Value {
        json!({
            "encoding": "base64",
            "commitment": self.commitment(network).as_str(),
        })
    }

    pub async fn get_account_info(&self, network: Network, address: &Address) -> Result<AccountInfo> {
        let params = json!([address.to_string(), self.account_params(network)]);
        let result = self.request(network, "getAccountInfo", params).await?;
        let response: RpcResponse<Option<RpcAccount>> = from_result("getAccountInfo", result)?;

        match response.value {
            Some(account) => decode_account(account, response.context.slot),
            None => Err(OracleError::AccountNotFound(*address)),
        }
    }

    /// Fetch many accounts, `None` for the ones that do not exist.
    ///
    /// Requests are split into chunks of [`MAX_MULTIPLE_ACCOUNTS`]; the
    /// result has one entry per address in input order.
    pub async fn get_multiple_accounts_info(
        &self,
        network: Network,
        addresses: &[Address],
    ) -> Result<Vec<Option<AccountInfo>>> {
        let mut accounts = Vec::with_capacity(addresses.len());
        for chunk in addresses.chunks(MAX_MULTIPLE_ACCOUNTS) {
            let keys: Vec<String> = chunk.iter().map(Address::to_string).collect();
            let params = json!([keys, self.account_params(network)]);
            let result = self.request(network, "getMultipleAccounts", params).await?;
            let response: RpcResponse<Vec<Option<RpcAccount>>> =
                from_result("getMultipleAccounts", result)?;

            if response.value.len() != chunk.len() {
                return Err(OracleError::MalformedResponse(format!(
                    "getMultipleAccounts returned {} accounts for {} keys",
                    response.value.len(),
                    chunk.len()
                )));
            }
            for account in response.value {
                accounts.push(
                    account
                        .map(|a| decode_account(a, response.context.slot))
                        .transpose()?,
                );
            }
        }
        Ok(accounts)
    }

    pub async fn get_slot(&self, network: Network) -> Result<u64> {
        let params = json!([{"commitment": self.commitment(network).as_str()}]);
        let result = self.request(network, "getSlot", params).await?;
        from_result("getSlot", result)
    }

    pub async fn get_latest_blockhash(&self, network: Network) -> Result<LatestBlockhash> {
        let params = json!([{"commitment": self.commitment(network).as_str()}]);
        let result = self.request(network, "getLatestBlockhash", params).await?;
        let response: RpcResponse<RpcBlockhash> = from_result("getLatestBlockhash", result)?;
        Ok(LatestBlockhash {
            blockhash: response.value.blockhash,
            last_valid_block_height: response.value.last_valid_block_height,
            slot: response.context.slot,
        })
    }

    /// Estimated production time of `slot` in unix seconds, if the node
    /// knows it.
    pub async fn get_block_time(&self, network: Network, slot: u64) -> Result<Option<i64>> {
        let result = self.request(network, "getBlockTime", json!([slot])).await?;
        from_result("getBlockTime", result)
    }

    /// Whether the active node reports itself healthy. Not retried.
    pub async fn get_health(&self, network: Network) -> Result<bool> {
        let client = self.client(network)?;
        match client.call("getHealth", json!([])).await {
            Ok(Value::String(status)) => Ok(status == "ok"),
            Ok(other) => Err(OracleError::MalformedResponse(format!(
                "getHealth returned {other}"
            ))),
            Err(OracleError::Rpc { code, message }) => {
                debug!("{network} node unhealthy ({code}): {message}");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn get_version(&self, network: Network) -> Result<String> {
        let result = self.request(network, "getVersion", json!([])).await?;
        result
            .get("solana-core")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                OracleError::MalformedResponse("getVersion has no solana-core field".to_string())
            })
    }
}

fn from_result<T: DeserializeOwned>(method: &str, result: Value) -> Result<T> {
    serde_json::from_value(result)
        .map_err(|e| OracleError::MalformedResponse(format!("{method}: {e}")))
}

fn decode_account(account: RpcAccount, slot: u64) -> Result<AccountInfo> {
    let (encoded, encoding) = account.data;
    if encoding != "base64" {
        return Err(OracleError::MalformedResponse(format!(
            "unexpected account encoding {encoding}"
        )));
    }
    let data = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| OracleError::parse("account data", e))?;
    let owner = account
        .owner
        .parse()
        .map_err(|e| OracleError::MalformedResponse(format!("account owner: {e}")))?;

    Ok(AccountInfo {
        data,
        owner,
        lamports: account.lamports,
        slot,
    })
}
