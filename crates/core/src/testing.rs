//! Test fixtures: a scripted RPC node and account buffer builders.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use oracle_sync_types::{Address, Commitment, Network};
use serde_json::{json, Value};

use crate::config::NetworkConfig;
use crate::connection::ConnectionManager;
use crate::decoder::{chainlink, pyth, switchboard, FeedStatus};
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::transport::{RpcTransport, TransportFactory};

/// Endpoint of the single devnet node used by [`devnet_manager`].
pub const DEVNET_URL: &str = "https://devnet.example";

type Handler = dyn Fn(&str, &str, &Value) -> Result<Value> + Send + Sync;

/// In-memory RPC node answering every transport built by [`MockFactory`].
pub struct MockNode {
    handler: Box<Handler>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Mutex<Duration>,
}

impl MockNode {
    /// `handler(endpoint, method, params)` produces each response.
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&str, &str, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    /// Hold every later response for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// (endpoint, method) of every call so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls().iter().filter(|(_, m)| m == method).count()
    }
}

pub struct MockTransport {
    endpoint: String,
    node: Arc<MockNode>,
}

#[async_trait]
impl RpcTransport for MockTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.node
            .calls
            .lock()
            .unwrap()
            .push((self.endpoint.clone(), method.to_string()));
        let delay = *self.node.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.node.handler)(&self.endpoint, method, &params)
    }
}

pub struct MockFactory {
    node: Arc<MockNode>,
    connects: Mutex<Vec<String>>,
}

impl MockFactory {
    pub fn new(node: Arc<MockNode>) -> Arc<Self> {
        Arc::new(Self {
            node,
            connects: Mutex::new(Vec::new()),
        })
    }

    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }
}

impl TransportFactory for MockFactory {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RpcTransport>> {
        self.connects.lock().unwrap().push(endpoint.to_string());
        Ok(Arc::new(MockTransport {
            endpoint: endpoint.to_string(),
            node: self.node.clone(),
        }))
    }
}

/// Manager with one devnet endpoint answered by `node`.
pub fn devnet_manager(node: Arc<MockNode>, retry: RetryPolicy) -> Arc<ConnectionManager> {
    let networks = BTreeMap::from([(
        Network::Devnet,
        NetworkConfig {
            endpoints: vec![DEVNET_URL.to_string()],
            commitment: Commitment::Confirmed,
        },
    )]);
    Arc::new(ConnectionManager::new(networks, retry, MockFactory::new(node)))
}

/// `getAccountInfo` result carrying `data`.
pub fn account_response(slot: u64, data: &[u8]) -> Value {
    json!({
        "context": {"slot": slot},
        "value": account_value(data),
    })
}

pub fn account_value(data: &[u8]) -> Value {
    json!({
        "data": [base64::engine::general_purpose::STANDARD.encode(data), "base64"],
        "owner": Address::new([9u8; 32]).to_string(),
        "lamports": 23_942_400u64,
        "executable": false,
        "rentEpoch": 361u64,
    })
}

/// Address derived from a small seed, for tests needing distinct accounts.
pub fn test_address(seed: u8) -> Address {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    bytes[31] = 0xaa;
    Address::new(bytes)
}

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

pub struct PythAccountBuilder {
    price: i64,
    conf: u64,
    expo: i32,
    status: FeedStatus,
    timestamp: i64,
    pub_slot: u64,
    product: Address,
    ema: (i64, i64),
}

impl PythAccountBuilder {
    pub fn new() -> Self {
        Self {
            price: 15_000_000_000,
            conf: 5_000_000,
            expo: -8,
            status: FeedStatus::Trading,
            timestamp: 1_700_000_000,
            pub_slot: 250_000_000,
            product: Address::default(),
            ema: (15_000_000_000, 5_000_000),
        }
    }

    pub fn price(mut self, price: i64, conf: u64, expo: i32) -> Self {
        self.price = price;
        self.conf = conf;
        self.expo = expo;
        self
    }

    pub fn status(mut self, status: FeedStatus) -> Self {
        self.status = status;
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn pub_slot(mut self, slot: u64) -> Self {
        self.pub_slot = slot;
        self
    }

    pub fn product(mut self, product: Address) -> Self {
        self.product = product;
        self
    }

    pub fn ema(mut self, price: i64, conf: i64) -> Self {
        self.ema = (price, conf);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buf = vec![0u8; pyth::MIN_LEN];
        put(&mut buf, 0, &pyth::MAGIC.to_le_bytes());
        put(&mut buf, 4, &pyth::VERSION.to_le_bytes());
        put(&mut buf, pyth::ACCOUNT_TYPE_OFFSET, &pyth::ACCOUNT_TYPE_PRICE.to_le_bytes());
        put(&mut buf, 12, &(pyth::MIN_LEN as u32).to_le_bytes());
        put(&mut buf, pyth::EXPONENT_OFFSET, &self.expo.to_le_bytes());
        put(&mut buf, pyth::NUM_PUBLISHERS_OFFSET, &32u32.to_le_bytes());
        put(&mut buf, pyth::NUM_QUOTERS_OFFSET, &12u32.to_le_bytes());
        put(&mut buf, pyth::LAST_SLOT_OFFSET, &self.pub_slot.to_le_bytes());
        put(&mut buf, pyth::VALID_SLOT_OFFSET, &self.pub_slot.saturating_sub(1).to_le_bytes());
        put(&mut buf, pyth::EMA_PRICE_OFFSET, &self.ema.0.to_le_bytes());
        put(&mut buf, pyth::EMA_CONF_OFFSET, &self.ema.1.to_le_bytes());
        put(&mut buf, pyth::TIMESTAMP_OFFSET, &self.timestamp.to_le_bytes());
        put(&mut buf, pyth::PRODUCT_OFFSET, self.product.as_bytes());
        put(&mut buf, pyth::NEXT_OFFSET, Address::default().as_bytes());
        put(&mut buf, pyth::PREV_SLOT_OFFSET, &self.pub_slot.saturating_sub(2).to_le_bytes());
        put(&mut buf, pyth::PREV_PRICE_OFFSET, &self.price.to_le_bytes());
        put(&mut buf, pyth::PREV_CONF_OFFSET, &self.conf.to_le_bytes());
        put(&mut buf, pyth::PREV_TIMESTAMP_OFFSET, &(self.timestamp - 1).to_le_bytes());
        put(&mut buf, pyth::AGG_PRICE_OFFSET, &self.price.to_le_bytes());
        put(&mut buf, pyth::AGG_CONF_OFFSET, &self.conf.to_le_bytes());
        put(&mut buf, pyth::AGG_STATUS_OFFSET, &self.status.to_pyth().to_le_bytes());
        put(&mut buf, pyth::AGG_CORP_ACT_OFFSET, &0u32.to_le_bytes());
        put(&mut buf, pyth::AGG_PUB_SLOT_OFFSET, &self.pub_slot.to_le_bytes());
        buf
    }
}

pub struct SwitchboardAccountBuilder {
    name: String,
    num_success: u32,
    result: (i128, u32),
    std_deviation: (i128, u32),
    min_response: (i128, u32),
    max_response: (i128, u32),
    round_open: (u64, i64),
}

impl SwitchboardAccountBuilder {
    pub fn new() -> Self {
        Self {
            name: "SOL_USD".to_string(),
            num_success: 3,
            result: (1_500_000, 4),
            std_deviation: (100, 4),
            min_response: (1_499_000, 4),
            max_response: (1_501_000, 4),
            round_open: (250_000_000, 1_700_000_000),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn num_success(mut self, n: u32) -> Self {
        self.num_success = n;
        self
    }

    pub fn result(mut self, mantissa: i128, scale: u32) -> Self {
        self.result = (mantissa, scale);
        self
    }

    pub fn std_deviation(mut self, mantissa: i128, scale: u32) -> Self {
        self.std_deviation = (mantissa, scale);
        self
    }

    pub fn responses(mut self, min: (i128, u32), max: (i128, u32)) -> Self {
        self.min_response = min;
        self.max_response = max;
        self
    }

    pub fn round_open(mut self, slot: u64, timestamp: i64) -> Self {
        self.round_open = (slot, timestamp);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buf = vec![0u8; switchboard::MIN_LEN];
        let round = switchboard::LATEST_ROUND_OFFSET;
        let decimal = |buf: &mut [u8], offset: usize, (mantissa, scale): (i128, u32)| {
            put(buf, offset, &mantissa.to_le_bytes());
            put(buf, offset + 16, &scale.to_le_bytes());
        };

        put(&mut buf, 0, &switchboard::DISCRIMINATOR);
        put(&mut buf, switchboard::NAME_OFFSET, self.name.as_bytes());
        put(&mut buf, switchboard::QUEUE_OFFSET, &[3u8; 32]);
        put(&mut buf, switchboard::MIN_ORACLE_RESULTS_OFFSET, &2u32.to_le_bytes());
        put(&mut buf, round + switchboard::ROUND_NUM_SUCCESS, &self.num_success.to_le_bytes());
        put(&mut buf, round + switchboard::ROUND_NUM_ERROR, &0u32.to_le_bytes());
        put(&mut buf, round + switchboard::ROUND_IS_CLOSED, &[1]);
        put(&mut buf, round + switchboard::ROUND_OPEN_SLOT, &self.round_open.0.to_le_bytes());
        put(&mut buf, round + switchboard::ROUND_OPEN_TIMESTAMP, &self.round_open.1.to_le_bytes());
        decimal(&mut buf, round + switchboard::ROUND_RESULT, self.result);
        decimal(&mut buf, round + switchboard::ROUND_STD_DEVIATION, self.std_deviation);
        decimal(&mut buf, round + switchboard::ROUND_MIN_RESPONSE, self.min_response);
        decimal(&mut buf, round + switchboard::ROUND_MAX_RESPONSE, self.max_response);
        buf
    }
}

pub struct ChainlinkFeedBuilder {
    live_length: u32,
    live_cursor: u32,
    latest_round_id: u32,
    decimals: u8,
    description: String,
    entries: Vec<Option<(u64, u32, i128)>>,
}

impl ChainlinkFeedBuilder {
    pub fn new(live_length: u32) -> Self {
        Self {
            live_length,
            live_cursor: 0,
            latest_round_id: 0,
            decimals: 8,
            description: "SOL / USD".to_string(),
            entries: vec![None; live_length as usize],
        }
    }

    pub fn decimals(mut self, decimals: u8) -> Self {
        self.decimals = decimals;
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Append a transmission at the live cursor.
    pub fn push(mut self, slot: u64, timestamp: u32, answer: i128) -> Self {
        self.entries[self.live_cursor as usize] = Some((slot, timestamp, answer));
        self.live_cursor = (self.live_cursor + 1) % self.live_length;
        self.latest_round_id += 1;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let len = chainlink::HEADER_END + self.live_length as usize * chainlink::TRANSMISSION_LEN;
        let mut buf = vec![0u8; len.max(chainlink::MIN_LEN)];

        put(&mut buf, 0, &chainlink::DISCRIMINATOR);
        put(&mut buf, chainlink::VERSION_OFFSET, &[2]);
        put(&mut buf, chainlink::STATE_OFFSET, &[0]);
        put(&mut buf, chainlink::OWNER_OFFSET, &[4u8; 32]);
        put(&mut buf, chainlink::WRITER_OFFSET, &[5u8; 32]);
        put(&mut buf, chainlink::DESCRIPTION_OFFSET, self.description.as_bytes());
        put(&mut buf, chainlink::DECIMALS_OFFSET, &[self.decimals]);
        put(&mut buf, chainlink::LATEST_ROUND_ID_OFFSET, &self.latest_round_id.to_le_bytes());
        put(&mut buf, chainlink::LIVE_LENGTH_OFFSET, &self.live_length.to_le_bytes());
        put(&mut buf, chainlink::LIVE_CURSOR_OFFSET, &self.live_cursor.to_le_bytes());

        for (index, entry) in self.entries.iter().enumerate() {
            if let Some((slot, timestamp, answer)) = entry {
                let base = chainlink::HEADER_END + index * chainlink::TRANSMISSION_LEN;
                put(&mut buf, base + chainlink::TX_SLOT, &slot.to_le_bytes());
                put(&mut buf, base + chainlink::TX_TIMESTAMP, &timestamp.to_le_bytes());
                put(&mut buf, base + chainlink::TX_ANSWER, &answer.to_le_bytes());
            }
        }
        buf
    }
}
