//! JSON-RPC over HTTP.
//!
//! A transport issues exactly one request per call. It does not retry and
//! does not cache; both are the connection manager's job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{OracleError, Result};

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY: usize = 256;

/// A client able to issue single JSON-RPC calls against one endpoint.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// The URL this transport talks to.
    fn endpoint(&self) -> &str;

    /// Issue `method` with positional `params` and return the `result` value.
    async fn call(&self, method: &str, params: Value) -> Result<Value>;
}

/// Builds transports for endpoints; swapped out in tests.
pub trait TransportFactory: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RpcTransport>>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

/// `reqwest`-backed transport.
pub struct HttpTransport {
    endpoint: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id();
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        debug!("{} -> {} (id {})", self.endpoint, method, id);

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_send_error(&self.endpoint, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::RateLimited(format!(
                "{} answered {} to {}",
                self.endpoint, status, method
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Transport {
                status: Some(status.as_u16()),
                message: truncate(&body, MAX_ERROR_BODY),
            });
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout(format!("{method} on {}", self.endpoint))
            } else {
                OracleError::MalformedResponse(e.to_string())
            }
        })?;

        parse_response(body, id)
    }
}

/// Production factory sharing one connection pool across endpoints.
#[derive(Clone)]
pub struct HttpTransportFactory {
    http: reqwest::Client,
}

impl HttpTransportFactory {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

impl TransportFactory for HttpTransportFactory {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RpcTransport>> {
        let url = reqwest::Url::parse(endpoint)
            .map_err(|e| OracleError::Config(format!("invalid endpoint {endpoint}: {e}")))?;
        Ok(Arc::new(HttpTransport::new(url, self.http.clone())))
    }
}

/// Interpret a JSON-RPC response envelope for request `id`.
pub fn parse_response(body: Value, id: u64) -> Result<Value> {
    let Value::Object(mut envelope) = body else {
        return Err(OracleError::MalformedResponse(
            "response is not a JSON object".to_string(),
        ));
    };

    if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(OracleError::Rpc { code, message });
    }

    match envelope.get("id").and_then(Value::as_u64) {
        Some(got) if got != id => {
            return Err(OracleError::MalformedResponse(format!(
                "response id {got} does not match request id {id}"
            )));
        }
        _ => {}
    }

    envelope
        .remove("result")
        .ok_or_else(|| OracleError::MalformedResponse("response has no result".to_string()))
}

fn classify_send_error(endpoint: &str, err: reqwest::Error) -> OracleError {
    if err.is_timeout() {
        OracleError::Timeout(endpoint.to_string())
    } else if err.is_connect() {
        OracleError::Connection(format!("{endpoint}: {err}"))
    } else {
        OracleError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_response_returns_result() {
        let body = json!({"jsonrpc": "2.0", "id": 7, "result": {"value": 42}});
        assert_eq!(parse_response(body, 7).unwrap(), json!({"value": 42}));
    }

    #[test]
    fn test_parse_response_keeps_null_result() {
        let body = json!({"jsonrpc": "2.0", "id": 1, "result": null});
        assert_eq!(parse_response(body, 1).unwrap(), Value::Null);
    }

    #[test]
    fn test_parse_response_rpc_error() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": {"code": -32602, "message": "Invalid param"}
        });
        match parse_response(body, 3) {
            Err(OracleError::Rpc { code, message }) => {
                assert_eq!(code, -32602);
                assert_eq!(message, "Invalid param");
            }
            other => panic!("expected RPC error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_response_missing_result() {
        let body = json!({"jsonrpc": "2.0", "id": 2});
        assert_eq!(parse_response(body, 2).unwrap_err().code(), "MALFORMED_RESPONSE");
        assert_eq!(
            parse_response(json!([1, 2]), 2).unwrap_err().code(),
            "MALFORMED_RESPONSE"
        );
    }

    #[test]
    fn test_parse_response_id_mismatch() {
        let body = json!({"jsonrpc": "2.0", "id": 9, "result": 1});
        assert_eq!(parse_response(body, 8).unwrap_err().code(), "MALFORMED_RESPONSE");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }

    /// Serve `responses` (status, body) one connection at a time and hand
    /// back the raw request bodies.
    async fn fake_node(
        responses: Vec<(u16, String)>,
    ) -> (String, tokio::task::JoinHandle<Vec<Value>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                requests.push(read_request_body(&mut stream).await);
                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(reply.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();
            }
            requests
        });

        (url, handle)
    }

    async fn read_request_body(stream: &mut tokio::net::TcpStream) -> Value {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text[..split]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= split + 4 + length {
                    return serde_json::from_slice(&buf[split + 4..split + 4 + length]).unwrap();
                }
            }
            if n == 0 {
                panic!("connection closed before full request");
            }
        }
    }

    fn transport(url: &str) -> HttpTransport {
        HttpTransport::new(url, reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_call_sends_envelope_with_increasing_ids() {
        let (url, node) = fake_node(vec![
            (200, r#"{"jsonrpc":"2.0","id":1,"result":250000000}"#.to_string()),
            (200, r#"{"jsonrpc":"2.0","id":2,"result":250000001}"#.to_string()),
        ])
        .await;

        let client = transport(&url);
        let first = client.call("getSlot", json!([{"commitment": "confirmed"}])).await.unwrap();
        let second = client.call("getSlot", json!([])).await.unwrap();
        assert_eq!(first, json!(250_000_000u64));
        assert_eq!(second, json!(250_000_001u64));

        let requests = node.await.unwrap();
        assert_eq!(requests[0]["jsonrpc"], "2.0");
        assert_eq!(requests[0]["method"], "getSlot");
        assert_eq!(requests[0]["params"][0]["commitment"], "confirmed");
        assert_eq!(requests[0]["id"], 1);
        assert_eq!(requests[1]["id"], 2);
    }

    #[tokio::test]
    async fn test_call_maps_http_failures() {
        let (url, node) = fake_node(vec![
            (429, "{}".to_string()),
            (503, "node unavailable".to_string()),
            (200, r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32005,"message":"behind"}}"#.to_string()),
        ])
        .await;

        let client = transport(&url);
        assert_eq!(
            client.call("getHealth", json!([])).await.unwrap_err().code(),
            "RATE_LIMITED"
        );
        match client.call("getHealth", json!([])).await {
            Err(OracleError::Transport { status, message }) => {
                assert_eq!(status, Some(503));
                assert_eq!(message, "node unavailable");
            }
            other => panic!("expected transport error, got {other:?}"),
        }
        assert!(matches!(
            client.call("getHealth", json!([])).await,
            Err(OracleError::Rpc { code: -32005, .. })
        ));
        node.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_error() {
        // bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = transport(&url).call("getSlot", json!([])).await.unwrap_err();
        assert_eq!(err.code(), "CONNECTION_ERROR");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_factory_rejects_invalid_url() {
        let factory = HttpTransportFactory::new(Duration::from_secs(1)).unwrap();
        assert_eq!(factory.connect("not a url").err().unwrap().code(), "CONFIG_ERROR");
        assert_eq!(
            factory.connect("http://127.0.0.1:8899").unwrap().endpoint(),
            "http://127.0.0.1:8899/"
        );
    }
}
