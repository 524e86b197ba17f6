//! Ethereum JSON-RPC client used for tier balances and document hash registration.
//!
//! Registration sends a zero-value transaction from the registrar account to itself with
//! the document's SHA-256 digest as calldata. The registrar key is held by the RPC node
//! (`eth_sendTransaction`), so this client never signs anything itself.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    time::Duration,
};

use primitive_types::U256;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::BlockchainConfig;
use crate::error::{AppError, AppResult};

/// `0x` followed by exactly 40 hex digits.
pub fn is_eth_address(s: &str) -> bool {
    match s.strip_prefix("0x") {
        Some(rest) => rest.len() == 40 && rest.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Parses a JSON-RPC hex quantity (`"0x1bc16d674ec80000"`).
pub fn parse_quantity(raw: &str) -> AppResult<U256> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| AppError::Blockchain(format!("quantity without 0x prefix: {}", raw)))?;
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| AppError::Blockchain(format!("invalid quantity {}: {:?}", raw, e)))
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Clone)]
pub struct EthClient {
    http: reqwest::Client,
    rpc_url: String,
    registrar: String,
    enabled: bool,
    next_id: Arc<AtomicU64>,
}

impl EthClient {
    pub fn new(cfg: &BlockchainConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            rpc_url: cfg.rpc_url.clone(),
            registrar: cfg.registrar_address.to_lowercase(),
            enabled: cfg.enabled,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn call(&self, method: &str, params: Value) -> AppResult<Value> {
        if !self.enabled {
            return Err(AppError::ServiceUnavailable("Blockchain integration is disabled".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let resp = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Blockchain(format!("{} request failed: {}", method, e)))?;
        if !resp.status().is_success() {
            return Err(AppError::Blockchain(format!("{} returned HTTP {}", method, resp.status())));
        }
        let parsed: RpcResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Blockchain(format!("{} returned malformed JSON: {}", method, e)))?;

        if let Some(err) = parsed.error {
            return Err(AppError::Blockchain(format!("{} failed ({}): {}", method, err.code, err.message)));
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }

    /// Wallet balance in wei at the latest block.
    pub async fn balance_of(&self, address: &str) -> AppResult<U256> {
        let result = self.call("eth_getBalance", json!([address, "latest"])).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| AppError::Blockchain("eth_getBalance returned a non-string result".into()))?;
        parse_quantity(raw)
    }

    /// Anchors a hex digest on chain and returns the transaction hash.
    pub async fn register_hash(&self, digest_hex: &str) -> AppResult<String> {
        let tx = json!({
            "from": self.registrar,
            "to": self.registrar,
            "value": "0x0",
            "data": format!("0x{}", digest_hex.trim_start_matches("0x")),
        });
        let result = self.call("eth_sendTransaction", json!([tx])).await?;
        let tx_hash = result
            .as_str()
            .ok_or_else(|| AppError::Blockchain("eth_sendTransaction returned no hash".into()))?;
        tracing::info!(tx_hash, "Registered document hash on chain");
        Ok(tx_hash.to_string())
    }

    /// `None` while the transaction is pending, otherwise whether it succeeded.
    pub async fn receipt_status(&self, tx_hash: &str) -> AppResult<Option<bool>> {
        let result = self.call("eth_getTransactionReceipt", json!([tx_hash])).await?;
        if result.is_null() {
            return Ok(None);
        }
        let status = match result.get("status").and_then(Value::as_str) {
            Some(raw) => parse_quantity(raw)? == U256::one(),
            // Pre-Byzantium receipts carry no status; inclusion is all we know.
            None => true,
        };
        Ok(Some(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};

    /// Minimal JSON-RPC node answering the three methods the client uses.
    async fn fake_node(Json(req): Json<Value>) -> Json<Value> {
        let id = req["id"].clone();
        let result = match req["method"].as_str().unwrap_or_default() {
            "eth_getBalance" => json!("0x1bc16d674ec80000"),
            "eth_sendTransaction" => {
                assert_eq!(req["params"][0]["data"], json!("0xabcdef"));
                json!("0x5e1f")
            }
            "eth_getTransactionReceipt" => match req["params"][0].as_str() {
                Some("0xpending") => Value::Null,
                Some("0xfailed") => json!({ "status": "0x0" }),
                _ => json!({ "status": "0x1" }),
            },
            _ => {
                return Json(json!({
                    "jsonrpc": "2.0", "id": id,
                    "error": { "code": -32601, "message": "method not found" }
                }))
            }
        };
        Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
    }

    async fn spawn_node() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/", post(fake_node))).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    fn client(rpc_url: String, enabled: bool) -> EthClient {
        EthClient::new(&BlockchainConfig {
            enabled,
            rpc_url,
            registrar_address: "0x00000000000000000000000000000000000000aa".into(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_is_eth_address() {
        assert!(is_eth_address("0x52908400098527886E0F7030069857D2E4169EE7"));
        assert!(!is_eth_address("52908400098527886E0F7030069857D2E4169EE7"));
        assert!(!is_eth_address("0x1234"));
        assert!(!is_eth_address("0xZZ908400098527886E0F7030069857D2E4169EE7"));
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), U256::zero());
        assert_eq!(parse_quantity("0x").unwrap(), U256::zero());
        assert_eq!(parse_quantity("0x1bc16d674ec80000").unwrap(), U256::exp10(18) * U256::from(2u64));
        assert!(parse_quantity("1234").is_err());
        assert!(parse_quantity("0xnothex").is_err());
    }

    #[tokio::test]
    async fn test_balance_and_registration() {
        let eth = client(spawn_node().await, true);
        assert_eq!(eth.balance_of("0x00000000000000000000000000000000000000bb").await.unwrap(), U256::exp10(18) * U256::from(2u64));
        assert_eq!(eth.register_hash("abcdef").await.unwrap(), "0x5e1f");
        assert_eq!(eth.receipt_status("0xdone").await.unwrap(), Some(true));
        assert_eq!(eth.receipt_status("0xfailed").await.unwrap(), Some(false));
        assert_eq!(eth.receipt_status("0xpending").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disabled_client() {
        let eth = client("http://127.0.0.1:9/".into(), false);
        let err = eth.balance_of("0x00000000000000000000000000000000000000bb").await.unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_node() {
        let eth = client("http://127.0.0.1:9/".into(), true);
        let err = eth.register_hash("00").await.unwrap_err();
        assert!(matches!(err, AppError::Blockchain(_)));
    }
}
