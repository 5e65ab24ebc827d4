//! JSON-RPC transport and the wallet boundary.
//!
//! ## Resilience
//!
//! * Reads (`eth_call`, receipts) retry transport failures, HTTP 429 and
//!   provider rate-limit errors with exponential back-off, up to
//!   [`RpcConfig::max_retries`] attempts.
//! * Writes (`eth_sendTransaction`) are sent exactly once. A failed
//!   submission must be re-triggered by the user.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::actions::ContractCall;
use crate::errors::{ClientError, Result};
use crate::types::TxReceipt;

/// Provider-side "limit exceeded" code; treated as transient.
const LIMIT_EXCEEDED: i64 = -32005;

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

/// Parameters of an `eth_call`. Also the identity of a cached read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub to: Address,
    #[serde(rename = "data")]
    pub input: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

impl CallRequest {
    pub fn read(to: Address, input: impl Into<Bytes>) -> Self {
        Self {
            from: None,
            to,
            input: input.into(),
            value: None,
        }
    }

    /// Dry run of a write from `from`, used to surface reverts before sending.
    pub fn simulate(from: Address, call: &ContractCall) -> Self {
        Self {
            from: Some(from),
            to: call.to,
            input: call.input.clone(),
            value: (!call.value.is_zero()).then_some(call.value),
        }
    }
}

/// Error object of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RpcFault {
    pub code: i64,
    pub message: String,
}

impl From<RpcFault> for ClientError {
    fn from(f: RpcFault) -> Self {
        ClientError::Rpc {
            code: f.code,
            message: f.message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    id: Value,
    result: Option<Value>,
    error: Option<RpcFault>,
}

// ─────────────────────────────────────────────────────────
// Boundaries
// ─────────────────────────────────────────────────────────

/// Read side of the chain.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn call(&self, request: &CallRequest) -> Result<Bytes>;

    /// All calls in one round trip. Transport failure fails the whole
    /// batch; a revert only fails its own slot.
    async fn call_batch(
        &self,
        requests: &[CallRequest],
    ) -> Result<Vec<std::result::Result<Bytes, RpcFault>>>;

    /// `None` while the transaction is not yet included.
    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>>;
}

/// The connected wallet: knows its account and signs-and-sends calls.
#[async_trait]
pub trait Wallet: Send + Sync {
    fn account(&self) -> Option<Address>;

    async fn send_transaction(&self, call: &ContractCall) -> Result<TxHash>;
}

// ─────────────────────────────────────────────────────────
// HTTP implementation
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String,
    pub chain_id: u64,
    /// Extra attempts for reads after the first failure.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RpcConfig {
    pub fn new(url: impl Into<String>, chain_id: u64) -> Self {
        Self {
            url: url.into(),
            chain_id,
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// JSON-RPC 2.0 client over HTTP.
pub struct HttpRpc {
    client: Client,
    config: RpcConfig,
    next_id: AtomicU64,
}

impl HttpRpc {
    pub fn new(client: Client, config: RpcConfig) -> Self {
        Self {
            client,
            config,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    fn envelope(&self, method: &str, params: Value) -> (u64, Value) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        (
            id,
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }),
        )
    }

    /// POST `body`, retrying transport failures and rate limits up to
    /// `retries` extra times.
    async fn post(&self, body: &Value, retries: u32) -> Result<Value> {
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0u32;

        loop {
            let response = self.client.post(&self.config.url).json(body).send().await;

            match response {
                Err(e) => {
                    if attempt >= retries {
                        return Err(e.into());
                    }
                    warn!("RPC request failed (will retry in {backoff:?}): {e}");
                }
                Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    if attempt >= retries {
                        return Err(ClientError::Rpc {
                            code: 429,
                            message: "rate limited".to_string(),
                        });
                    }
                    warn!("Rate-limited by RPC (will retry in {backoff:?})");
                }
                Ok(resp) => {
                    let body: Value = resp.error_for_status()?.json().await?;
                    if attempt >= retries || !is_limit_exceeded(&body) {
                        return Ok(body);
                    }
                    warn!("RPC limit exceeded (will retry in {backoff:?})");
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.max_backoff);
            attempt += 1;
        }
    }

    async fn request(&self, method: &str, params: Value, retries: u32) -> Result<Value> {
        let (_, body) = self.envelope(method, params);
        let raw = self.post(&body, retries).await?;
        let envelope: RpcEnvelope = serde_json::from_value(raw)?;

        if let Some(err) = envelope.error {
            return Err(err.into());
        }
        debug!("{method} ok");
        Ok(envelope.result.unwrap_or(Value::Null))
    }

    /// `eth_sendTransaction` from `from`. Never retried.
    pub async fn send_transaction_from(&self, from: Address, call: &ContractCall) -> Result<TxHash> {
        let mut tx = json!({
            "from": from,
            "to": call.to,
            "data": call.input,
            "chainId": format!("0x{:x}", self.config.chain_id),
        });
        if !call.value.is_zero() {
            tx["value"] = json!(call.value);
        }
        let result = self.request("eth_sendTransaction", json!([tx]), 0).await?;
        Ok(serde_json::from_value(result)?)
    }
}

fn is_limit_exceeded(body: &Value) -> bool {
    let code_of = |v: &Value| v.get("error").and_then(|e| e.get("code")).and_then(Value::as_i64);
    match body {
        Value::Array(items) => items.iter().any(|i| code_of(i) == Some(LIMIT_EXCEEDED)),
        other => code_of(other) == Some(LIMIT_EXCEEDED),
    }
}

#[async_trait]
impl ChainRpc for HttpRpc {
    async fn call(&self, request: &CallRequest) -> Result<Bytes> {
        let result = self
            .request("eth_call", json!([request, "latest"]), self.config.max_retries)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn call_batch(
        &self,
        requests: &[CallRequest],
    ) -> Result<Vec<std::result::Result<Bytes, RpcFault>>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(requests.len());
        let mut batch = Vec::with_capacity(requests.len());
        for request in requests {
            let (id, body) = self.envelope("eth_call", json!([request, "latest"]));
            ids.push(id);
            batch.push(body);
        }

        let raw = self.post(&Value::Array(batch), self.config.max_retries).await?;
        let envelopes: Vec<RpcEnvelope> = serde_json::from_value(raw)?;
        debug!("eth_call batch of {} returned {}", ids.len(), envelopes.len());

        // Providers may answer out of order; match by id.
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let envelope = envelopes
                .iter()
                .find(|e| e.id.as_u64() == Some(id))
                .ok_or_else(|| ClientError::Malformed(format!("missing batch response id {id}")))?;
            let slot = match (&envelope.error, &envelope.result) {
                (Some(fault), _) => Err(fault.clone()),
                (None, Some(value)) => serde_json::from_value::<Bytes>(value.clone()).map_err(|e| {
                    RpcFault {
                        code: -32700,
                        message: e.to_string(),
                    }
                }),
                (None, None) => Err(RpcFault {
                    code: -32603,
                    message: "empty result".to_string(),
                }),
            };
            out.push(slot);
        }
        Ok(out)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>> {
        let result = self
            .request(
                "eth_getTransactionReceipt",
                json!([hash]),
                self.config.max_retries,
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(result)?))
    }
}

/// Wallet backed by a node or remote signer that holds `account`'s key and
/// exposes `eth_sendTransaction`.
pub struct RpcWallet {
    rpc: std::sync::Arc<HttpRpc>,
    account: Option<Address>,
}

impl RpcWallet {
    pub fn new(rpc: std::sync::Arc<HttpRpc>, account: Option<Address>) -> Self {
        Self { rpc, account }
    }
}

#[async_trait]
impl Wallet for RpcWallet {
    fn account(&self) -> Option<Address> {
        self.account
    }

    async fn send_transaction(&self, call: &ContractCall) -> Result<TxHash> {
        let from = self.account.ok_or(ClientError::NoAccount)?;
        self.rpc.send_transaction_from(from, call).await
    }
}
