//! JSON-RPC access to an EVM node.
//!
//! [`ChainRpc`] is the seam the rest of the workspace talks to; the
//! production implementation is [`HttpRpcClient`], a thin JSON-RPC 2.0 client
//! over `reqwest`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U64, U256};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};
use walletx_core::NetworkConfig;

use crate::cancel::CancelToken;
use crate::error::ChainError;
use crate::retry::{RetryError, RetryPolicy, retry};
use crate::types::TransactionReceipt;

/// Read/write access to one chain.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ChainError>;

    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Native balance in base units at the latest block.
    async fn get_balance(&self, address: Address) -> Result<U256, ChainError>;

    /// Deployed bytecode; empty for externally owned accounts.
    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError>;

    /// `None` while the transaction is unknown or not yet mined.
    async fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, ChainError>;

    /// `eth_sendTransaction` with a node-managed `from` account.
    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256, ChainError>;
}

/// Transaction object for `eth_sendTransaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

// ---------------------------------------------------------------------------
// JSON-RPC wire types (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// JSON-RPC 2.0 over HTTP(S).
pub struct HttpRpcClient {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Client for a configured network.
    pub fn for_network(network: &NetworkConfig, timeout: Duration) -> Self {
        Self::new(network.rpc_url.clone(), timeout)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        debug!(method, id, url = %self.url, "rpc request");

        let resp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(format!("{method}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(method, %status, "rpc http error");
            return Err(ChainError::Transport(format!(
                "{method}: HTTP {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        let parsed: RpcResponse = resp
            .json()
            .await
            .map_err(|e| ChainError::Decode(format!("{method}: {e}")))?;
        decode_response(method, parsed)
    }
}

fn decode_response<R: DeserializeOwned>(method: &str, resp: RpcResponse) -> Result<R, ChainError> {
    if let Some(err) = resp.error {
        return Err(ChainError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    serde_json::from_value(resp.result.unwrap_or(Value::Null))
        .map_err(|e| ChainError::Decode(format!("{method}: {e}")))
}

#[async_trait]
impl ChainRpc for HttpRpcClient {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        let id: U64 = self.call("eth_chainId", json!([])).await?;
        Ok(id.to::<u64>())
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let n: U64 = self.call("eth_blockNumber", json!([])).await?;
        Ok(n.to::<u64>())
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.call("eth_getBalance", json!([address, "latest"])).await
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError> {
        self.call("eth_getCode", json!([address, "latest"])).await
    }

    async fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        self.call("eth_getTransactionReceipt", json!([hash])).await
    }

    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256, ChainError> {
        self.call("eth_sendTransaction", json!([tx])).await
    }
}

// ---------------------------------------------------------------------------
// Reachability
// ---------------------------------------------------------------------------

/// Confirm that `contract` has bytecode on the chain behind `rpc`.
///
/// RPC failures are retried under `policy`; an empty code response is final.
pub async fn check_contract_reachable(
    rpc: &dyn ChainRpc,
    contract: Address,
    policy: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<(), ChainError> {
    let code = retry(policy, cancel, |_: &ChainError| true, || rpc.get_code(contract))
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { last, .. } | RetryError::Fatal(last) => last,
            RetryError::Cancelled { .. } => {
                ChainError::Transport("reachability check cancelled".into())
            }
        })?;

    if code.is_empty() {
        warn!(%contract, "no contract code at escrow address");
        return Err(ChainError::NoContractCode(contract));
    }
    debug!(%contract, code_len = code.len(), "escrow contract reachable");
    Ok(())
}
