//! The signing seam.
//!
//! The orchestrator never holds keys. It hands a [`TxEnvelope`] to a
//! [`WalletClient`], which prepares it (fee sponsorship, nonce, signature)
//! and broadcasts it, returning the transaction hash.

use std::sync::Arc;

use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walletx_chain::{ChainError, ChainRpc, TransactionRequest};
use walletx_core::WalletType;

/// An unsigned contract call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEnvelope {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    /// Ask the wallet to have fees sponsored.
    pub gasless: bool,
}

/// A transaction the wallet has accepted and is ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTransaction {
    pub envelope: TxEnvelope,
    pub from: Address,
}

/// Result of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTransaction {
    pub hash: B256,
}

#[derive(Debug, thiserror::Error)]
pub enum WalletClientError {
    #[error("wallet rejected the transaction: {0}")]
    Rejected(String),

    #[error("wallet unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// A connected wallet able to sign and broadcast on the active chain.
#[async_trait]
pub trait WalletClient: Send + Sync {
    /// Wallet type label stored on records (`"bip"`, `"pushchain-ui"`).
    fn wallet_type(&self) -> &str;

    /// Connected account.
    fn address(&self) -> Address;

    async fn create_transaction(
        &self,
        envelope: TxEnvelope,
    ) -> Result<PreparedTransaction, WalletClientError>;

    async fn send_transaction(
        &self,
        tx: PreparedTransaction,
    ) -> Result<SentTransaction, WalletClientError>;
}

/// Wallet backed by a node-managed account (`eth_sendTransaction`).
///
/// Fees are paid by the account; the `gasless` hint is ignored.
pub struct RpcWalletClient {
    rpc: Arc<dyn ChainRpc>,
    from: Address,
    wallet_type: WalletType,
}

impl RpcWalletClient {
    pub fn new(rpc: Arc<dyn ChainRpc>, from: Address) -> Self {
        Self {
            rpc,
            from,
            wallet_type: WalletType::Bip,
        }
    }

    pub fn with_wallet_type(mut self, wallet_type: WalletType) -> Self {
        self.wallet_type = wallet_type;
        self
    }
}

#[async_trait]
impl WalletClient for RpcWalletClient {
    fn wallet_type(&self) -> &str {
        self.wallet_type.as_str()
    }

    fn address(&self) -> Address {
        self.from
    }

    async fn create_transaction(
        &self,
        envelope: TxEnvelope,
    ) -> Result<PreparedTransaction, WalletClientError> {
        if envelope.to == Address::ZERO {
            return Err(WalletClientError::Rejected("refusing to call the zero address".into()));
        }
        if envelope.gasless {
            debug!(from = %self.from, "gasless requested, node account pays fees");
        }
        Ok(PreparedTransaction {
            envelope,
            from: self.from,
        })
    }

    async fn send_transaction(
        &self,
        tx: PreparedTransaction,
    ) -> Result<SentTransaction, WalletClientError> {
        let request = TransactionRequest {
            from: tx.from,
            to: tx.envelope.to,
            data: tx.envelope.data,
            value: tx.envelope.value,
        };
        let hash = self.rpc.send_transaction(&request).await?;
        debug!(%hash, from = %tx.from, "transaction broadcast");
        Ok(SentTransaction { hash })
    }
}
