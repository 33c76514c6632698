//! Escrow orchestration: create, claim, refund.
//!
//! Each operation validates locally, checks that the escrow contract is
//! deployed, builds the call, hands it to the caller's wallet, waits for the
//! receipt and finally updates local history. Failures at any step are
//! normalized into one [`EscrowError`].

use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use chrono::Utc;
use tracing::{debug, info, warn};
use walletx_chain::{
    AmountError, CancelToken, ChainError, ChainRpc, ConfirmationWaiter, ContractCall, EscrowCall,
    RetryPolicy, TransactionReceipt, check_contract_reachable, find_escrow_created,
    format_units, parse_address, parse_escrow_id, parse_units,
};
use walletx_core::{NetworkConfig, WalletxConfig};

use crate::error::{EscrowError, EscrowOp, Failure, ValidationReason, normalize};
use crate::guard::InFlight;
use crate::record::{EscrowStatus, EscrowTransaction, IdSource, TransactionKind};
use crate::record_store::{EscrowRecordStore, RecordKey, StatusUpdate, StoreError};
use crate::wallet_client::{TxEnvelope, WalletClient};

/// Lock `amount` for `receiver`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateEscrowRequest {
    pub sender: String,
    pub receiver: String,
    /// Decimal amount in native currency, e.g. `"1.5"`.
    pub amount: String,
}

/// Claim or refund escrow `escrow_id` as `caller`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleEscrowRequest {
    pub caller: String,
    pub escrow_id: String,
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub hash: String,
    /// `None` when the creation event could not be read from the receipt.
    pub escrow_id: Option<String>,
    /// The escrow exists on chain but its id is unknown locally; the stored
    /// record carries a fallback id until [`EscrowService::reconcile`] runs.
    pub partial: bool,
    pub receipt: TransactionReceipt,
    pub record: EscrowTransaction,
    pub explorer_url: String,
}

#[derive(Debug, Clone)]
pub struct SettleOutcome {
    pub hash: String,
    pub escrow_id: String,
    pub status: EscrowStatus,
    pub receipt: TransactionReceipt,
    pub local_update: StatusUpdate,
    pub explorer_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The fallback id was replaced with the on-chain id.
    Resolved { escrow_id: String },
    /// The record already had its on-chain id.
    AlreadyOnChain { escrow_id: String },
    /// The receipt still carries no readable creation event.
    StillPartial { fallback_id: String },
}

struct ValidatedCreate {
    sender: Address,
    receiver: Address,
    value: U256,
}

/// Runs escrow operations against one network.
pub struct EscrowService {
    rpc: Arc<dyn ChainRpc>,
    store: EscrowRecordStore,
    network: NetworkConfig,
    confirmation: RetryPolicy,
    reachability: RetryPolicy,
    gasless: bool,
    in_flight: InFlight,
}

impl EscrowService {
    /// Service with default retry budgets and fee sponsorship requested.
    pub fn new(rpc: Arc<dyn ChainRpc>, store: EscrowRecordStore, network: NetworkConfig) -> Self {
        let defaults = WalletxConfig::default();
        Self {
            rpc,
            store,
            network,
            confirmation: RetryPolicy::from(&defaults.confirmation_retry),
            reachability: RetryPolicy::from(&defaults.reachability_retry),
            gasless: defaults.gasless,
            in_flight: InFlight::new(),
        }
    }

    /// Service for `network` with retry budgets and sponsorship taken from
    /// `config`.
    pub fn from_config(
        config: &WalletxConfig,
        network: NetworkConfig,
        rpc: Arc<dyn ChainRpc>,
        store: EscrowRecordStore,
    ) -> Self {
        Self {
            confirmation: RetryPolicy::from(&config.confirmation_retry),
            reachability: RetryPolicy::from(&config.reachability_retry),
            gasless: config.gasless,
            ..Self::new(rpc, store, network)
        }
    }

    pub fn with_confirmation_policy(mut self, policy: RetryPolicy) -> Self {
        self.confirmation = policy;
        self
    }

    pub fn with_reachability_policy(mut self, policy: RetryPolicy) -> Self {
        self.reachability = policy;
        self
    }

    pub fn with_gasless(mut self, gasless: bool) -> Self {
        self.gasless = gasless;
        self
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    pub fn store(&self) -> &EscrowRecordStore {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Create an escrow and record it as `PENDING` under the sender.
    pub async fn create(
        &self,
        client: &dyn WalletClient,
        req: CreateEscrowRequest,
        cancel: &CancelToken,
    ) -> Result<CreateOutcome, EscrowError> {
        self.run_create(client, &req, cancel)
            .await
            .map_err(|f| self.fail(EscrowOp::Create, f))
    }

    /// Claim an escrow as its receiver and mark the caller's row `CLAIMED`.
    pub async fn claim(
        &self,
        client: &dyn WalletClient,
        req: SettleEscrowRequest,
        cancel: &CancelToken,
    ) -> Result<SettleOutcome, EscrowError> {
        self.run_settle(client, &req, EscrowStatus::Claimed, cancel)
            .await
            .map_err(|f| self.fail(EscrowOp::Claim, f))
    }

    /// Refund an escrow to its sender and mark the caller's row `REFUNDED`.
    pub async fn refund(
        &self,
        client: &dyn WalletClient,
        req: SettleEscrowRequest,
        cancel: &CancelToken,
    ) -> Result<SettleOutcome, EscrowError> {
        self.run_settle(client, &req, EscrowStatus::Refunded, cancel)
            .await
            .map_err(|f| self.fail(EscrowOp::Refund, f))
    }

    /// Retry reading the escrow id of a partial create from its receipt.
    pub async fn reconcile(
        &self,
        owner: &str,
        creation_hash: &str,
        cancel: &CancelToken,
    ) -> Result<ReconcileOutcome, EscrowError> {
        self.run_reconcile(owner, creation_hash, cancel)
            .await
            .map_err(|f| self.fail(EscrowOp::Reconcile, f))
    }

    /// `owner`'s escrows on this network, newest first.
    pub fn history(&self, owner: &str) -> Result<Vec<EscrowTransaction>, EscrowError> {
        let mut rows = self
            .store
            .list(&self.record_key(owner))
            .map_err(|source| self.fail(EscrowOp::History, Failure::Store { hash: None, source }))?;
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(rows)
    }

    /// `owner`'s escrows that are still open.
    pub fn pending(&self, owner: &str) -> Result<Vec<EscrowTransaction>, EscrowError> {
        let mut rows = self.history(owner)?;
        rows.retain(|r| r.status == EscrowStatus::Pending);
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Operation bodies
    // -----------------------------------------------------------------------

    async fn run_create(
        &self,
        client: &dyn WalletClient,
        req: &CreateEscrowRequest,
        cancel: &CancelToken,
    ) -> Result<CreateOutcome, Failure> {
        let checked = self.validate_create(req)?;
        let guard_key = format!(
            "create:{}:{}:{}:{}",
            self.network.blockchain, checked.sender, checked.receiver, checked.value
        );
        let _slot = self
            .in_flight
            .try_acquire(guard_key.as_str())
            .ok_or_else(|| Failure::Busy(guard_key.clone()))?;

        let contract = self.contract_address()?;
        self.ensure_reachable(contract, cancel).await?;

        let balance = self
            .rpc
            .get_balance(checked.sender)
            .await
            .map_err(|source| Failure::Chain { hash: None, source })?;
        if balance < checked.value {
            return Err(ValidationReason::InsufficientBalance {
                balance: format_units(balance, self.network.decimals),
                required: format_units(checked.value, self.network.decimals),
            }
            .into());
        }

        let call = EscrowCall::Create {
            receiver: checked.receiver,
            amount: req.amount.trim().to_string(),
        }
        .build(contract, self.network.decimals)
        .map_err(|source| Failure::Chain { hash: None, source })?;

        let hash = self.submit(client, call).await?;
        let hash_str = hash.to_string();
        info!(
            hash = %hash_str,
            sender = %checked.sender,
            receiver = %checked.receiver,
            amount = %req.amount.trim(),
            "escrow creation broadcast"
        );

        let receipt = self.confirm(hash, cancel).await?;

        let now = Utc::now().timestamp_millis();
        let (escrow_id, id_source) = match find_escrow_created(&receipt.logs, Some(contract)) {
            Some(id) => (id.to_string(), IdSource::OnChain),
            None => {
                warn!(hash = %hash_str, "no EscrowCreated event in receipt, storing fallback id");
                (now.to_string(), IdSource::Fallback)
            }
        };
        let partial = id_source == IdSource::Fallback;

        let record = EscrowTransaction {
            id: escrow_id.clone(),
            id_source,
            hash: hash_str.clone(),
            sender: checked.sender.to_checksum(None),
            receiver: checked.receiver.to_checksum(None),
            amount: req.amount.trim().to_string(),
            status: EscrowStatus::Pending,
            timestamp: now,
            blockchain: self.network.blockchain.clone(),
            network: self.network.network.clone(),
            gas_used: receipt.gas_used.to_string(),
            block_number: receipt.block_number().to_string(),
            kind: TransactionKind::Create,
            wallet_type: client.wallet_type().to_string(),
            settlement_hash: None,
            updated_at: None,
        };
        self.store
            .append(&self.record_key(&req.sender), record.clone())
            .map_err(|source| Failure::Store {
                hash: Some(hash_str.clone()),
                source,
            })?;

        info!(hash = %hash_str, escrow_id = %escrow_id, partial, "escrow created");
        Ok(CreateOutcome {
            explorer_url: self.network.explorer_tx_url(&hash_str),
            hash: hash_str,
            escrow_id: (!partial).then_some(escrow_id),
            partial,
            receipt,
            record,
        })
    }

    async fn run_settle(
        &self,
        client: &dyn WalletClient,
        req: &SettleEscrowRequest,
        target: EscrowStatus,
        cancel: &CancelToken,
    ) -> Result<SettleOutcome, Failure> {
        parse_address(&req.caller).map_err(|source| ValidationReason::InvalidAddress {
            field: "caller",
            source,
        })?;
        let escrow_id = parse_escrow_id(&req.escrow_id)
            .map_err(|_| ValidationReason::InvalidEscrowId(req.escrow_id.clone()))?;
        let id_str = escrow_id.to_string();

        let guard_key = format!(
            "settle:{}:{}:{}",
            self.network.blockchain, self.network.network, id_str
        );
        let _slot = self
            .in_flight
            .try_acquire(guard_key.as_str())
            .ok_or_else(|| Failure::Busy(guard_key.clone()))?;

        let contract = self.contract_address()?;
        self.ensure_reachable(contract, cancel).await?;

        let call = match target {
            EscrowStatus::Refunded => EscrowCall::Refund { escrow_id },
            _ => EscrowCall::Claim { escrow_id },
        }
        .build(contract, self.network.decimals)
        .map_err(|source| Failure::Chain { hash: None, source })?;

        let hash = self.submit(client, call).await?;
        let hash_str = hash.to_string();
        info!(hash = %hash_str, escrow_id = %id_str, target = %target, "escrow settlement broadcast");

        let receipt = self.confirm(hash, cancel).await?;

        let local_update = match self.store.update_status(
            &self.record_key(&req.caller),
            &id_str,
            target,
            &hash_str,
        ) {
            Ok(update) => update,
            Err(source @ StoreError::NotFound(_)) => {
                warn!(escrow_id = %id_str, hash = %hash_str, "settled on chain but no local record");
                return Err(Failure::MissingRecord {
                    lookup: id_str,
                    hash: Some(hash_str),
                    receipt: Some(receipt),
                    source,
                });
            }
            Err(source) => {
                return Err(Failure::Store {
                    hash: Some(hash_str),
                    source,
                });
            }
        };

        Ok(SettleOutcome {
            explorer_url: self.network.explorer_tx_url(&hash_str),
            hash: hash_str,
            escrow_id: id_str,
            status: target,
            receipt,
            local_update,
        })
    }

    async fn run_reconcile(
        &self,
        owner: &str,
        creation_hash: &str,
        cancel: &CancelToken,
    ) -> Result<ReconcileOutcome, Failure> {
        let key = self.record_key(owner);
        let rows = self
            .store
            .list(&key)
            .map_err(|source| Failure::Store { hash: None, source })?;
        let Some(row) = rows
            .into_iter()
            .find(|r| r.hash.eq_ignore_ascii_case(creation_hash))
        else {
            return Err(Failure::MissingRecord {
                lookup: creation_hash.to_string(),
                hash: None,
                receipt: None,
                source: StoreError::NotFound(creation_hash.to_string()),
            });
        };

        if !row.is_partial() {
            return Ok(ReconcileOutcome::AlreadyOnChain { escrow_id: row.id });
        }

        let guard_key = format!("reconcile:{}", row.hash.to_ascii_lowercase());
        let _slot = self
            .in_flight
            .try_acquire(guard_key.as_str())
            .ok_or_else(|| Failure::Busy(guard_key.clone()))?;

        let hash: B256 = row.hash.parse().map_err(|e| Failure::Chain {
            hash: Some(row.hash.clone()),
            source: ChainError::Decode(format!("stored hash {:?}: {e}", row.hash)),
        })?;
        let contract = self.contract_address()?;
        let receipt = self.confirm(hash, cancel).await?;

        match find_escrow_created(&receipt.logs, Some(contract)) {
            Some(id) => {
                let id = id.to_string();
                self.store
                    .replace_fallback_id(&key, &row.hash, &id)
                    .map_err(|source| Failure::Store {
                        hash: Some(row.hash.clone()),
                        source,
                    })?;
                info!(hash = %row.hash, escrow_id = %id, "partial escrow reconciled");
                Ok(ReconcileOutcome::Resolved { escrow_id: id })
            }
            None => {
                debug!(hash = %row.hash, "creation event still missing");
                Ok(ReconcileOutcome::StillPartial { fallback_id: row.id })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    fn validate_create(&self, req: &CreateEscrowRequest) -> Result<ValidatedCreate, Failure> {
        let sender = parse_address(&req.sender).map_err(|source| ValidationReason::InvalidAddress {
            field: "sender",
            source,
        })?;
        let receiver =
            parse_address(&req.receiver).map_err(|source| ValidationReason::InvalidAddress {
                field: "receiver",
                source,
            })?;
        if sender == receiver {
            return Err(ValidationReason::SelfTransfer.into());
        }

        let amount = req.amount.trim();
        if amount.starts_with('-') {
            return Err(ValidationReason::NonPositiveAmount.into());
        }
        let value = parse_units(amount, self.network.decimals).map_err(|e| match e {
            AmountError::ExcessPrecision { digits, max } => {
                ValidationReason::ExcessPrecision { digits, max }
            }
            other => ValidationReason::InvalidAmount(other),
        })?;
        if value.is_zero() {
            return Err(ValidationReason::NonPositiveAmount.into());
        }

        Ok(ValidatedCreate {
            sender,
            receiver,
            value,
        })
    }

    fn contract_address(&self) -> Result<Address, Failure> {
        let configured = self.network.escrow_contract.as_deref().ok_or_else(|| Failure::Chain {
            hash: None,
            source: ChainError::Encoding(format!(
                "no escrow contract configured for {}/{}",
                self.network.blockchain, self.network.network
            )),
        })?;
        parse_address(configured).map_err(|e| Failure::Chain {
            hash: None,
            source: ChainError::Encoding(format!("escrow contract address {configured:?}: {e}")),
        })
    }

    async fn ensure_reachable(&self, contract: Address, cancel: &CancelToken) -> Result<(), Failure> {
        check_contract_reachable(self.rpc.as_ref(), contract, &self.reachability, cancel)
            .await
            .map_err(|e| {
                if cancel.is_cancelled() {
                    Failure::Cancelled { hash: None }
                } else {
                    Failure::Unreachable(e)
                }
            })
    }

    async fn submit(&self, client: &dyn WalletClient, call: ContractCall) -> Result<B256, Failure> {
        let envelope = TxEnvelope {
            to: call.to,
            data: call.calldata,
            value: call.value,
            gasless: self.gasless,
        };
        let prepared = client.create_transaction(envelope).await?;
        let sent = client.send_transaction(prepared).await?;
        Ok(sent.hash)
    }

    /// Wait for `hash` and require a successful receipt.
    async fn confirm(&self, hash: B256, cancel: &CancelToken) -> Result<TransactionReceipt, Failure> {
        let receipt = ConfirmationWaiter::new(self.rpc.as_ref(), self.confirmation)
            .wait(hash, cancel)
            .await?;
        if !receipt.succeeded() {
            warn!(%hash, "transaction reverted");
            return Err(Failure::Reverted {
                hash: hash.to_string(),
            });
        }
        Ok(receipt)
    }

    fn record_key(&self, owner: &str) -> RecordKey {
        RecordKey::new(&self.network.blockchain, &self.network.network, owner)
    }

    fn fail(&self, op: EscrowOp, failure: Failure) -> EscrowError {
        let err = normalize(op, failure);
        warn!(
            op = %op,
            category = ?err.category(),
            network = %self.network.network,
            "escrow operation failed: {err}"
        );
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walletx_core::{MemoryStore, NetworkRegistry};

    fn service() -> EscrowService {
        let registry = NetworkRegistry::with_defaults();
        let mut network = registry
            .get("pushchain", "testnet")
            .cloned()
            .unwrap();
        network.escrow_contract = Some("0x5fbdb2315678afecb367f032d93f642f64180aa3".into());
        EscrowService::new(
            Arc::new(walletx_chain::HttpRpcClient::new(
                "http://127.0.0.1:1",
                std::time::Duration::from_millis(10),
            )),
            EscrowRecordStore::new(Arc::new(MemoryStore::new())),
            network,
        )
    }

    fn create(sender: &str, receiver: &str, amount: &str) -> CreateEscrowRequest {
        CreateEscrowRequest {
            sender: sender.into(),
            receiver: receiver.into(),
            amount: amount.into(),
        }
    }

    const S: &str = "0x742d35cc6634c0532925a3b844bc9e7595f2bd18";
    const R: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";

    fn reason(f: Failure) -> ValidationReason {
        match f {
            Failure::Invalid(r) => r,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn validation_reasons() {
        let svc = service();
        assert!(matches!(
            reason(svc.validate_create(&create(S, S, "1")).err().unwrap()),
            ValidationReason::SelfTransfer
        ));
        assert!(matches!(
            reason(svc.validate_create(&create(S, "0x1234", "1")).err().unwrap()),
            ValidationReason::InvalidAddress { field: "receiver", .. }
        ));
        assert!(matches!(
            reason(svc.validate_create(&create(S, R, "0")).err().unwrap()),
            ValidationReason::NonPositiveAmount
        ));
        assert!(matches!(
            reason(svc.validate_create(&create(S, R, "-1")).err().unwrap()),
            ValidationReason::NonPositiveAmount
        ));
        assert!(matches!(
            reason(svc.validate_create(&create(S, R, "0.0000000000000000001")).err().unwrap()),
            ValidationReason::ExcessPrecision { max: 18, .. }
        ));
        assert!(matches!(
            reason(svc.validate_create(&create(S, R, "abc")).err().unwrap()),
            ValidationReason::InvalidAmount(_)
        ));
    }

    #[test]
    fn valid_create_converts_exactly() {
        let svc = service();
        let checked = svc.validate_create(&create(S, R, " 1.5 ")).ok().unwrap();
        assert_eq!(checked.value, U256::from(1_500_000_000_000_000_000u128));
        assert_ne!(checked.sender, checked.receiver);
    }

    #[test]
    fn missing_contract_is_encoding_failure() {
        let mut svc = service();
        svc.network.escrow_contract = None;
        let err = normalize(EscrowOp::Create, svc.contract_address().unwrap_err());
        assert!(matches!(err, EscrowError::Encoding { .. }));
    }
}
