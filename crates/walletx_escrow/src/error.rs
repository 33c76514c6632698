//! Normalized escrow errors.
//!
//! Everything that goes wrong inside an operation is first captured as a
//! `Failure` and then turned into exactly one [`EscrowError`] by
//! `normalize`. Callers never see provider-specific shapes, but the
//! original error is kept as the `source`.

use std::fmt;

use serde::{Deserialize, Serialize};
use walletx_chain::{AddressError, AmountError, ChainError, ConfirmError, TransactionReceipt};

use crate::record_store::StoreError;
use crate::wallet_client::WalletClientError;

/// Orchestrator operation an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscrowOp {
    Create,
    Claim,
    Refund,
    Reconcile,
    History,
}

impl fmt::Display for EscrowOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EscrowOp::Create => "create",
            EscrowOp::Claim => "claim",
            EscrowOp::Refund => "refund",
            EscrowOp::Reconcile => "reconcile",
            EscrowOp::History => "history",
        })
    }
}

/// What was wrong with the caller's input.
#[derive(Debug, thiserror::Error)]
pub enum ValidationReason {
    #[error("{field} address is invalid: {source}")]
    InvalidAddress {
        field: &'static str,
        #[source]
        source: AddressError,
    },

    #[error("amount must be a positive decimal")]
    NonPositiveAmount,

    #[error("amount is invalid: {0}")]
    InvalidAmount(#[source] AmountError),

    #[error("amount has {digits} fractional digits, at most {max} allowed")]
    ExcessPrecision { digits: usize, max: u8 },

    #[error("receiver must differ from sender")]
    SelfTransfer,

    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: String, required: String },

    #[error("escrow id {0:?} is not a valid id")]
    InvalidEscrowId(String),
}

/// Coarse classification for display and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Fix the input and try again.
    UserInput,
    /// Node or network trouble; retrying may help.
    Network,
    /// Outcome unknown; the transaction may still confirm.
    Pending,
    /// Misconfiguration or a bug; not recoverable by the user.
    Configuration,
    /// Local record keeping went wrong; the chain may be fine.
    LocalBookkeeping,
    /// Another operation on the same target is running.
    Concurrency,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The only error type escrow operations return.
#[derive(Debug, thiserror::Error)]
pub enum EscrowError {
    #[error("{op}: {reason}")]
    Validation {
        op: EscrowOp,
        #[source]
        reason: ValidationReason,
    },

    #[error("{op}: escrow contract unreachable: {source}")]
    ContractUnreachable {
        op: EscrowOp,
        #[source]
        source: ChainError,
    },

    #[error("{op}: transaction {hash} not confirmed yet")]
    ConfirmationTimeout {
        op: EscrowOp,
        hash: String,
        #[source]
        source: ConfirmError,
    },

    #[error("{op}: chain request failed: {source}")]
    Rpc {
        op: EscrowOp,
        /// Set once a transaction was broadcast.
        hash: Option<String>,
        /// The contract itself refused the call, at send time or in the receipt.
        reverted: bool,
        #[source]
        source: BoxError,
    },

    #[error("{op}: cannot encode call: {source}")]
    Encoding {
        op: EscrowOp,
        #[source]
        source: ChainError,
    },

    /// The on-chain call went through but no local row matched.
    #[error("{op}: no local record for {lookup}")]
    RecordNotFound {
        op: EscrowOp,
        lookup: String,
        hash: Option<String>,
        receipt: Option<Box<TransactionReceipt>>,
        #[source]
        source: StoreError,
    },

    #[error("{op}: {key} is already in progress")]
    AlreadyInProgress { op: EscrowOp, key: String },

    #[error("{op}: local record update failed: {source}")]
    Storage {
        op: EscrowOp,
        hash: Option<String>,
        #[source]
        source: StoreError,
    },

    #[error("{op}: cancelled")]
    Cancelled { op: EscrowOp, hash: Option<String> },
}

impl EscrowError {
    pub fn op(&self) -> EscrowOp {
        match self {
            Self::Validation { op, .. }
            | Self::ContractUnreachable { op, .. }
            | Self::ConfirmationTimeout { op, .. }
            | Self::Rpc { op, .. }
            | Self::Encoding { op, .. }
            | Self::RecordNotFound { op, .. }
            | Self::AlreadyInProgress { op, .. }
            | Self::Storage { op, .. }
            | Self::Cancelled { op, .. } => *op,
        }
    }

    /// Hash of the broadcast transaction, when one exists.
    pub fn transaction_hash(&self) -> Option<&str> {
        match self {
            Self::ConfirmationTimeout { hash, .. } => Some(hash),
            Self::Rpc { hash, .. }
            | Self::RecordNotFound { hash, .. }
            | Self::Storage { hash, .. }
            | Self::Cancelled { hash, .. } => hash.as_deref(),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::UserInput,
            Self::ContractUnreachable { .. } | Self::Rpc { .. } => ErrorCategory::Network,
            Self::ConfirmationTimeout { .. } | Self::Cancelled { .. } => ErrorCategory::Pending,
            Self::Encoding { .. } => ErrorCategory::Configuration,
            Self::RecordNotFound { .. } | Self::Storage { .. } => ErrorCategory::LocalBookkeeping,
            Self::AlreadyInProgress { .. } => ErrorCategory::Concurrency,
        }
    }

    /// Whether the user can simply try the same operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rpc { reverted, .. } => !reverted,
            Self::ContractUnreachable { .. } | Self::AlreadyInProgress { .. } => true,
            _ => false,
        }
    }

    /// Text suitable for the UI. Never claims failure for a pending outcome.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { reason, .. } => format!("Invalid input: {reason}."),
            Self::ContractUnreachable { .. } => {
                "The escrow contract cannot be reached. Check your connection and try again.".into()
            }
            Self::ConfirmationTimeout { hash, .. } => {
                format!("Transaction {hash} is still pending. Check again later.")
            }
            Self::Rpc { reverted: true, .. } => {
                "The escrow contract rejected the transaction.".into()
            }
            Self::Rpc { .. } => "The network rejected the request. Please try again.".into(),
            Self::Encoding { .. } => "This operation is not supported by the escrow contract.".into(),
            Self::RecordNotFound { hash, .. } => match hash {
                Some(hash) => format!(
                    "Transaction {hash} was sent, but no matching escrow was found in local history."
                ),
                None => "No matching escrow was found in local history.".into(),
            },
            Self::AlreadyInProgress { .. } => {
                "This operation is already in progress. Wait for it to finish.".into()
            }
            Self::Storage { hash, .. } => match hash {
                Some(hash) => format!(
                    "Transaction {hash} succeeded, but local history could not be saved."
                ),
                None => "Local history could not be read.".into(),
            },
            Self::Cancelled { hash: Some(hash), .. } => {
                format!("Stopped watching transaction {hash}. It may still confirm.")
            }
            Self::Cancelled { hash: None, .. } => "Operation cancelled.".into(),
        }
    }
}

/// Internal failure captured inside an operation, before normalization.
#[derive(Debug)]
pub(crate) enum Failure {
    Invalid(ValidationReason),
    Unreachable(ChainError),
    Chain { hash: Option<String>, source: ChainError },
    Wallet(WalletClientError),
    Confirm(ConfirmError),
    Reverted { hash: String },
    Busy(String),
    MissingRecord {
        lookup: String,
        hash: Option<String>,
        receipt: Option<TransactionReceipt>,
        source: StoreError,
    },
    Store { hash: Option<String>, source: StoreError },
    Cancelled { hash: Option<String> },
}

impl From<ValidationReason> for Failure {
    fn from(reason: ValidationReason) -> Self {
        Failure::Invalid(reason)
    }
}

impl From<WalletClientError> for Failure {
    fn from(e: WalletClientError) -> Self {
        Failure::Wallet(e)
    }
}

impl From<ConfirmError> for Failure {
    fn from(e: ConfirmError) -> Self {
        Failure::Confirm(e)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("transaction {hash} reverted")]
struct Reverted {
    hash: String,
}

/// Map an internal failure to its single normalized kind.
pub(crate) fn normalize(op: EscrowOp, failure: Failure) -> EscrowError {
    match failure {
        Failure::Invalid(reason) => EscrowError::Validation { op, reason },
        Failure::Unreachable(source) => EscrowError::ContractUnreachable { op, source },
        Failure::Chain { hash, source } => chain_error(op, hash, source),
        Failure::Wallet(WalletClientError::Chain(source)) => chain_error(op, None, source),
        Failure::Wallet(e) => EscrowError::Rpc {
            op,
            hash: None,
            reverted: false,
            source: Box::new(e),
        },
        Failure::Confirm(e) => match e {
            ConfirmError::Timeout { hash, .. } => EscrowError::ConfirmationTimeout {
                op,
                hash: hash.to_string(),
                source: e,
            },
            ConfirmError::Cancelled { hash } => EscrowError::Cancelled {
                op,
                hash: Some(hash.to_string()),
            },
            ConfirmError::Rpc { hash, .. } => EscrowError::Rpc {
                op,
                hash: Some(hash.to_string()),
                reverted: false,
                source: Box::new(e),
            },
        },
        Failure::Reverted { hash } => EscrowError::Rpc {
            op,
            hash: Some(hash.clone()),
            reverted: true,
            source: Box::new(Reverted { hash }),
        },
        Failure::Busy(key) => EscrowError::AlreadyInProgress { op, key },
        Failure::MissingRecord {
            lookup,
            hash,
            receipt,
            source,
        } => EscrowError::RecordNotFound {
            op,
            lookup,
            hash,
            receipt: receipt.map(Box::new),
            source,
        },
        Failure::Store { hash, source } => EscrowError::Storage { op, hash, source },
        Failure::Cancelled { hash } => EscrowError::Cancelled { op, hash },
    }
}

fn chain_error(op: EscrowOp, hash: Option<String>, source: ChainError) -> EscrowError {
    match source {
        ChainError::Encoding(_) => EscrowError::Encoding { op, source },
        ChainError::Amount(AmountError::ExcessPrecision { digits, max }) => EscrowError::Validation {
            op,
            reason: ValidationReason::ExcessPrecision { digits, max },
        },
        ChainError::Amount(e) => EscrowError::Validation {
            op,
            reason: ValidationReason::InvalidAmount(e),
        },
        ChainError::Address(e) => EscrowError::Validation {
            op,
            reason: ValidationReason::InvalidAddress {
                field: "contract",
                source: e,
            },
        },
        ChainError::NoContractCode(_) => EscrowError::ContractUnreachable { op, source },
        other => EscrowError::Rpc {
            op,
            hash,
            // Gas estimation runs the call, so a doomed claim fails before broadcast.
            reverted: other.is_revert(),
            source: Box::new(other),
        },
    }
}
