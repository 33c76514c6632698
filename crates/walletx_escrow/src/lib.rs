//! Escrow lifecycle for WalletX: create, claim and refund on the WalletX
//! escrow contract, with a per-owner local history of created escrows.

pub mod error;
pub mod guard;
pub mod record;
pub mod record_store;
pub mod service;
pub mod wallet_client;

pub use error::{ErrorCategory, EscrowError, EscrowOp, ValidationReason};
pub use guard::{InFlight, InFlightSlot};
pub use record::{EscrowStatus, EscrowTransaction, IdSource, TransactionKind};
pub use record_store::{EscrowRecordStore, RecordKey, StatusUpdate, StoreError};
pub use service::{
    CreateEscrowRequest, CreateOutcome, EscrowService, ReconcileOutcome, SettleEscrowRequest,
    SettleOutcome,
};
pub use wallet_client::{
    PreparedTransaction, RpcWalletClient, SentTransaction, TxEnvelope, WalletClient,
    WalletClientError,
};
