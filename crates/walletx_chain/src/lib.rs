//! EVM plumbing for WalletX: the escrow contract ABI, exact unit conversion,
//! a JSON-RPC client, bounded retry, and receipt confirmation.

pub mod abi;
pub mod cancel;
pub mod confirm;
pub mod error;
pub mod retry;
pub mod rpc;
pub mod types;
pub mod units;

pub use abi::{
    CallArg, ContractCall, ESCROW_CREATED_TOPIC, EscrowCall, EscrowFunction, encode_call,
    encode_named, find_escrow_created, parse_escrow_id,
};
pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use confirm::{ConfirmError, ConfirmationWaiter};
pub use error::ChainError;
pub use retry::{RetryError, RetryPolicy, retry};
pub use rpc::{ChainRpc, HttpRpcClient, TransactionRequest, check_contract_reachable};
pub use types::{Log, TransactionReceipt};
pub use units::{AddressError, AmountError, format_units, parse_address, parse_units};

// Re-export the primitives that appear in the public API.
pub use alloy_primitives::{Address, B256, Bytes, U256};
