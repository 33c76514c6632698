//! Chain-layer error types.

use alloy_primitives::Address;

use crate::units::{AddressError, AmountError};

/// Errors raised while talking to the chain or preparing calls for it.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The request never produced a JSON-RPC answer (connect, timeout, HTTP status).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The node answered with something we could not decode.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Calldata could not be produced for the requested function.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// No bytecode is deployed at the contract address.
    #[error("No contract code at {0}")]
    NoContractCode(Address),

    #[error(transparent)]
    Amount(#[from] AmountError),

    #[error(transparent)]
    Address(#[from] AddressError),
}

impl ChainError {
    /// Node-reported errors that look like a revert of the call itself.
    pub fn is_revert(&self) -> bool {
        match self {
            ChainError::Rpc { code, message } => {
                *code == 3 || message.to_ascii_lowercase().contains("revert")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_detection() {
        let revert = ChainError::Rpc {
            code: 3,
            message: "execution reverted: not receiver".into(),
        };
        assert!(revert.is_revert());

        let by_message = ChainError::Rpc {
            code: -32000,
            message: "Transaction Reverted".into(),
        };
        assert!(by_message.is_revert());

        let other = ChainError::Rpc {
            code: -32000,
            message: "nonce too low".into(),
        };
        assert!(!other.is_revert());
        assert!(!ChainError::Transport("down".into()).is_revert());
    }
}
