//! JSON-RPC wire types for receipts and logs.

use alloy_primitives::{Address, B256, Bytes, U64, U256};
use serde::{Deserialize, Serialize};

/// A log entry emitted by a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_index: Option<U64>,
}

/// The chain's confirmation record for a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<U64>,
    pub gas_used: U256,
    /// `0x1` success, `0x0` reverted. Absent on pre-Byzantium chains.
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub logs: Vec<Log>,
}

impl TransactionReceipt {
    pub fn block_number(&self) -> u64 {
        self.block_number.map(|n| n.to::<u64>()).unwrap_or(0)
    }

    pub fn succeeded(&self) -> bool {
        self.status.is_none_or(|s| !s.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECEIPT_JSON: &str = r#"{
        "transactionHash": "0x8f3c4a1c5e1d0c58b0d2bb4e6e2a8e0cbd7c6f4e1b2a3c4d5e6f708192a3b4c5",
        "blockNumber": "0x1b4",
        "gasUsed": "0x5208",
        "status": "0x1",
        "cumulativeGasUsed": "0x5208",
        "logs": [{
            "address": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "topics": ["0x0000000000000000000000000000000000000000000000000000000000000001"],
            "data": "0x",
            "logIndex": "0x0"
        }]
    }"#;

    #[test]
    fn decodes_node_receipt() {
        let receipt: TransactionReceipt = serde_json::from_str(RECEIPT_JSON).unwrap();
        assert_eq!(receipt.block_number(), 436);
        assert_eq!(receipt.gas_used, U256::from(21_000));
        assert!(receipt.succeeded());
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(receipt.logs[0].topics[0], B256::with_last_byte(1));
    }

    #[test]
    fn reverted_status() {
        let json = RECEIPT_JSON.replace(r#""status": "0x1""#, r#""status": "0x0""#);
        let receipt: TransactionReceipt = serde_json::from_str(&json).unwrap();
        assert!(!receipt.succeeded());
    }

    #[test]
    fn missing_status_counts_as_success() {
        let json = RECEIPT_JSON.replace(r#""status": "0x1","#, "");
        let receipt: TransactionReceipt = serde_json::from_str(&json).unwrap();
        assert!(receipt.status.is_none());
        assert!(receipt.succeeded());
    }
}
