use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of an escrow. `Claimed` and `Refunded` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    Pending,
    Claimed,
    Refunded,
}

impl EscrowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EscrowStatus::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            EscrowStatus::Pending => "PENDING",
            EscrowStatus::Claimed => "CLAIMED",
            EscrowStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a record's `id` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdSource {
    /// Parsed from the `EscrowCreated` event.
    #[default]
    #[serde(rename = "onchain")]
    OnChain,
    /// Local placeholder (creation time in ms); the real id is unknown.
    Fallback,
}

/// Operation that produced a record row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    #[default]
    Create,
}

/// One locally tracked escrow, as persisted per owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowTransaction {
    pub id: String,
    #[serde(default)]
    pub id_source: IdSource,
    /// Creation transaction hash.
    pub hash: String,
    pub sender: String,
    pub receiver: String,
    /// Decimal amount in native currency, exactly as requested.
    pub amount: String,
    pub status: EscrowStatus,
    /// Creation time, ms since the Unix epoch.
    pub timestamp: i64,
    pub blockchain: String,
    pub network: String,
    pub gas_used: String,
    pub block_number: String,
    #[serde(rename = "type", default)]
    pub kind: TransactionKind,
    pub wallet_type: String,
    /// Hash of the claim or refund that closed the escrow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl EscrowTransaction {
    pub fn is_partial(&self) -> bool {
        self.id_source == IdSource::Fallback
    }
}
