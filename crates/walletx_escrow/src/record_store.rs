//! Per-owner escrow history on top of the key-value storage collaborator.
//!
//! This module is the only writer of escrow rows and the only place storage
//! keys are composed. Rows are grouped by (blockchain, network, owner) and
//! stored as one JSON array per group.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use walletx_core::{CoreError, KeyValueStore};

use crate::record::{EscrowStatus, EscrowTransaction, IdSource};

const KEY_PREFIX: &str = "walletx_escrows";

/// Identifies one owner's record list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    blockchain: String,
    network: String,
    owner: String,
}

impl RecordKey {
    /// Owner addresses compare case-insensitively.
    pub fn new(blockchain: &str, network: &str, owner: &str) -> Self {
        Self {
            blockchain: blockchain.to_string(),
            network: network.to_string(),
            owner: owner.trim().to_ascii_lowercase(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn storage_key(&self) -> String {
        format!(
            "{KEY_PREFIX}_{}_{}_{}",
            self.blockchain, self.network, self.owner
        )
    }
}

/// Result of a status update that found its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    Applied,
    /// The row was already terminal and was left untouched.
    AlreadyFinal(EscrowStatus),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no escrow record matches {0}")]
    NotFound(String),

    #[error("an escrow record for transaction {0} already exists")]
    Duplicate(String),

    #[error("cannot move an escrow to {0}")]
    InvalidTransition(EscrowStatus),

    #[error("stored escrow list under {key} is unreadable: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Backend(#[from] CoreError),
}

/// Typed access to escrow rows.
#[derive(Clone)]
pub struct EscrowRecordStore {
    kv: Arc<dyn KeyValueStore>,
}

impl EscrowRecordStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// All rows for `key`, oldest first. A missing list is empty.
    pub fn list(&self, key: &RecordKey) -> Result<Vec<EscrowTransaction>, StoreError> {
        let storage_key = key.storage_key();
        match self.kv.get(&storage_key)? {
            None => Ok(Vec::new()),
            Some(json) => serde_json::from_str(&json).map_err(|source| StoreError::Corrupt {
                key: storage_key,
                source,
            }),
        }
    }

    pub fn find(&self, key: &RecordKey, id: &str) -> Result<Option<EscrowTransaction>, StoreError> {
        Ok(self.list(key)?.into_iter().find(|r| r.id == id))
    }

    pub fn list_by_status(
        &self,
        key: &RecordKey,
        status: EscrowStatus,
    ) -> Result<Vec<EscrowTransaction>, StoreError> {
        let mut rows = self.list(key)?;
        rows.retain(|r| r.status == status);
        Ok(rows)
    }

    /// Append a new row. Each creation hash may appear once.
    pub fn append(&self, key: &RecordKey, record: EscrowTransaction) -> Result<(), StoreError> {
        let mut rows = self.list(key)?;
        if rows.iter().any(|r| r.hash == record.hash) {
            return Err(StoreError::Duplicate(record.hash));
        }
        info!(
            owner = %key.owner(),
            escrow_id = %record.id,
            hash = %record.hash,
            "escrow record appended"
        );
        rows.push(record);
        self.write(key, &rows)
    }

    /// Close the escrow `id` with `status`, recording the settling `hash`.
    ///
    /// Only `PENDING` rows move. A terminal row is never rewritten, so a
    /// repeated claim cannot knock a `CLAIMED` row back or over to `REFUNDED`.
    /// Rows still carrying a fallback id are skipped: that id is a creation
    /// timestamp, not something the contract can settle, and two partial
    /// creates in the same millisecond share it.
    pub fn update_status(
        &self,
        key: &RecordKey,
        id: &str,
        status: EscrowStatus,
        hash: &str,
    ) -> Result<StatusUpdate, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidTransition(status));
        }

        let mut rows = self.list(key)?;
        let row = rows
            .iter_mut()
            .find(|r| r.id == id && r.id_source == IdSource::OnChain)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if row.status.is_terminal() {
            warn!(escrow_id = %id, current = %row.status, requested = %status, "escrow already settled");
            return Ok(StatusUpdate::AlreadyFinal(row.status));
        }

        row.status = status;
        row.settlement_hash = Some(hash.to_string());
        row.updated_at = Some(Utc::now().timestamp_millis());
        self.write(key, &rows)?;
        info!(escrow_id = %id, status = %status, hash = %hash, "escrow status updated");
        Ok(StatusUpdate::Applied)
    }

    /// Swap a fallback id for the on-chain one on the row created by
    /// `creation_hash`. Returns `false` if the row already had an on-chain id.
    pub fn replace_fallback_id(
        &self,
        key: &RecordKey,
        creation_hash: &str,
        onchain_id: &str,
    ) -> Result<bool, StoreError> {
        let mut rows = self.list(key)?;
        let row = rows
            .iter_mut()
            .find(|r| r.hash.eq_ignore_ascii_case(creation_hash))
            .ok_or_else(|| StoreError::NotFound(creation_hash.to_string()))?;

        if row.id_source == IdSource::OnChain {
            if row.id != onchain_id {
                warn!(
                    hash = %creation_hash,
                    stored = %row.id,
                    found = %onchain_id,
                    "on-chain escrow id disagrees with stored id, keeping stored"
                );
            }
            return Ok(false);
        }

        debug!(hash = %creation_hash, fallback = %row.id, escrow_id = %onchain_id, "fallback id replaced");
        row.id = onchain_id.to_string();
        row.id_source = IdSource::OnChain;
        self.write(key, &rows)?;
        Ok(true)
    }

    /// Drop every row for `key`.
    pub fn clear(&self, key: &RecordKey) -> Result<(), StoreError> {
        self.kv.remove(&key.storage_key())?;
        Ok(())
    }

    fn write(&self, key: &RecordKey, rows: &[EscrowTransaction]) -> Result<(), StoreError> {
        let json = serde_json::to_string(rows).map_err(CoreError::from)?;
        self.kv.set(&key.storage_key(), &json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TransactionKind;
    use walletx_core::MemoryStore;

    const SENDER: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595f2bD18";

    fn store() -> (Arc<MemoryStore>, EscrowRecordStore) {
        let kv = Arc::new(MemoryStore::new());
        (kv.clone(), EscrowRecordStore::new(kv))
    }

    fn key() -> RecordKey {
        RecordKey::new("pushchain", "testnet", SENDER)
    }

    fn row(id: &str, hash: &str) -> EscrowTransaction {
        EscrowTransaction {
            id: id.into(),
            id_source: IdSource::OnChain,
            hash: hash.into(),
            sender: SENDER.into(),
            receiver: "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".into(),
            amount: "1.5".into(),
            status: EscrowStatus::Pending,
            timestamp: 1_700_000_000_000,
            blockchain: "pushchain".into(),
            network: "testnet".into(),
            gas_used: "52000".into(),
            block_number: "100".into(),
            kind: TransactionKind::Create,
            wallet_type: "pushchain-ui".into(),
            settlement_hash: None,
            updated_at: None,
        }
    }

    #[test]
    fn key_is_case_insensitive_in_owner() {
        let upper = RecordKey::new("pushchain", "testnet", SENDER);
        let lower = RecordKey::new("pushchain", "testnet", &SENDER.to_lowercase());
        assert_eq!(upper.storage_key(), lower.storage_key());
        assert_eq!(
            upper.storage_key(),
            "walletx_escrows_pushchain_testnet_0x742d35cc6634c0532925a3b844bc9e7595f2bd18"
        );
    }

    #[test]
    fn missing_list_is_empty() {
        let (_, store) = store();
        assert!(store.list(&key()).unwrap().is_empty());
    }

    #[test]
    fn append_and_find() {
        let (_, store) = store();
        store.append(&key(), row("1", "0xa")).unwrap();
        store.append(&key(), row("2", "0xb")).unwrap();

        let rows = store.list(&key()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "1");
        assert_eq!(store.find(&key(), "2").unwrap().unwrap().hash, "0xb");
        assert!(store.find(&key(), "3").unwrap().is_none());
    }

    #[test]
    fn append_rejects_duplicate_hash() {
        let (_, store) = store();
        store.append(&key(), row("1", "0xa")).unwrap();
        assert!(matches!(
            store.append(&key(), row("9", "0xa")),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn owners_are_isolated() {
        let (_, store) = store();
        store.append(&key(), row("1", "0xa")).unwrap();
        let other = RecordKey::new("pushchain", "testnet", "0x70997970c51812dc3a010c7d01b50e0d17dc79c8");
        assert!(store.list(&other).unwrap().is_empty());
    }

    #[test]
    fn update_status_closes_pending_row() {
        let (_, store) = store();
        store.append(&key(), row("42", "0xa")).unwrap();

        let update = store
            .update_status(&key(), "42", EscrowStatus::Claimed, "0xclaim")
            .unwrap();
        assert_eq!(update, StatusUpdate::Applied);

        let stored = store.find(&key(), "42").unwrap().unwrap();
        assert_eq!(stored.status, EscrowStatus::Claimed);
        assert_eq!(stored.settlement_hash.as_deref(), Some("0xclaim"));
        assert_eq!(stored.hash, "0xa");
        assert!(stored.updated_at.is_some());
    }

    #[test]
    fn terminal_rows_never_move() {
        let (_, store) = store();
        store.append(&key(), row("42", "0xa")).unwrap();
        store
            .update_status(&key(), "42", EscrowStatus::Claimed, "0xclaim")
            .unwrap();

        let again = store
            .update_status(&key(), "42", EscrowStatus::Refunded, "0xrefund")
            .unwrap();
        assert_eq!(again, StatusUpdate::AlreadyFinal(EscrowStatus::Claimed));

        let stored = store.find(&key(), "42").unwrap().unwrap();
        assert_eq!(stored.status, EscrowStatus::Claimed);
        assert_eq!(stored.settlement_hash.as_deref(), Some("0xclaim"));
    }

    #[test]
    fn update_to_pending_is_rejected() {
        let (_, store) = store();
        store.append(&key(), row("42", "0xa")).unwrap();
        assert!(matches!(
            store.update_status(&key(), "42", EscrowStatus::Pending, "0x"),
            Err(StoreError::InvalidTransition(EscrowStatus::Pending))
        ));
    }

    #[test]
    fn update_missing_row_is_not_found() {
        let (_, store) = store();
        assert!(matches!(
            store.update_status(&key(), "42", EscrowStatus::Claimed, "0x"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn update_skips_fallback_rows() {
        let (_, store) = store();
        for hash in ["0x01", "0x02"] {
            let mut partial = row("1700000000000", hash);
            partial.id_source = IdSource::Fallback;
            store.append(&key(), partial).unwrap();
        }

        assert!(matches!(
            store.update_status(&key(), "1700000000000", EscrowStatus::Claimed, "0xdef"),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(
            store.list_by_status(&key(), EscrowStatus::Pending).unwrap().len(),
            2
        );

        // Once reconciled, the row is settled by its real id.
        assert!(store.replace_fallback_id(&key(), "0x02", "7").unwrap());
        assert_eq!(
            store.update_status(&key(), "7", EscrowStatus::Claimed, "0xdef").unwrap(),
            StatusUpdate::Applied
        );
        let rows = store.list(&key()).unwrap();
        assert_eq!(rows[0].status, EscrowStatus::Pending);
        assert_eq!(rows[1].status, EscrowStatus::Claimed);
    }

    #[test]
    fn fallback_id_is_replaced_once() {
        let (_, store) = store();
        let mut partial = row("1700000000000", "0xAbC");
        partial.id_source = IdSource::Fallback;
        store.append(&key(), partial).unwrap();

        assert!(store.replace_fallback_id(&key(), "0xabc", "7").unwrap());
        let stored = store.find(&key(), "7").unwrap().unwrap();
        assert_eq!(stored.id_source, IdSource::OnChain);
        assert!(store.find(&key(), "1700000000000").unwrap().is_none());

        assert!(!store.replace_fallback_id(&key(), "0xabc", "8").unwrap());
        assert!(store.find(&key(), "7").unwrap().is_some());
    }

    #[test]
    fn corrupt_list_is_reported() {
        let (kv, store) = store();
        kv.set(&key().storage_key(), "not json").unwrap();
        assert!(matches!(store.list(&key()), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn list_by_status_filters() {
        let (_, store) = store();
        store.append(&key(), row("1", "0xa")).unwrap();
        store.append(&key(), row("2", "0xb")).unwrap();
        store
            .update_status(&key(), "2", EscrowStatus::Refunded, "0xr")
            .unwrap();

        let pending = store.list_by_status(&key(), EscrowStatus::Pending).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "1");
    }

    #[test]
    fn clear_removes_everything() {
        let (kv, store) = store();
        store.append(&key(), row("1", "0xa")).unwrap();
        store.clear(&key()).unwrap();
        assert!(store.list(&key()).unwrap().is_empty());
        assert!(kv.is_empty());
    }
}
