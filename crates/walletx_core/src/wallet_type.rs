//! Which wallet technology the user picked on the selection screen.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::kv::KeyValueStore;

const SELECTED_WALLET_TYPE_KEY: &str = "selected_wallet_type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletType {
    /// BIP-39/BIP-44 HD wallet with locally held keys.
    #[serde(rename = "bip")]
    Bip,
    /// Push Chain UI kit universal account (UEA).
    #[serde(rename = "pushchain-ui")]
    PushChainUi,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Bip => "bip",
            WalletType::PushChainUi => "pushchain-ui",
        }
    }
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bip" => Ok(WalletType::Bip),
            // Older builds stored the SDK flavour under this name.
            "pushchain-ui" | "pushchain-sdk" => Ok(WalletType::PushChainUi),
            other => Err(CoreError::Config(format!("unknown wallet type: {other}"))),
        }
    }
}

/// Persisted wallet-type selection.
#[derive(Clone)]
pub struct WalletTypePreference {
    store: Arc<dyn KeyValueStore>,
}

impl WalletTypePreference {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The stored selection. Unknown values are treated as no selection.
    pub fn selected(&self) -> Result<Option<WalletType>, CoreError> {
        let Some(raw) = self.store.get(SELECTED_WALLET_TYPE_KEY)? else {
            return Ok(None);
        };
        match raw.parse() {
            Ok(wallet_type) => Ok(Some(wallet_type)),
            Err(e) => {
                warn!("ignoring stored wallet type: {e}");
                Ok(None)
            }
        }
    }

    pub fn select(&self, wallet_type: WalletType) -> Result<(), CoreError> {
        debug!(wallet_type = %wallet_type, "wallet type selected");
        self.store.set(SELECTED_WALLET_TYPE_KEY, wallet_type.as_str())
    }

    pub fn clear(&self) -> Result<(), CoreError> {
        self.store.remove(SELECTED_WALLET_TYPE_KEY)
    }
}
