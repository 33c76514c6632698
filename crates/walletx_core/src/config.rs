use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Environment override for the Push Chain testnet RPC endpoint.
pub const ENV_TESTNET_RPC_URL: &str = "WALLETX_PUSHCHAIN_TESTNET_RPC_URL";
/// Environment override for the deployed escrow contract address.
pub const ENV_ESCROW_CONTRACT: &str = "WALLETX_ESCROW_CONTRACT";

pub const DEFAULT_BLOCKCHAIN: &str = "pushchain";
pub const DEFAULT_NETWORK: &str = "testnet";

const PUSHCHAIN_TESTNET_RPC: &str = "https://evm.rpc-testnet-donut-node1.push.org";
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Networks
// ---------------------------------------------------------------------------

/// Everything needed to talk to one (blockchain, network) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub blockchain: String,
    pub network: String,
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub explorer_url: String,
    pub faucet_url: Option<String>,
    /// Native currency ticker.
    pub symbol: String,
    /// Native currency decimals (18 for every EVM chain in practice).
    pub decimals: u8,
    /// Deployed escrow contract, if one is known for this network.
    pub escrow_contract: Option<String>,
    #[serde(default)]
    pub is_custom_rpc: bool,
}

impl NetworkConfig {
    fn pushchain_testnet() -> Self {
        Self {
            blockchain: DEFAULT_BLOCKCHAIN.into(),
            network: DEFAULT_NETWORK.into(),
            name: "Push Chain Donut Testnet".into(),
            chain_id: 42101,
            rpc_url: PUSHCHAIN_TESTNET_RPC.into(),
            explorer_url: "https://donut.push.network".into(),
            faucet_url: Some("https://faucet.push.org".into()),
            symbol: "PC".into(),
            decimals: 18,
            escrow_contract: None,
            is_custom_rpc: false,
        }
    }

    /// Link to a transaction on the network's block explorer.
    pub fn explorer_tx_url(&self, hash: &str) -> String {
        format!("{}/tx/{hash}", self.explorer_url.trim_end_matches('/'))
    }

    /// Link to an address on the network's block explorer.
    pub fn explorer_address_url(&self, address: &str) -> String {
        format!("{}/address/{address}", self.explorer_url.trim_end_matches('/'))
    }
}

fn registry_key(blockchain: &str, network: &str) -> String {
    format!("{blockchain}/{network}")
}

/// Built-in network table with per-network RPC overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRegistry {
    networks: BTreeMap<String, NetworkConfig>,
}

impl NetworkRegistry {
    pub fn with_defaults() -> Self {
        let mut networks = BTreeMap::new();
        let testnet = NetworkConfig::pushchain_testnet();
        networks.insert(registry_key(&testnet.blockchain, &testnet.network), testnet);
        Self { networks }
    }

    pub fn get(&self, blockchain: &str, network: &str) -> Option<&NetworkConfig> {
        self.networks.get(&registry_key(blockchain, network))
    }

    pub fn get_mut(&mut self, blockchain: &str, network: &str) -> Option<&mut NetworkConfig> {
        self.networks.get_mut(&registry_key(blockchain, network))
    }

    pub fn is_supported(&self, blockchain: &str, network: &str) -> bool {
        self.get(blockchain, network).is_some()
    }

    /// Distinct blockchain identifiers, sorted.
    pub fn blockchains(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.networks.values().map(|n| n.blockchain.as_str()).collect();
        ids.dedup();
        ids
    }

    /// Add or replace a network entry.
    pub fn insert(&mut self, config: NetworkConfig) {
        self.networks
            .insert(registry_key(&config.blockchain, &config.network), config);
    }

    /// Override the RPC URL for a network with a custom endpoint.
    pub fn set_custom_rpc(&mut self, blockchain: &str, network: &str, url: &str) -> Result<()> {
        if !validate_url(url) {
            anyhow::bail!("invalid RPC URL: {url}");
        }
        let entry = self
            .get_mut(blockchain, network)
            .with_context(|| format!("unknown network {blockchain}/{network}"))?;
        entry.rpc_url = url.to_string();
        entry.is_custom_rpc = true;
        Ok(())
    }

    /// Reset a network's RPC URL back to the built-in default.
    pub fn reset_to_default(&mut self, blockchain: &str, network: &str) {
        let defaults = Self::with_defaults();
        let Some(default_config) = defaults.get(blockchain, network) else {
            return;
        };
        if let Some(entry) = self.get_mut(blockchain, network) {
            entry.rpc_url = default_config.rpc_url.clone();
            entry.is_custom_rpc = false;
        }
    }
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Validate that a URL is well-formed and uses HTTP or HTTPS.
pub fn validate_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            (scheme == "http" || scheme == "https") && parsed.host().is_some()
        }
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Retry settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// Serialized form of a bounded retry schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff: Backoff,
    pub max_delay_ms: u64,
    pub max_total_wait_ms: u64,
}

impl RetrySettings {
    /// Receipt polling: roughly two minutes with doubling delays.
    pub fn confirmation_default() -> Self {
        Self {
            max_attempts: 24,
            delay_ms: 1_000,
            backoff: Backoff::Exponential,
            max_delay_ms: 8_000,
            max_total_wait_ms: 120_000,
        }
    }

    pub fn reachability_default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1_000,
            backoff: Backoff::Fixed,
            max_delay_ms: 1_000,
            max_total_wait_ms: 5_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletxConfig {
    pub default_blockchain: String,
    pub default_network: String,
    pub networks: NetworkRegistry,
    pub confirmation_retry: RetrySettings,
    pub reachability_retry: RetrySettings,
    pub rpc_timeout_secs: u64,
    /// Ask the wallet client for fee-sponsored transactions.
    pub gasless: bool,
    pub log_level: String,
}

impl Default for WalletxConfig {
    fn default() -> Self {
        Self {
            default_blockchain: DEFAULT_BLOCKCHAIN.into(),
            default_network: DEFAULT_NETWORK.into(),
            networks: NetworkRegistry::with_defaults(),
            confirmation_retry: RetrySettings::confirmation_default(),
            reachability_retry: RetrySettings::reachability_default(),
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            gasless: true,
            log_level: "info".into(),
        }
    }
}

impl WalletxConfig {
    /// Returns the base directory: `~/.walletx/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".walletx"))
    }

    /// Returns the config file path: `~/.walletx/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.walletx/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Returns the local storage file: `~/.walletx/storage.json`
    pub fn storage_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("storage.json"))
    }

    /// Loads config from disk (creating a default file if missing) and
    /// applies environment overrides.
    pub fn load() -> Result<Self> {
        let base = Self::base_dir()?;
        std::fs::create_dir_all(&base)
            .with_context(|| format!("Failed to create directory: {}", base.display()))?;
        let mut config = Self::load_from_path(&Self::config_path()?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a specific file path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: Self =
                serde_json::from_str(&content).with_context(|| "Failed to parse config.json")?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to_path(path)?;
            info!("Created default config at {}", path.display());
            Ok(config)
        }
    }

    /// Save config to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Apply `WALLETX_*` environment overrides to the default network.
    pub fn apply_env_overrides(&mut self) {
        let rpc = std::env::var(ENV_TESTNET_RPC_URL).ok();
        let contract = std::env::var(ENV_ESCROW_CONTRACT).ok();
        self.apply_overrides(rpc.as_deref(), contract.as_deref());
    }

    fn apply_overrides(&mut self, rpc_url: Option<&str>, contract: Option<&str>) {
        if let Some(url) = rpc_url.filter(|u| !u.is_empty()) {
            if let Err(e) = self
                .networks
                .set_custom_rpc(DEFAULT_BLOCKCHAIN, DEFAULT_NETWORK, url)
            {
                warn!("Ignoring {ENV_TESTNET_RPC_URL}: {e}");
            }
        }
        if let Some(address) = contract.filter(|a| !a.is_empty()) {
            if let Some(net) = self.networks.get_mut(DEFAULT_BLOCKCHAIN, DEFAULT_NETWORK) {
                net.escrow_contract = Some(address.to_string());
            }
        }
    }

    /// The network selected by default.
    pub fn default_network_config(&self) -> Option<&NetworkConfig> {
        self.networks
            .get(&self.default_blockchain, &self.default_network)
    }
}
