//! Shared plumbing for WalletX: configuration, logging, and the local
//! key-value storage every other crate persists through.

pub mod config;
pub mod error;
pub mod kv;
pub mod logging;
pub mod wallet_type;

pub use config::{
    Backoff, NetworkConfig, NetworkRegistry, RetrySettings, WalletxConfig, validate_url,
};
pub use error::CoreError;
pub use kv::{FileStore, KeyValueStore, MemoryStore};
pub use wallet_type::{WalletType, WalletTypePreference};
