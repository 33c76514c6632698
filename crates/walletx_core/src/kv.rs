//! String-keyed persistent storage.
//!
//! The escrow record store and the wallet-type preference both sit on top of
//! [`KeyValueStore`]. Two backends ship here: [`MemoryStore`] for in-process
//! use and tests, and [`FileStore`], a single JSON map on disk that survives
//! restarts the same way browser local storage survives a page reload.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::CoreError;

/// Minimal get/set/remove storage capability.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError>;

    fn remove(&self, key: &str) -> Result<(), CoreError>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Volatile store backed by a map. Cheap to construct; contents vanish on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// Durable store persisted as one pretty-printed JSON object.
///
/// The whole map is held in memory and rewritten on every mutation through a
/// temporary file followed by a rename, so a crash mid-write leaves the
/// previous contents intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let entries = if path.exists() {
            let json = std::fs::read_to_string(&path)?;
            let map: BTreeMap<String, String> = serde_json::from_str(&json)?;
            info!(path = %path.display(), count = map.len(), "key-value store loaded");
            map
        } else {
            info!(path = %path.display(), "key-value store file not found, starting empty");
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;

        // Owner-only (0o600 = rw-------); records include wallet addresses.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            {
                warn!(path = %tmp.display(), "failed to restrict store permissions: {e}");
            }
        }

        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), count = entries.len(), "key-value store flushed");
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        let mut entries = self.entries.lock();
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&entries) {
            // Keep memory consistent with what is on disk.
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        let mut entries = self.entries.lock();
        if let Some(old) = entries.remove(key) {
            if let Err(e) = self.flush(&entries) {
                entries.insert(key.to_string(), old);
                return Err(e);
            }
        }
        Ok(())
    }
}
