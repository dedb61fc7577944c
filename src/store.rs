//! Persisted per-module configuration.
//!
//! The runtime reads a module's [`StoredModule`] right after `on_load` and
//! writes it back whenever the enabled flag, a wire name or a setting
//! changes. Two stores are provided:
//!
//! - [`MemoryStore`]: process-local, seeded from configuration overrides
//! - [`JsonFileStore`]: one `<module id>.json` file per module

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::HostResult;
use crate::module::SettingValue;

/// What the store keeps for one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredModule {
    /// Enabled flag; `None` leaves the runtime default in place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Custom wire names by logical parameter key.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
    /// Setting values by setting key.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub settings: HashMap<String, SettingValue>,
}

/// Backing storage for module configuration.
pub trait SettingsStore: Send + Sync {
    /// Stored configuration for `module_id`, if any.
    fn load(&self, module_id: &str) -> Option<StoredModule>;

    /// Replace the stored configuration for `module_id`.
    fn save(&self, module_id: &str, module: &StoredModule) -> HostResult<()>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredModule>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `entries`.
    pub fn seeded(entries: HashMap<String, StoredModule>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self, module_id: &str) -> Option<StoredModule> {
        self.entries.lock().get(module_id).cloned()
    }

    fn save(&self, module_id: &str, module: &StoredModule) -> HostResult<()> {
        self.entries
            .lock()
            .insert(module_id.to_string(), module.clone());
        Ok(())
    }
}

/// Store writing pretty-printed JSON files into a directory.
///
/// Entries without a file fall back to the seed map.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    seed: HashMap<String, StoredModule>,
}

impl JsonFileStore {
    /// Store rooted at `dir`, created if missing.
    pub fn open(dir: impl AsRef<Path>) -> HostResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            seed: HashMap::new(),
        })
    }

    /// Fallback entries for modules that have never been saved.
    pub fn with_seed(mut self, seed: HashMap<String, StoredModule>) -> Self {
        self.seed = seed;
        self
    }

    fn path_for(&self, module_id: &str) -> PathBuf {
        self.dir.join(format!("{module_id}.json"))
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self, module_id: &str) -> Option<StoredModule> {
        let path = self.path_for(module_id);
        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(stored) => Some(stored),
                Err(e) => {
                    warn!("Ignoring unreadable module config {:?}: {}", path, e);
                    self.seed.get(module_id).cloned()
                }
            },
            Err(_) => self.seed.get(module_id).cloned(),
        }
    }

    fn save(&self, module_id: &str, module: &StoredModule) -> HostResult<()> {
        let path = self.path_for(module_id);
        let raw = serde_json::to_string_pretty(module).map_err(std::io::Error::other)?;
        fs::write(&path, raw)?;
        debug!("Saved module config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StoredModule {
        StoredModule {
            enabled: Some(true),
            parameters: HashMap::from([("Toggle".to_string(), "sw/*".to_string())]),
            settings: HashMap::from([("Speed".to_string(), SettingValue::Int(3))]),
        }
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load("local.a").is_none());
        store.save("local.a", &sample()).unwrap();
        assert_eq!(store.load("local.a"), Some(sample()));
    }

    #[test]
    fn test_json_store_prefers_file_over_seed() {
        let dir = tempfile::tempdir().unwrap();
        let seed = HashMap::from([(
            "local.a".to_string(),
            StoredModule {
                enabled: Some(false),
                ..Default::default()
            },
        )]);
        let store = JsonFileStore::open(dir.path().join("config"))
            .unwrap()
            .with_seed(seed);

        assert_eq!(store.load("local.a").unwrap().enabled, Some(false));

        store.save("local.a", &sample()).unwrap();
        assert_eq!(store.load("local.a"), Some(sample()));
        assert!(dir.path().join("config/local.a.json").exists());
    }

    #[test]
    fn test_json_store_ignores_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("local.a.json"), "{ not json").unwrap();
        assert!(store.load("local.a").is_none());
    }
}
