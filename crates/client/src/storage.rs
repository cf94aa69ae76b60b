//! Persistent key/value storage for the local session cache.
//!
//! Two backends:
//! - [`FileStore`]: one JSON file per key in a directory, by default the
//!   platform-appropriate config directory:
//!   - Linux: `~/.config/changa/`
//!   - macOS: `~/Library/Application Support/changa/`
//!   - Windows: `%APPDATA%\changa\`
//! - [`MemoryStore`]: process-local, used by tests and ephemeral sessions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};

/// Raw string storage keyed by well-known names.
pub trait KeyValueStore: Send + Sync {
    fn load_raw(&self, key: &str) -> Option<String>;

    /// Returns `true` if the value was written.
    fn save_raw(&self, key: &str, value: &str) -> bool;

    fn remove_raw(&self, key: &str);
}

/// Save a value to persistent storage.
///
/// Returns `true` if the operation succeeded.
pub fn save<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => store.save_raw(key, &json),
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to serialize stored value");
            false
        }
    }
}

/// Load a value from persistent storage.
///
/// Returns `None` if the key doesn't exist or deserialization fails.
pub fn load<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let json = store.load_raw(key)?;
    match serde_json::from_str(&json) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, error = %e, "discarding unreadable stored value");
            None
        }
    }
}

// =========================================
// File-backed store
// =========================================

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under `<config dir>/changa`, or `None` if the platform has no config dir.
    pub fn in_config_dir() -> Option<Self> {
        Some(Self::new(dirs::config_dir()?.join("changa")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{safe_key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn load_raw(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.file_path(key)).ok()
    }

    fn save_raw(&self, key: &str, value: &str) -> bool {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), error = %e, "cannot create storage dir");
            return false;
        }
        match std::fs::write(self.file_path(key), value) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to write stored value");
                false
            }
        }
    }

    fn remove_raw(&self, key: &str) {
        let path = self.file_path(key);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(key, error = %e, "failed to remove stored value");
            }
        }
    }
}

// =========================================
// In-memory store
// =========================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load_raw(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    fn save_raw(&self, key: &str, value: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        true
    }

    fn remove_raw(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }
}
