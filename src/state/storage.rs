//! Durable key-value slot backing the session.
//!
//! SYSTEM CONTEXT
//! ==============
//! Only `SessionStore` touches this trait. Keeping every read and write behind
//! the store means no other component can derive identity from raw storage.
//!
//! DESIGN
//! ======
//! `set_all` writes a key set as a unit: either every entry lands or none
//! does. The credential and the user payload are always written together.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage contents unreadable: {0}")]
    Format(String),
}

/// A string key-value slot that survives restarts.
pub trait SessionStorage {
    /// Read one key. `Ok(None)` means the key is absent.
    ///
    /// # Errors
    ///
    /// Fails when the backing medium cannot be read or parsed.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Read several keys from one consistent view of the slot. Absent keys
    /// are left out of the result.
    ///
    /// # Errors
    ///
    /// Fails when the backing medium cannot be read or parsed.
    fn get_all(&self, keys: &[&str]) -> Result<BTreeMap<String, String>, StorageError>;

    /// Write every entry, or none of them.
    ///
    /// # Errors
    ///
    /// Fails when the backing medium rejects the write; nothing is changed then.
    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError>;

    /// Remove every listed key. Missing keys are not an error.
    ///
    /// # Errors
    ///
    /// Fails when the backing medium rejects the write.
    fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError>;
}

// =============================================================================
// MEMORY
// =============================================================================

/// Process-lifetime storage. Used by tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the slot, e.g. to simulate what a previous run left behind.
    #[must_use]
    pub fn with_entries(entries: &[(&str, &str)]) -> Self {
        let map = entries.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        Self { entries: Mutex::new(map) }
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned())
    }

    fn get_all(&self, keys: &[&str]) -> Result<BTreeMap<String, String>, StorageError> {
        let map = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(select(&map, keys))
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let mut map = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in entries {
            map.insert((*key).to_owned(), (*value).to_owned());
        }
        Ok(())
    }

    fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut map = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

// =============================================================================
// FILE
// =============================================================================

/// Storage kept as a JSON object in a single file.
///
/// Every write goes to a sibling temp file first and is renamed into place,
/// so a crash mid-write never leaves a half-written slot behind.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| StorageError::Format(e.to_string()))
    }

    /// Existing contents for a write. An unreadable file is replaced rather
    /// than blocking the write.
    fn load_for_write(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match self.load() {
            Err(StorageError::Format(reason)) => {
                tracing::warn!(path = %self.path.display(), %reason, "replacing unreadable session file");
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn store(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if map.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }

        let raw = serde_json::to_vec_pretty(map).map_err(|e| StorageError::Format(e.to_string()))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&raw)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load()?.remove(key))
    }

    fn get_all(&self, keys: &[&str]) -> Result<BTreeMap<String, String>, StorageError> {
        Ok(select(&self.load()?, keys))
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let mut map = self.load_for_write()?;
        for (key, value) in entries {
            map.insert((*key).to_owned(), (*value).to_owned());
        }
        self.store(&map)
    }

    fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut map = self.load_for_write()?;
        for key in keys {
            map.remove(*key);
        }
        self.store(&map)
    }
}

fn select(map: &BTreeMap<String, String>, keys: &[&str]) -> BTreeMap<String, String> {
    keys.iter()
        .filter_map(|key| map.get(*key).map(|value| ((*key).to_owned(), value.clone())))
        .collect()
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
