//! # Storage
//!
//! The persisted key-value store the host keeps between ticks.
//!
//! ## Philosophy
//!
//! **The store is the only thing that survives a tick.**
//!
//! Values are opaque strings (the kernel writes JSON). The kernel is the only
//! writer and writes once, at checkpoint; nothing here needs locking.
//!
//! ## Implementations
//!
//! - [`MemoryStore`]: a map, for tests and embedded hosts
//! - [`FileStore`]: one file per key in a directory, for the host daemon

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Store key holding the kernel's process and thread table
pub const KERNEL_KEY: &str = "kernel";
/// Store key holding per-process memory namespaces
pub const PROCESS_KEY: &str = "process";
/// Store key holding kernel configuration
pub const CONFIG_KEY: &str = "config";
/// Store key where an unreadable kernel table is preserved
pub const CORRUPT_KEY: &str = "kernel.corrupt";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Invalid store key: {0}")]
    InvalidKey(String),

    #[error("Store I/O failed: {0}")]
    Io(String),
}

/// Host-provided persistent key-value store
pub trait Store {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn save(&mut self, key: &str, value: String) -> Result<(), StoreError>;

    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Store for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(key).cloned())
    }

    fn save(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.values.remove(key);
        Ok(())
    }
}

/// Directory-backed store, one `<key>.json` file per key
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|err| StoreError::Io(err.to_string()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            && !key.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl Store for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err.to_string())),
        }
    }

    fn save(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        // Readers never observe a partially written value.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(|err| StoreError::Io(err.to_string()))?;
        fs::rename(&tmp, &path).map_err(|err| StoreError::Io(err.to_string()))
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Io(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        assert_eq!(store.load(KERNEL_KEY).unwrap(), None);
        store.save(KERNEL_KEY, "{}".to_string()).unwrap();
        assert_eq!(store.get(KERNEL_KEY), Some("{}"));
        store.remove(KERNEL_KEY).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::open(dir.path().join("mem")).unwrap();

        assert_eq!(store.load(PROCESS_KEY).unwrap(), None);
        store.save(PROCESS_KEY, r#"{"A.0":{}}"#.to_string()).unwrap();
        store.save(CORRUPT_KEY, "garbage".to_string()).unwrap();

        let reopened = FileStore::open(dir.path().join("mem")).unwrap();
        assert_eq!(
            reopened.load(PROCESS_KEY).unwrap().as_deref(),
            Some(r#"{"A.0":{}}"#)
        );
        assert_eq!(reopened.load(CORRUPT_KEY).unwrap().as_deref(), Some("garbage"));

        store.remove(PROCESS_KEY).unwrap();
        store.remove(PROCESS_KEY).unwrap();
        assert_eq!(store.load(PROCESS_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_store_rejects_path_keys() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        assert_eq!(
            store.save("../escape", String::new()),
            Err(StoreError::InvalidKey("../escape".to_string()))
        );
        assert!(store.load("").is_err());
    }
}
