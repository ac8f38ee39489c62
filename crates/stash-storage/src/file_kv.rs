use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use stash_core::{storage::KeyValueBackend, StorageError};

use crate::file_table::{read_file, write_atomic};

/// Flat key-value store persisted as a single JSON object file.
///
/// Stands in for a browser's local storage: the legacy plaintext store that
/// migration reads from. Every write rewrites the file atomically.
pub struct JsonFileKeyValue {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileKeyValue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match read_file(&self.path)? {
            Some(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
            _ => Ok(BTreeMap::new()),
        }
    }

    fn update<F>(&self, apply: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let _guard = self.write_lock.lock().map_err(|err| StorageError::Transaction {
            reason: format!("lock poisoned: {err}"),
        })?;
        let mut map = self.load()?;
        if apply(&mut map) {
            let json = serde_json::to_vec_pretty(&map)?;
            write_atomic(&self.path, &json)?;
        }
        Ok(())
    }
}

impl KeyValueBackend for JsonFileKeyValue {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|map| {
            map.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.update(|map| map.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.load()?.into_keys().collect())
    }
}
