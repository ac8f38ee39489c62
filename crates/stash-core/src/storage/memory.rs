use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

use super::{KeyValueBackend, RecordTable};
use crate::{error::StorageError, record::DurableRecord};

/// In-memory flat store. Clones share the same map, so a test can keep a
/// handle and inspect the raw entries a tier wrote.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyValue {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryKeyValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.inner.lock().map_err(|err| StorageError::Transaction {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

impl KeyValueBackend for InMemoryKeyValue {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

/// In-memory structured table for tests and process-scoped runs.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRecordTable {
    inner: Arc<Mutex<HashMap<String, DurableRecord>>>,
}

impl InMemoryRecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a row exists regardless of expiry.
    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .lock()
            .map(|map| map.contains_key(id))
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, DurableRecord>>, StorageError> {
        self.inner.lock().map_err(|err| StorageError::Transaction {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

#[async_trait]
impl RecordTable for InMemoryRecordTable {
    async fn put(&self, record: DurableRecord) -> Result<(), StorageError> {
        self.lock()?.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DurableRecord>, StorageError> {
        Ok(self.lock()?.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.lock()?.remove(id);
        Ok(())
    }

    async fn scan_by_created(&self) -> Result<Vec<DurableRecord>, StorageError> {
        let mut rows: Vec<DurableRecord> = self.lock()?.values().cloned().collect();
        rows.sort_by_key(|row| row.created_at);
        Ok(rows)
    }
}
