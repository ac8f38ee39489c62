//! Backend contracts for the two storage tiers.
//!
//! `KeyValueBackend` models a flat, synchronous string store (a browser's
//! session or local storage). `RecordTable` models an asynchronous structured
//! object store holding `DurableRecord` rows keyed by id.

mod memory;

pub use memory::{InMemoryKeyValue, InMemoryRecordTable};

use async_trait::async_trait;

use crate::{error::StorageError, record::DurableRecord};

/// Flat string key-value medium.
pub trait KeyValueBackend: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Overwrites any existing entry.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Idempotent.
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Structured object store with a single logical table keyed by record id.
#[async_trait]
pub trait RecordTable: Send + Sync {
    /// Insert or replace the row with the same id.
    async fn put(&self, record: DurableRecord) -> Result<(), StorageError>;

    async fn get(&self, id: &str) -> Result<Option<DurableRecord>, StorageError>;

    /// Remove a row (idempotent).
    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// All rows ordered by `created_at`, oldest first.
    async fn scan_by_created(&self) -> Result<Vec<DurableRecord>, StorageError>;
}
