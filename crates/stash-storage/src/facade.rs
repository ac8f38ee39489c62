//! Single entry point over both storage tiers.
//!
//! `SecureStorage` is constructed once with explicit backends and a key
//! provider, then handed to whoever needs it. `session()` reaches the
//! ephemeral tier, `database()` the durable tier, and
//! `migrate_from_local_storage` moves legacy plaintext entries into the
//! encrypted session tier.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use stash_core::{
    storage::{KeyValueBackend, RecordTable},
    Clock, DurableOptions, StorageError, SystemClock, WriteOptions,
};
use tracing::{info, instrument, warn};

use crate::{
    durable::DurableStore,
    environment::{Capabilities, StorageMode},
    ephemeral::{EphemeralStore, TeardownGuard},
    key_manager::{KeyProvider, SessionKeyManager},
};

/// Expiration applied to values moved out of the legacy store.
pub const MIGRATION_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Wires backends and a key provider into a `SecureStorage`.
///
/// Anything left unset is treated as unavailable, except the key provider,
/// which defaults to a fresh `SessionKeyManager`.
pub struct SecureStorageBuilder {
    session: Option<Arc<dyn KeyValueBackend>>,
    table: Option<Arc<dyn RecordTable>>,
    legacy: Option<Arc<dyn KeyValueBackend>>,
    keys: Option<Arc<dyn KeyProvider>>,
    clock: Arc<dyn Clock>,
}

impl Default for SecureStorageBuilder {
    fn default() -> Self {
        Self {
            session: None,
            table: None,
            legacy: None,
            keys: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl SecureStorageBuilder {
    pub fn session_backend(mut self, backend: impl KeyValueBackend + 'static) -> Self {
        self.session = Some(Arc::new(backend));
        self
    }

    pub fn record_table(mut self, table: impl RecordTable + 'static) -> Self {
        self.table = Some(Arc::new(table));
        self
    }

    /// Flat plaintext store that migration reads from.
    pub fn legacy_store(mut self, backend: impl KeyValueBackend + 'static) -> Self {
        self.legacy = Some(Arc::new(backend));
        self
    }

    pub fn key_provider(mut self, keys: impl KeyProvider + 'static) -> Self {
        self.keys = Some(Arc::new(keys));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> SecureStorage {
        let keys: Arc<dyn KeyProvider> = match self.keys {
            Some(keys) => keys,
            None => Arc::new(SessionKeyManager::new()),
        };
        let capabilities = Capabilities {
            session_storage: self.session.is_some(),
            structured_storage: self.table.is_some(),
            crypto: keys.is_available(),
        };
        SecureStorage {
            session: EphemeralStore::with_clock(self.session, keys, self.clock.clone()),
            database: DurableStore::with_clock(self.table, self.clock),
            legacy: self.legacy,
            capabilities,
        }
    }
}

/// Outcome of a legacy migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: Vec<String>,
    pub failed: Vec<MigrationFailure>,
    /// Keys not present in the legacy store.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFailure {
    pub key: String,
    pub error: StorageError,
}

#[derive(Clone)]
pub struct SecureStorage {
    session: EphemeralStore,
    database: DurableStore,
    legacy: Option<Arc<dyn KeyValueBackend>>,
    capabilities: Capabilities,
}

impl SecureStorage {
    pub fn builder() -> SecureStorageBuilder {
        SecureStorageBuilder::default()
    }

    /// True only if session storage, structured storage and crypto are all present.
    pub fn is_secure_storage_available(&self) -> bool {
        self.capabilities.is_secure()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn mode(&self) -> StorageMode {
        self.session.mode()
    }

    pub fn session(&self) -> SessionTier<'_> {
        SessionTier {
            store: &self.session,
        }
    }

    pub fn database(&self) -> DatabaseTier<'_> {
        DatabaseTier {
            store: &self.database,
        }
    }

    /// Clears the session tier when the returned guard drops.
    pub fn teardown_guard(&self) -> TeardownGuard {
        self.session.teardown_guard()
    }

    /// Move allow-listed plaintext entries from the legacy store into the
    /// encrypted session tier.
    ///
    /// Keys whose legacy value is not JSON, or whose secure write fails, stay
    /// in the legacy store and are reported in `failed`. Rerunning only
    /// touches keys still present in the legacy store.
    #[instrument(skip_all, fields(keys = keys.len()))]
    pub async fn migrate_from_local_storage<S: AsRef<str>>(&self, keys: &[S]) -> MigrationReport {
        let mut report = MigrationReport::default();
        let legacy = match &self.legacy {
            Some(legacy) if self.session.mode() != StorageMode::Unavailable => legacy,
            _ => {
                warn!("migration skipped: legacy or session storage unavailable");
                report.skipped = keys.iter().map(|k| k.as_ref().to_string()).collect();
                return report;
            }
        };

        for key in keys {
            let key: &str = key.as_ref();
            match self.migrate_key(legacy.as_ref(), key).await {
                Ok(true) => report.migrated.push(key.to_string()),
                Ok(false) => report.skipped.push(key.to_string()),
                Err(error) => {
                    warn!(key, %error, "legacy entry not migrated");
                    report.failed.push(MigrationFailure {
                        key: key.to_string(),
                        error,
                    });
                }
            }
        }

        info!(
            migrated = report.migrated.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "legacy migration finished"
        );
        report
    }

    async fn migrate_key(
        &self,
        legacy: &dyn KeyValueBackend,
        key: &str,
    ) -> Result<bool, StorageError> {
        let Some(raw) = legacy.get_item(key)? else {
            return Ok(false);
        };
        let value: Value = serde_json::from_str(&raw)?;
        self.session
            .set_item(
                key,
                value,
                WriteOptions::encrypted().expires_in_ms(MIGRATION_TTL_MS),
            )
            .await?;
        legacy.remove_item(key)?;
        Ok(true)
    }
}

/// `session.*` surface of the facade.
pub struct SessionTier<'a> {
    store: &'a EphemeralStore,
}

impl SessionTier<'_> {
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        opts: WriteOptions,
    ) -> Result<(), StorageError> {
        let value = serde_json::to_value(value)?;
        self.store.set_item(key, value, opts).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.store.get_item(key).await
    }

    /// Typed read; a value of the wrong shape reads as missing.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        Ok(decode_typed(key, self.store.get_item(key).await?))
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.store.remove_item(key)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.clear()
    }

    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.store.keys()
    }
}

/// `database.*` surface of the facade.
pub struct DatabaseTier<'a> {
    store: &'a DurableStore,
}

impl DatabaseTier<'_> {
    pub async fn store<T: Serialize + ?Sized>(
        &self,
        id: &str,
        data: &T,
        opts: DurableOptions,
    ) -> Result<(), StorageError> {
        let data = serde_json::to_value(data)?;
        self.store.store(id, data, opts).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Value>, StorageError> {
        self.store.get(id).await
    }

    /// Typed read; a value of the wrong shape reads as missing.
    pub async fn get_as<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, StorageError> {
        Ok(decode_typed(id, self.store.get(id).await?))
    }

    pub async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.store.delete(id).await
    }

    pub async fn clear_expired(&self) -> Result<usize, StorageError> {
        self.store.clear_expired().await
    }
}

fn decode_typed<T: DeserializeOwned>(key: &str, value: Option<Value>) -> Option<T> {
    let value = value?;
    match serde_json::from_value(value) {
        Ok(typed) => Some(typed),
        Err(err) => {
            warn!(key, %err, "stored value has unexpected shape");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use stash_core::{
        storage::{InMemoryKeyValue, InMemoryRecordTable},
        ManualClock,
    };

    use super::*;
    use crate::{cipher, ephemeral::SESSION_ID_KEY, key_manager::UnavailableKeyProvider};

    struct Fixture {
        storage: SecureStorage,
        session: InMemoryKeyValue,
        legacy: InMemoryKeyValue,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let session = InMemoryKeyValue::new();
        let legacy = InMemoryKeyValue::new();
        let clock = ManualClock::default();
        let storage = SecureStorage::builder()
            .session_backend(session.clone())
            .record_table(InMemoryRecordTable::new())
            .legacy_store(legacy.clone())
            .key_provider(SessionKeyManager::with_iterations(10))
            .clock(clock.clone())
            .build();
        Fixture {
            storage,
            session,
            legacy,
            clock,
        }
    }

    fn raw_session_entry(fx: &Fixture, key: &str) -> Option<String> {
        let id = fx
            .session
            .get_item(SESSION_ID_KEY)
            .expect("read")
            .expect("session id");
        fx.session.get_item(&format!("{id}_{key}")).expect("read")
    }

    #[tokio::test]
    async fn fully_wired_storage_is_secure() {
        let fx = fixture();
        assert!(fx.storage.is_secure_storage_available());
        assert_eq!(fx.storage.mode(), StorageMode::Encrypted);
    }

    #[tokio::test]
    async fn session_email_is_not_stored_literally() {
        let fx = fixture();
        fx.storage
            .session()
            .set("email", "a@b.com", WriteOptions::encrypted())
            .await
            .expect("set");

        assert_eq!(
            fx.storage.session().get("email").await.expect("get"),
            Some(json!("a@b.com"))
        );
        let raw = raw_session_entry(&fx, "email").expect("raw entry");
        assert_ne!(raw, "a@b.com");
        assert!(!raw.contains("a@b.com"));
    }

    #[tokio::test]
    async fn database_cart_state_round_trip() {
        let fx = fixture();
        fx.storage
            .database()
            .store(
                "cartState",
                &json!({"items": [1, 2]}),
                DurableOptions::expires_in_ms(86_400_000),
            )
            .await
            .expect("store");

        assert_eq!(
            fx.storage.database().get("cartState").await.expect("get"),
            Some(json!({"items": [1, 2]}))
        );
    }

    #[tokio::test]
    async fn typed_reads_treat_wrong_shape_as_missing() {
        let fx = fixture();
        fx.storage
            .database()
            .store("count", &json!("not a number"), DurableOptions::default())
            .await
            .expect("store");

        let typed: Option<u32> = fx.storage.database().get_as("count").await.expect("get");
        assert_eq!(typed, None);
    }

    #[tokio::test]
    async fn migration_moves_values_and_is_idempotent() {
        let fx = fixture();
        fx.legacy
            .set_item("cart", r#"{"items":[1,2]}"#)
            .expect("seed");

        let first = fx.storage.migrate_from_local_storage(&["cart"]).await;
        assert_eq!(first.migrated, vec!["cart"]);
        assert!(first.failed.is_empty());

        let second = fx.storage.migrate_from_local_storage(&["cart"]).await;
        assert!(second.migrated.is_empty());
        assert!(second.failed.is_empty());
        assert_eq!(second.skipped, vec!["cart"]);

        assert_eq!(fx.legacy.get_item("cart").expect("get"), None);
        assert_eq!(
            fx.storage.session().get("cart").await.expect("get"),
            Some(json!({"items": [1, 2]}))
        );
        let raw = raw_session_entry(&fx, "cart").expect("raw entry");
        assert!(cipher::is_sealed(&raw));
    }

    #[tokio::test]
    async fn migrated_values_expire() {
        let fx = fixture();
        fx.legacy.set_item("email", "\"a@b.com\"").expect("seed");
        fx.storage.migrate_from_local_storage(&["email"]).await;

        fx.clock.advance_ms(MIGRATION_TTL_MS as i64);
        assert_eq!(fx.storage.session().get("email").await.expect("get"), None);
    }

    #[tokio::test]
    async fn unparseable_legacy_values_are_reported_and_kept() {
        let fx = fixture();
        fx.legacy.set_item("good", "42").expect("seed");
        fx.legacy.set_item("bad", "{broken").expect("seed");

        let report = fx
            .storage
            .migrate_from_local_storage(&["good", "bad", "absent"])
            .await;

        assert_eq!(report.migrated, vec!["good"]);
        assert_eq!(report.skipped, vec!["absent"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "bad");
        assert!(matches!(
            report.failed[0].error,
            StorageError::Serialization { .. }
        ));
        assert_eq!(
            fx.legacy.get_item("bad").expect("get").as_deref(),
            Some("{broken")
        );
    }

    #[tokio::test]
    async fn degrades_without_structured_storage_or_crypto() {
        let storage = SecureStorage::builder()
            .session_backend(InMemoryKeyValue::new())
            .key_provider(UnavailableKeyProvider)
            .build();
        assert!(!storage.is_secure_storage_available());
        assert_eq!(storage.mode(), StorageMode::PlaintextFallback);

        storage
            .session()
            .set("k", &json!(1), WriteOptions::encrypted())
            .await
            .expect("session set");
        assert_eq!(storage.session().get("k").await.expect("get"), Some(json!(1)));
        storage.session().remove("k").expect("remove");
        storage.session().clear().expect("clear");

        storage
            .database()
            .store("d", &json!(1), DurableOptions::default())
            .await
            .expect("db store");
        assert_eq!(storage.database().get("d").await.expect("db get"), None);
        storage.database().delete("d").await.expect("db delete");
        assert_eq!(storage.database().clear_expired().await.expect("sweep"), 0);
    }

    #[tokio::test]
    async fn nothing_wired_resolves_without_error() {
        let storage = SecureStorage::builder()
            .key_provider(UnavailableKeyProvider)
            .build();
        assert!(!storage.is_secure_storage_available());
        assert_eq!(storage.mode(), StorageMode::Unavailable);

        storage
            .session()
            .set("k", &json!(1), WriteOptions::default())
            .await
            .expect("set");
        assert_eq!(storage.session().get("k").await.expect("get"), None);

        let report = storage.migrate_from_local_storage(&["a", "b"]).await;
        assert_eq!(report.skipped, vec!["a", "b"]);
    }
}
