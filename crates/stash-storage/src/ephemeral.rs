use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;
use stash_core::{
    storage::KeyValueBackend, Clock, StorageError, StoredRecord, SystemClock, WriteOptions,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    cipher,
    environment::{classify_environment, Capabilities, StorageMode},
    key_manager::KeyProvider,
};

/// Reserved backend key holding the session identifier in plaintext.
pub const SESSION_ID_KEY: &str = "stash_session_id";

/// Session-scoped key-value tier with optional per-record encryption and expiry.
///
/// Every record lives under `{session_id}_{key}` in the backing medium. Clones
/// share the same backend, key provider and session id.
#[derive(Clone)]
pub struct EphemeralStore {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Option<Arc<dyn KeyValueBackend>>,
    keys: Arc<dyn KeyProvider>,
    clock: Arc<dyn Clock>,
    mode: StorageMode,
    session_id: OnceLock<String>,
    session_init: Mutex<()>,
}

impl EphemeralStore {
    /// `backend` is `None` when the platform has no session medium.
    pub fn new(backend: Option<Arc<dyn KeyValueBackend>>, keys: Arc<dyn KeyProvider>) -> Self {
        Self::with_clock(backend, keys, Arc::new(SystemClock))
    }

    pub fn with_clock(
        backend: Option<Arc<dyn KeyValueBackend>>,
        keys: Arc<dyn KeyProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mode = classify_environment(&Capabilities {
            session_storage: backend.is_some(),
            structured_storage: false,
            crypto: keys.is_available(),
        });
        Self {
            inner: Arc::new(Inner {
                backend,
                keys,
                clock,
                mode,
                session_id: OnceLock::new(),
                session_init: Mutex::new(()),
            }),
        }
    }

    pub fn mode(&self) -> StorageMode {
        self.inner.mode
    }

    /// Session identifier, created and persisted on first use.
    pub fn session_id(&self) -> Result<Option<String>, StorageError> {
        let Some(backend) = self.backend() else {
            return Ok(None);
        };
        if let Some(id) = self.inner.session_id.get() {
            return Ok(Some(id.clone()));
        }

        // Read-or-create must not interleave, or the backend and the cached id diverge.
        let _init = self
            .inner
            .session_init
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(id) = self.inner.session_id.get() {
            return Ok(Some(id.clone()));
        }
        let id = match backend.get_item(SESSION_ID_KEY)? {
            Some(existing) if !existing.is_empty() => existing,
            _ => {
                let fresh = Uuid::new_v4().simple().to_string();
                backend.set_item(SESSION_ID_KEY, &fresh)?;
                debug!(session_id = %fresh, "started storage session");
                fresh
            }
        };
        Ok(Some(self.inner.session_id.get_or_init(|| id).clone()))
    }

    #[instrument(skip_all, fields(key))]
    pub async fn set_item(
        &self,
        key: &str,
        value: Value,
        opts: WriteOptions,
    ) -> Result<(), StorageError> {
        validate_key(key)?;
        let Some(backend) = self.backend() else {
            return Ok(());
        };

        let mut record = StoredRecord::new(value, self.inner.clock.now(), opts.expires_in_ms)?;
        let payload = if opts.encrypt {
            self.seal_or_fallback(&mut record).await?
        } else {
            serde_json::to_string(&record)?
        };

        let storage_key = self.storage_key(key)?;
        backend.set_item(&storage_key, &payload)
    }

    /// Read a record. Missing, expired or unreadable records are `None`.
    #[instrument(skip_all, fields(key))]
    pub async fn get_item(&self, key: &str) -> Result<Option<Value>, StorageError> {
        validate_key(key)?;
        let Some(backend) = self.backend() else {
            return Ok(None);
        };

        let storage_key = match self.storage_key(key) {
            Ok(storage_key) => storage_key,
            Err(err) => {
                warn!(%err, "session namespace unavailable");
                return Ok(None);
            }
        };
        let raw = match backend.get_item(&storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(err) => {
                warn!(%err, "session read failed");
                return Ok(None);
            }
        };

        let record = match self.decode(&raw).await {
            Ok(record) => record,
            Err(err) => {
                warn!(%err, "unreadable session record treated as missing");
                return Ok(None);
            }
        };

        if record.is_expired(self.inner.clock.now()) {
            debug!("session record expired");
            if let Err(err) = backend.remove_item(&storage_key) {
                warn!(%err, "failed to remove expired session record");
            }
            return Ok(None);
        }
        Ok(Some(record.value))
    }

    pub fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let Some(backend) = self.backend() else {
            return Ok(());
        };
        backend.remove_item(&self.storage_key(key)?)
    }

    /// Remove every record in the current session namespace.
    pub fn clear(&self) -> Result<(), StorageError> {
        let Some(backend) = self.backend() else {
            return Ok(());
        };
        let prefix = self.prefix()?;
        for stored in backend.keys()? {
            if stored.starts_with(&prefix) {
                backend.remove_item(&stored)?;
            }
        }
        Ok(())
    }

    /// Keys of the current session, without the namespace prefix.
    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        let Some(backend) = self.backend() else {
            return Ok(Vec::new());
        };
        let prefix = self.prefix()?;
        Ok(backend
            .keys()?
            .into_iter()
            .filter_map(|stored| stored.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// Returns a guard that clears this session's records when dropped, the
    /// way a page clears them on unload. Best effort: failures are logged.
    pub fn teardown_guard(&self) -> TeardownGuard {
        TeardownGuard {
            store: self.clone(),
        }
    }

    fn backend(&self) -> Option<&Arc<dyn KeyValueBackend>> {
        self.inner.backend.as_ref()
    }

    fn prefix(&self) -> Result<String, StorageError> {
        let id = self
            .session_id()?
            .ok_or_else(|| StorageError::EnvironmentUnavailable {
                primitive: "session storage".into(),
            })?;
        Ok(format!("{id}_"))
    }

    fn storage_key(&self, key: &str) -> Result<String, StorageError> {
        Ok(format!("{}{key}", self.prefix()?))
    }

    async fn seal_or_fallback(&self, record: &mut StoredRecord) -> Result<String, StorageError> {
        if self.inner.mode != StorageMode::Encrypted {
            warn!(mode = %self.inner.mode, "encryption unavailable, storing plaintext");
            return Ok(serde_json::to_string(record)?);
        }

        match self.inner.keys.get_or_create().await {
            Ok(key) => {
                record.encrypted = true;
                let json = serde_json::to_vec(record)?;
                cipher::seal(&key, &json)
            }
            Err(err) => {
                warn!(%err, "key unavailable, storing plaintext");
                Ok(serde_json::to_string(record)?)
            }
        }
    }

    async fn decode(&self, raw: &str) -> Result<StoredRecord, StorageError> {
        if cipher::is_sealed(raw) {
            let key = self
                .inner
                .keys
                .get_or_create()
                .await
                .map_err(|e| StorageError::Decryption {
                    reason: format!("key provider: {e}"),
                })?;
            let plaintext = cipher::open(&key, raw)?;
            return Ok(serde_json::from_slice(&plaintext)?);
        }

        // Records written before encryption was available.
        let value: Value = serde_json::from_str(raw)?;
        match serde_json::from_value::<StoredRecord>(value.clone()) {
            Ok(record) => Ok(record),
            Err(_) => Ok(StoredRecord {
                value,
                created_at: self.inner.clock.now(),
                expires_at: None,
                encrypted: false,
            }),
        }
    }
}

/// Clears the session namespace on drop.
pub struct TeardownGuard {
    store: EphemeralStore,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if let Err(err) = self.store.clear() {
            warn!(%err, "session teardown failed");
        }
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidArgument {
            reason: "storage key must not be empty".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use stash_core::{storage::InMemoryKeyValue, ManualClock};

    use super::*;
    use crate::key_manager::{SessionKeyManager, UnavailableKeyProvider};

    fn store_with(backend: &InMemoryKeyValue, clock: &ManualClock) -> EphemeralStore {
        EphemeralStore::with_clock(
            Some(Arc::new(backend.clone())),
            Arc::new(SessionKeyManager::with_iterations(10)),
            Arc::new(clock.clone()),
        )
    }

    fn raw_entry(store: &EphemeralStore, backend: &InMemoryKeyValue, key: &str) -> Option<String> {
        let id = store.session_id().expect("session id").expect("available");
        backend.get_item(&format!("{id}_{key}")).expect("raw read")
    }

    #[tokio::test]
    async fn encrypted_round_trip_hides_plaintext() {
        let backend = InMemoryKeyValue::new();
        let store = store_with(&backend, &ManualClock::default());

        store
            .set_item("email", json!("a@b.com"), WriteOptions::encrypted())
            .await
            .expect("set");

        assert_eq!(
            store.get_item("email").await.expect("get"),
            Some(json!("a@b.com"))
        );
        let raw = raw_entry(&store, &backend, "email").expect("raw entry");
        assert!(cipher::is_sealed(&raw));
        assert!(!raw.contains("a@b.com"));
    }

    #[tokio::test]
    async fn plaintext_round_trip_keeps_structure() {
        let backend = InMemoryKeyValue::new();
        let store = store_with(&backend, &ManualClock::default());
        let value = json!({"items": [1, 2], "note": null, "nested": {"ok": true}});

        store
            .set_item("cart", value.clone(), WriteOptions::plaintext())
            .await
            .expect("set");

        assert_eq!(store.get_item("cart").await.expect("get"), Some(value));
        let raw = raw_entry(&store, &backend, "cart").expect("raw entry");
        let envelope: StoredRecord = serde_json::from_str(&raw).expect("envelope");
        assert!(!envelope.encrypted);
    }

    #[tokio::test]
    async fn expired_record_is_removed_on_read() {
        let backend = InMemoryKeyValue::new();
        let clock = ManualClock::default();
        let store = store_with(&backend, &clock);

        store
            .set_item("flag", json!(true), WriteOptions::encrypted().expires_in_ms(1_000))
            .await
            .expect("set");
        clock.advance_ms(999);
        assert_eq!(store.get_item("flag").await.expect("get"), Some(json!(true)));

        clock.advance_ms(1);
        assert_eq!(store.get_item("flag").await.expect("get"), None);
        assert!(raw_entry(&store, &backend, "flag").is_none());
    }

    #[tokio::test]
    async fn record_without_ttl_stays_readable() {
        let backend = InMemoryKeyValue::new();
        let clock = ManualClock::default();
        let store = store_with(&backend, &clock);

        store
            .set_item("name", json!("Ada"), WriteOptions::default())
            .await
            .expect("set");
        clock.advance(chrono::Duration::days(365));

        assert_eq!(store.get_item("name").await.expect("get"), Some(json!("Ada")));
    }

    #[tokio::test]
    async fn reads_records_written_before_encryption() {
        let backend = InMemoryKeyValue::new();
        let store = store_with(&backend, &ManualClock::default());
        let id = store.session_id().expect("id").expect("available");

        let envelope = json!({"value": {"a": 1}, "createdAt": "2024-01-01T00:00:00Z"});
        backend
            .set_item(&format!("{id}_legacy"), &envelope.to_string())
            .expect("seed");
        backend
            .set_item(&format!("{id}_bare"), "[1,2,3]")
            .expect("seed");

        assert_eq!(store.get_item("legacy").await.expect("get"), Some(json!({"a": 1})));
        assert_eq!(store.get_item("bare").await.expect("get"), Some(json!([1, 2, 3])));
    }

    #[tokio::test]
    async fn undecryptable_or_corrupt_records_read_as_missing() {
        let backend = InMemoryKeyValue::new();
        let clock = ManualClock::default();
        let before_reload = store_with(&backend, &clock);
        before_reload
            .set_item("email", json!("a@b.com"), WriteOptions::encrypted())
            .await
            .expect("set");

        // Same session medium, fresh key: ciphertext from the previous lifetime.
        let after_reload = store_with(&backend, &clock);
        assert_eq!(
            after_reload.session_id().expect("id"),
            before_reload.session_id().expect("id")
        );
        assert_eq!(after_reload.get_item("email").await.expect("get"), None);

        let id = after_reload.session_id().expect("id").expect("available");
        backend
            .set_item(&format!("{id}_broken"), "{not json")
            .expect("seed");
        assert_eq!(after_reload.get_item("broken").await.expect("get"), None);
    }

    #[tokio::test]
    async fn clear_only_touches_current_namespace() {
        let backend = InMemoryKeyValue::new();
        let store = store_with(&backend, &ManualClock::default());
        backend.set_item("othersession_email", "x").expect("seed");

        store
            .set_item("a", json!(1), WriteOptions::default())
            .await
            .expect("set");
        store
            .set_item("b", json!(2), WriteOptions::plaintext())
            .await
            .expect("set");
        let mut keys = store.keys().expect("keys");
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        store.remove_item("a").expect("remove");
        store.remove_item("a").expect("remove again");
        assert_eq!(store.get_item("a").await.expect("get"), None);

        store.clear().expect("clear");
        assert!(store.keys().expect("keys").is_empty());
        assert!(backend.get_item("othersession_email").expect("get").is_some());
        assert!(backend.get_item(SESSION_ID_KEY).expect("get").is_some());
    }

    #[tokio::test]
    async fn teardown_guard_clears_on_drop() {
        let backend = InMemoryKeyValue::new();
        let store = store_with(&backend, &ManualClock::default());
        {
            let _guard = store.teardown_guard();
            store
                .set_item("draft", json!("x"), WriteOptions::default())
                .await
                .expect("set");
        }
        assert!(store.keys().expect("keys").is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_plaintext_without_crypto() {
        let backend = InMemoryKeyValue::new();
        let store = EphemeralStore::new(
            Some(Arc::new(backend.clone())),
            Arc::new(UnavailableKeyProvider),
        );
        assert_eq!(store.mode(), StorageMode::PlaintextFallback);

        store
            .set_item("email", json!("a@b.com"), WriteOptions::encrypted())
            .await
            .expect("set");
        assert_eq!(
            store.get_item("email").await.expect("get"),
            Some(json!("a@b.com"))
        );
        let raw = raw_entry(&store, &backend, "email").expect("raw");
        assert!(!cipher::is_sealed(&raw));
    }

    #[tokio::test]
    async fn missing_backend_is_a_no_op() {
        let store = EphemeralStore::new(None, Arc::new(SessionKeyManager::with_iterations(10)));
        assert_eq!(store.mode(), StorageMode::Unavailable);

        store
            .set_item("k", json!(1), WriteOptions::default())
            .await
            .expect("set");
        assert_eq!(store.get_item("k").await.expect("get"), None);
        store.remove_item("k").expect("remove");
        store.clear().expect("clear");
        assert!(store.keys().expect("keys").is_empty());
        assert_eq!(store.session_id().expect("id"), None);
    }

    #[test]
    fn concurrent_first_use_agrees_on_one_session_id() {
        let backend = InMemoryKeyValue::new();
        let store = store_with(&backend, &ManualClock::default());

        let ids: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = store.clone();
                    scope.spawn(move || store.session_id().expect("id").expect("available"))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread"))
                .collect()
        });

        let persisted = backend
            .get_item(SESSION_ID_KEY)
            .expect("get")
            .expect("persisted");
        assert!(ids.iter().all(|id| *id == persisted));
        let reloaded = store_with(&backend, &ManualClock::default());
        assert_eq!(reloaded.session_id().expect("id"), Some(persisted));
    }

    #[tokio::test]
    async fn key_is_derived_on_first_encrypted_write() {
        let backend = InMemoryKeyValue::new();
        let keys = Arc::new(SessionKeyManager::with_iterations(10));
        let store = EphemeralStore::with_clock(
            Some(Arc::new(backend.clone())),
            keys.clone(),
            Arc::new(ManualClock::default()),
        );

        store
            .set_item("cart", json!([1]), WriteOptions::plaintext())
            .await
            .expect("set");
        assert_eq!(store.get_item("cart").await.expect("get"), Some(json!([1])));
        assert!(!keys.is_initialized());

        store
            .set_item("email", json!("a@b.com"), WriteOptions::encrypted())
            .await
            .expect("set");
        assert!(keys.is_initialized());
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let store = store_with(&InMemoryKeyValue::new(), &ManualClock::default());
        let err = store.get_item("").await.expect_err("empty key");
        assert!(matches!(err, StorageError::InvalidArgument { .. }));
    }
}
