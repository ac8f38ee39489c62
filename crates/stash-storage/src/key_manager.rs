use std::fmt;

use async_trait::async_trait;
use hmac::Hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Length of the derived AES-256 key.
pub const KEY_LEN: usize = 32;
/// Default PBKDF2 iteration count.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

const SEED_LEN: usize = 32;
const SALT_LEN: usize = 16;

/// Key material used for encryption at rest. Lives in memory only.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Identifier for logging (never log key bytes).
    pub id: String,
    /// 256-bit symmetric key, zeroized on drop.
    pub bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("cryptography primitive unavailable")]
    Unavailable,
    #[error("key derivation failed: {0}")]
    Derivation(String),
}

/// Source of the session encryption key.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Return the shared key, deriving it on first use.
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError>;

    /// Whether this provider can produce a key at all.
    fn is_available(&self) -> bool {
        true
    }
}

/// Derives one key per lifetime with PBKDF2-HMAC-SHA256 over OS-random seed
/// material and a random salt. Neither the seed nor the key is persisted, so
/// ciphertext sealed by one manager cannot be opened by the next one.
///
/// Concurrent first callers await a single shared derivation.
pub struct SessionKeyManager {
    iterations: u32,
    key: OnceCell<KeyMaterial>,
}

impl SessionKeyManager {
    pub fn new() -> Self {
        Self::with_iterations(DEFAULT_KDF_ITERATIONS)
    }

    pub fn with_iterations(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
            key: OnceCell::new(),
        }
    }

    /// Whether the key has been derived yet.
    pub fn is_initialized(&self) -> bool {
        self.key.initialized()
    }
}

impl Default for SessionKeyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyProvider for SessionKeyManager {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        self.key
            .get_or_try_init(|| async { derive_key(self.iterations) })
            .await
            .cloned()
    }
}

/// Stands in for a platform without a cryptography primitive.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableKeyProvider;

#[async_trait]
impl KeyProvider for UnavailableKeyProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        Err(KeyError::Unavailable)
    }

    fn is_available(&self) -> bool {
        false
    }
}

fn derive_key(iterations: u32) -> Result<KeyMaterial, KeyError> {
    let mut seed = Zeroizing::new([0u8; SEED_LEN]);
    OsRng.fill_bytes(&mut seed[..]);
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2::<Hmac<Sha256>>(&seed[..], &salt, iterations, &mut bytes[..])
        .map_err(|e| KeyError::Derivation(e.to_string()))?;

    let id = format!("session-{}", Uuid::new_v4().simple());
    debug!(key_id = %id, iterations, "derived session key");
    Ok(KeyMaterial { id, bytes })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn manager_returns_same_key() {
        let manager = SessionKeyManager::with_iterations(10);
        assert!(!manager.is_initialized());

        let first = manager.get_or_create().await.unwrap();
        let second = manager.get_or_create().await.unwrap();

        assert!(manager.is_initialized());
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn separate_managers_derive_distinct_keys() {
        let a = SessionKeyManager::with_iterations(10).get_or_create().await.unwrap();
        let b = SessionKeyManager::with_iterations(10).get_or_create().await.unwrap();
        assert_ne!(a.bytes, b.bytes);
    }

    #[tokio::test]
    async fn concurrent_first_use_shares_one_key() {
        let manager = Arc::new(SessionKeyManager::with_iterations(10));
        let (a, b) = tokio::join!(manager.get_or_create(), manager.get_or_create());
        assert_eq!(a.unwrap().bytes, b.unwrap().bytes);
    }

    #[tokio::test]
    async fn unavailable_provider_reports_missing_primitive() {
        let provider = UnavailableKeyProvider;
        assert!(!provider.is_available());
        let err = provider.get_or_create().await.expect_err("no crypto");
        assert_eq!(err, KeyError::Unavailable);
    }

    #[test]
    fn debug_redacts_key_bytes() {
        let material = derive_key(1).expect("derive");
        let rendered = format!("{material:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains(&format!("{:?}", &material.bytes[..4])));
    }
}
