use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use stash_core::{DurableOptions, WriteOptions};
use stash_storage::SecureStorage;

pub const HOUR_MS: u64 = 60 * 60 * 1000;
pub const DAY_MS: u64 = 24 * HOUR_MS;

/// Which tier a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Session tier, always encrypted.
    Session,
    /// Durable tier, unencrypted.
    Durable,
}

/// A named record with its tier and time-to-live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSpec {
    pub key: &'static str,
    pub tier: Tier,
    pub ttl_ms: u64,
}

impl RecordSpec {
    pub const fn session(key: &'static str, ttl_ms: u64) -> Self {
        Self {
            key,
            tier: Tier::Session,
            ttl_ms,
        }
    }

    pub const fn durable(key: &'static str, ttl_ms: u64) -> Self {
        Self {
            key,
            tier: Tier::Durable,
            ttl_ms,
        }
    }

    pub async fn load<T: DeserializeOwned>(&self, storage: &SecureStorage) -> Result<Option<T>> {
        load_at(storage, self.tier, self.key).await
    }

    pub async fn save<T: Serialize + ?Sized>(
        &self,
        storage: &SecureStorage,
        value: &T,
    ) -> Result<()> {
        save_at(storage, self.tier, self.key, self.ttl_ms, value).await
    }

    pub async fn clear(&self, storage: &SecureStorage) -> Result<()> {
        clear_at(storage, self.tier, self.key).await
    }
}

/// Family of one-shot session flags keyed by an address, such as
/// "password reset already sent to X".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagFamily {
    pub prefix: &'static str,
    pub ttl_ms: u64,
}

impl FlagFamily {
    pub const fn new(prefix: &'static str, ttl_ms: u64) -> Self {
        Self { prefix, ttl_ms }
    }

    /// Addresses are compared case-insensitively.
    pub fn key_for(&self, address: &str) -> String {
        format!("{}{}", self.prefix, address.trim().to_ascii_lowercase())
    }

    pub async fn mark(&self, storage: &SecureStorage, address: &str) -> Result<()> {
        save_at(
            storage,
            Tier::Session,
            &self.key_for(address),
            self.ttl_ms,
            &true,
        )
        .await
    }

    pub async fn is_marked(&self, storage: &SecureStorage, address: &str) -> Result<bool> {
        let flag: Option<bool> = load_at(storage, Tier::Session, &self.key_for(address)).await?;
        Ok(flag.unwrap_or(false))
    }

    pub async fn clear(&self, storage: &SecureStorage, address: &str) -> Result<()> {
        clear_at(storage, Tier::Session, &self.key_for(address)).await
    }

    /// Remove the flag for every address.
    pub fn clear_all(&self, storage: &SecureStorage) -> Result<()> {
        let session = storage.session();
        for key in session.keys()? {
            if key.starts_with(self.prefix) {
                session.remove(&key)?;
            }
        }
        Ok(())
    }
}

async fn load_at<T: DeserializeOwned>(
    storage: &SecureStorage,
    tier: Tier,
    key: &str,
) -> Result<Option<T>> {
    let value = match tier {
        Tier::Session => storage.session().get_as(key).await?,
        Tier::Durable => storage.database().get_as(key).await?,
    };
    Ok(value)
}

async fn save_at<T: Serialize + ?Sized>(
    storage: &SecureStorage,
    tier: Tier,
    key: &str,
    ttl_ms: u64,
    value: &T,
) -> Result<()> {
    match tier {
        Tier::Session => {
            storage
                .session()
                .set(key, value, WriteOptions::encrypted().expires_in_ms(ttl_ms))
                .await?
        }
        Tier::Durable => {
            storage
                .database()
                .store(key, value, DurableOptions::expires_in_ms(ttl_ms))
                .await?
        }
    }
    Ok(())
}

async fn clear_at(storage: &SecureStorage, tier: Tier, key: &str) -> Result<()> {
    match tier {
        Tier::Session => storage.session().remove(key)?,
        Tier::Durable => storage.database().delete(key).await?,
    }
    Ok(())
}
