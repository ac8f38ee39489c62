use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageError;

/// Envelope wrapping every value written to the session tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub value: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub encrypted: bool,
}

impl StoredRecord {
    pub fn new(
        value: Value,
        now: DateTime<Utc>,
        expires_in_ms: Option<u64>,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            value,
            created_at: now,
            expires_at: expiry_from(now, expires_in_ms)?,
            encrypted: false,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expires_at, now)
    }
}

/// Row of the durable tier's single logical table, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableRecord {
    pub id: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl DurableRecord {
    pub fn new(
        id: impl Into<String>,
        data: Value,
        now: DateTime<Utc>,
        expires_in_ms: Option<u64>,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            id: id.into(),
            data,
            created_at: now,
            expires_at: expiry_from(now, expires_in_ms)?,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expires_at, now)
    }
}

/// Options for session-tier writes. Encryption is on unless turned off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub encrypt: bool,
    pub expires_in_ms: Option<u64>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            encrypt: true,
            expires_in_ms: None,
        }
    }
}

impl WriteOptions {
    pub fn encrypted() -> Self {
        Self::default()
    }

    pub fn plaintext() -> Self {
        Self {
            encrypt: false,
            ..Self::default()
        }
    }

    pub fn expires_in_ms(mut self, ms: u64) -> Self {
        self.expires_in_ms = Some(ms);
        self
    }
}

/// Options for durable-tier writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurableOptions {
    pub expires_in_ms: Option<u64>,
}

impl DurableOptions {
    pub fn expires_in_ms(ms: u64) -> Self {
        Self {
            expires_in_ms: Some(ms),
        }
    }
}

/// Visible iff there is no expiry or `now` is strictly before it.
pub fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(expires_at, Some(at) if now >= at)
}

fn expiry_from(
    now: DateTime<Utc>,
    expires_in_ms: Option<u64>,
) -> Result<Option<DateTime<Utc>>, StorageError> {
    let Some(ms) = expires_in_ms else {
        return Ok(None);
    };
    let invalid = || StorageError::InvalidArgument {
        reason: format!("expiresInMs out of range: {ms}"),
    };
    let ms = i64::try_from(ms).map_err(|_| invalid())?;
    let ttl = Duration::try_milliseconds(ms).ok_or_else(invalid)?;
    now.checked_add_signed(ttl).map(Some).ok_or_else(invalid)
}
