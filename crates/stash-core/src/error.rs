use thiserror::Error;

/// Errors produced by the storage tiers and their backends.
///
/// Messages carry keys and backend reasons only; values and key bytes never
/// end up in an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A required platform primitive (session storage, structured storage,
    /// cryptography) is missing.
    #[error("environment unavailable: {primitive}")]
    EnvironmentUnavailable { primitive: String },
    /// Ciphertext could not be decrypted (wrong or missing key, corruption).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },
    /// Stored or supplied payload is not valid JSON for the expected shape.
    #[error("serialization failed: {reason}")]
    Serialization { reason: String },
    /// Structured-storage backend rejected or failed a transaction.
    #[error("transaction failed: {reason}")]
    Transaction { reason: String },
    /// Caller passed an argument the layer cannot honor.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
}

impl StorageError {
    pub fn serialization<E: ToString>(err: E) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }

    pub fn transaction<E: ToString>(err: E) -> Self {
        Self::Transaction {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}
