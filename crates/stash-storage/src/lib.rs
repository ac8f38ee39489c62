//! Storage tiers with encryption at rest.
//! The session tier seals records with AES-GCM under a key derived once per
//! process; the durable tier keeps larger payloads in a structured table.

pub mod cipher;
pub mod durable;
pub mod environment;
pub mod ephemeral;
pub mod facade;
pub mod file_kv;
pub mod file_table;
pub mod key_manager;

pub use durable::DurableStore;
pub use environment::{classify_environment, Capabilities, StorageMode};
pub use ephemeral::{EphemeralStore, TeardownGuard};
pub use facade::{MigrationFailure, MigrationReport, SecureStorage, SecureStorageBuilder};
pub use key_manager::{
    KeyError, KeyMaterial, KeyProvider, SessionKeyManager, UnavailableKeyProvider,
};
