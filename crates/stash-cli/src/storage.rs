use std::path::PathBuf;

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use stash_core::storage::InMemoryKeyValue;
use stash_storage::{
    file_kv::JsonFileKeyValue, file_table::FileRecordTable, key_manager::DEFAULT_KDF_ITERATIONS,
    SecureStorage, SessionKeyManager,
};
use tracing::debug;

const RECORDS_DIR: &str = "records";
const LEGACY_FILE: &str = "legacy.json";

/// Resolve the default data directory for stash.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("stash"))
}

pub fn data_dir_from_config(config: &Config) -> Result<PathBuf> {
    match &config.data_dir {
        Some(root) => Ok(root.clone()),
        None => default_data_dir(),
    }
}

pub fn legacy_path_from_config(config: &Config) -> Result<PathBuf> {
    match &config.legacy_store {
        Some(path) => Ok(path.clone()),
        None => Ok(data_dir_from_config(config)?.join(LEGACY_FILE)),
    }
}

/// Open the legacy plaintext store on its own.
pub fn legacy_store(config: &Config) -> Result<JsonFileKeyValue> {
    Ok(JsonFileKeyValue::new(legacy_path_from_config(config)?))
}

/// Build the facade from config: file-backed durable tier, process-scoped
/// session tier, file-backed legacy store.
pub fn storage_from_config(config: &Config) -> Result<SecureStorage> {
    let root = data_dir_from_config(config)?;
    let legacy = legacy_path_from_config(config)?;
    let iterations = config.kdf_iterations.unwrap_or(DEFAULT_KDF_ITERATIONS);
    debug!(?root, ?legacy, iterations, "initializing secure storage");
    Ok(storage_at(root, legacy, iterations))
}

fn storage_at(root: PathBuf, legacy: PathBuf, iterations: u32) -> SecureStorage {
    SecureStorage::builder()
        .session_backend(InMemoryKeyValue::new())
        .record_table(FileRecordTable::new(root.join(RECORDS_DIR)))
        .legacy_store(JsonFileKeyValue::new(legacy))
        .key_provider(SessionKeyManager::with_iterations(iterations))
        .build()
}

/// Helper for tests to construct storage rooted at a temp dir with a cheap KDF.
#[cfg(test)]
pub fn test_storage(root: impl Into<PathBuf>) -> SecureStorage {
    let root = root.into();
    let legacy = root.join(LEGACY_FILE);
    storage_at(root, legacy, 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_path_defaults_under_data_dir() {
        let config = Config {
            data_dir: Some(PathBuf::from("/tmp/stash-data")),
            ..Config::default()
        };
        assert_eq!(
            legacy_path_from_config(&config).expect("path"),
            PathBuf::from("/tmp/stash-data/legacy.json")
        );
    }

    #[test]
    fn configured_storage_is_secure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            data_dir: Some(dir.path().to_path_buf()),
            kdf_iterations: Some(10),
            ..Config::default()
        };
        let storage = storage_from_config(&config).expect("storage");
        assert!(storage.is_secure_storage_available());
    }
}
