use std::{
    env,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use color_eyre::{eyre::WrapErr, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "STASH_CONFIG";

/// User-level configuration, read from `$STASH_CONFIG` or
/// `<config_dir>/stash/config.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the durable record store directory.
    pub data_dir: Option<PathBuf>,
    /// Path of the legacy plaintext store (JSON object file).
    pub legacy_store: Option<PathBuf>,
    /// PBKDF2 iterations for the session key.
    pub kdf_iterations: Option<u32>,
    /// Default migration allow-list.
    pub migration: Option<MigrationConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationConfig {
    #[serde(default)]
    pub keys: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::read(&config_path()?)
    }

    /// Missing files and files without any settings yield the defaults.
    pub fn read(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err).wrap_err_with(|| format!("reading {}", path.display()));
            }
        };
        let config: Self =
            toml::from_str(&contents).wrap_err_with(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn migration_keys(&self) -> Vec<String> {
        self.migration
            .as_ref()
            .map(|m| m.keys.clone())
            .unwrap_or_default()
    }

    /// Persist this config at the resolved path unless a file already exists there.
    pub fn init(&self) -> Result<PathBuf> {
        let path = config_path()?;
        self.init_at(&path)?;
        Ok(path)
    }

    /// Returns `false` when a file was already present.
    fn init_at(&self, path: &Path) -> Result<bool> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => return Err(err).wrap_err_with(|| format!("creating {}", path.display())),
        };
        file.write_all(toml::to_string_pretty(self)?.as_bytes())?;
        Ok(true)
    }

    fn validate(&self) -> Result<()> {
        if self.kdf_iterations == Some(0) {
            color_eyre::eyre::bail!("kdf_iterations must be at least 1");
        }
        if self.migration_keys().iter().any(String::is_empty) {
            color_eyre::eyre::bail!("[migration] keys must not contain empty keys");
        }
        Ok(())
    }
}

/// `$STASH_CONFIG` when set, otherwise the platform config directory.
pub fn config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("stash").join("config.toml"))
}
