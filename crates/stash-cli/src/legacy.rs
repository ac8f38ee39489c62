use color_eyre::Result;
use serde_json::Value;
use stash_core::{storage::KeyValueBackend, StorageError};
use stash_storage::{MigrationFailure, MigrationReport};

use crate::{cli::LegacyCommand, config, storage};

/// Execute a legacy-store subcommand.
pub async fn handle(cmd: LegacyCommand, config: &config::Config) -> Result<()> {
    let legacy = storage::legacy_store(config)?;
    match cmd {
        LegacyCommand::Set { key, value } => {
            legacy.set_item(&key, &value)?;
            println!("Wrote {key} to {}", legacy.path().display());
        }
        LegacyCommand::List => {
            let keys = legacy.keys()?;
            if keys.is_empty() {
                println!("Legacy store is empty.");
            }
            for key in keys {
                println!("{key}");
            }
        }
    }
    Ok(())
}

/// Report how the given keys, or the configured allow-list when none are
/// given, would migrate. The CLI session tier ends with the process, so the
/// legacy store is never modified here.
pub fn migrate(keys: Vec<String>, config: &config::Config) -> Result<()> {
    let keys = if keys.is_empty() {
        config.migration_keys()
    } else {
        keys
    };
    if keys.is_empty() {
        color_eyre::eyre::bail!("no keys given and no [migration] keys configured");
    }

    let report = preview(&storage::legacy_store(config)?, &keys)?;
    print!("{}", render_report(&report));
    Ok(())
}

/// Classify keys the way a migration would, without writing anything.
fn preview(legacy: &dyn KeyValueBackend, keys: &[String]) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    for key in keys {
        match legacy.get_item(key)? {
            None => report.skipped.push(key.clone()),
            Some(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(_) => report.migrated.push(key.clone()),
                Err(err) => report.failed.push(MigrationFailure {
                    key: key.clone(),
                    error: StorageError::from(err),
                }),
            },
        }
    }
    Ok(report)
}

fn render_report(report: &MigrationReport) -> String {
    let mut out = String::new();
    for key in &report.migrated {
        out.push_str(&format!("migrated  {key}\n"));
    }
    for key in &report.skipped {
        out.push_str(&format!("skipped   {key}\n"));
    }
    for failure in &report.failed {
        out.push_str(&format!("failed    {}: {}\n", failure.key, failure.error));
    }
    out
}
