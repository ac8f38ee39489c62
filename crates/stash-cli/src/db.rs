use color_eyre::Result;
use serde_json::Value;
use stash_core::DurableOptions;
use stash_storage::SecureStorage;

use crate::{cli::DbCommand, config, storage};

/// Execute a durable-store subcommand.
pub async fn handle(cmd: DbCommand, config: &config::Config) -> Result<()> {
    let storage = storage::storage_from_config(config)?;
    let output = run(cmd, &storage).await?;
    println!("{output}");
    Ok(())
}

async fn run(cmd: DbCommand, storage: &SecureStorage) -> Result<String> {
    let db = storage.database();
    let output = match cmd {
        DbCommand::Store { id, json, ttl_ms } => {
            let data: Value = serde_json::from_str(&json)
                .map_err(|e| color_eyre::eyre::eyre!("payload is not valid JSON: {e}"))?;
            db.store(&id, &data, DurableOptions { expires_in_ms: ttl_ms })
                .await?;
            format!("Stored {id}")
        }
        DbCommand::Get { id } => match db.get(&id).await? {
            Some(value) => serde_json::to_string_pretty(&value)?,
            None => format!("No record for {id}"),
        },
        DbCommand::Delete { id } => {
            db.delete(&id).await?;
            format!("Deleted {id}")
        }
        DbCommand::Sweep => {
            let removed = db.clear_expired().await?;
            format!("Removed {removed} expired record(s)")
        }
    };
    Ok(output)
}
