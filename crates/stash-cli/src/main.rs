mod cli;
mod config;
mod db;
mod legacy;
mod storage;

use crate::cli::{ConfigCommand, Domain};
use clap::Parser;
use color_eyre::Result;
use serde_json::json;
use stash_core::{DurableOptions, WriteOptions};
use stash_domain::{AuthStorage, CartStorage, OwnedRecords};
use stash_storage::SecureStorage;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const HEALTH_PROBE_KEY: &str = "health/probe";

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::Config::load()?;
    match cli.command.unwrap_or(cli::Command::Health) {
        cli::Command::Version => print_version(),
        cli::Command::Health => run_health_check(&config).await?,
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        cli::Command::Db(cmd) => db::handle(cmd, &config).await?,
        cli::Command::Legacy(cmd) => legacy::handle(cmd, &config).await?,
        cli::Command::Migrate { keys } => legacy::migrate(keys, &config)?,
        cli::Command::Clear { domain } => run_clear(domain, &config).await?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("stash {}", env!("CARGO_PKG_VERSION"));
}

/// Runs a quick health check of both storage tiers.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let storage = storage::storage_from_config(config)?;
    run_storage_health(&storage).await?;
    println!("Mode: {}", storage.mode());
    println!(
        "Secure storage available: {}",
        storage.is_secure_storage_available()
    );
    println!("Storage: ok");
    Ok(())
}

async fn run_storage_health(storage: &SecureStorage) -> Result<()> {
    let _teardown = storage.teardown_guard();
    let payload = json!({"ok": true});

    storage
        .session()
        .set(HEALTH_PROBE_KEY, &payload, WriteOptions::encrypted())
        .await?;
    let session_round_trip = storage.session().get(HEALTH_PROBE_KEY).await?;
    storage.session().remove(HEALTH_PROBE_KEY)?;

    storage
        .database()
        .store(HEALTH_PROBE_KEY, &payload, DurableOptions::expires_in_ms(60_000))
        .await?;
    let database_round_trip = storage.database().get(HEALTH_PROBE_KEY).await?;
    storage.database().delete(HEALTH_PROBE_KEY).await?;

    if session_round_trip.as_ref() != Some(&payload) {
        color_eyre::eyre::bail!("session storage round-trip failed");
    }
    if database_round_trip.as_ref() != Some(&payload) {
        color_eyre::eyre::bail!("database storage round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config.init()?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

async fn run_clear(domain: Domain, config: &config::Config) -> Result<()> {
    let storage = storage::storage_from_config(config)?;
    let owner = owner_for(domain, storage);
    clear_owner(owner.as_ref()).await?;
    println!("Cleared {} records", owner.name());
    Ok(())
}

fn owner_for(domain: Domain, storage: SecureStorage) -> Box<dyn OwnedRecords> {
    match domain {
        Domain::Cart => Box::new(CartStorage::new(storage)),
        Domain::Auth => Box::new(AuthStorage::new(storage)),
    }
}

async fn clear_owner(owner: &dyn OwnedRecords) -> Result<()> {
    owner
        .clear_all()
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))
}
