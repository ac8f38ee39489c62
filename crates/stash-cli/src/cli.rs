use clap::{Parser, Subcommand, ValueEnum};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "stash",
    about = "Encrypted two-tier storage for sensitive client state",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Optional subcommand; defaults to a health check when absent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Round-trip a probe through both storage tiers and report availability.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Work with the durable record store.
    #[command(subcommand)]
    Db(DbCommand),
    /// Inspect or seed the legacy plaintext store.
    #[command(subcommand)]
    Legacy(LegacyCommand),
    /// Report how legacy plaintext entries would move into encrypted storage.
    Migrate {
        /// Keys to check; defaults to `[migration] keys` from the config.
        keys: Vec<String>,
    },
    /// Remove every record a domain adapter owns.
    Clear {
        #[arg(value_enum)]
        domain: Domain,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum DbCommand {
    /// Store a JSON value under an id.
    Store {
        id: String,
        /// JSON payload, e.g. '{"items":[1,2]}'.
        json: String,
        /// Expire the record after this many milliseconds.
        #[arg(long)]
        ttl_ms: Option<u64>,
    },
    /// Print the value stored under an id.
    Get { id: String },
    /// Delete a record.
    Delete { id: String },
    /// Delete every expired record.
    Sweep,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum LegacyCommand {
    /// Write a raw value into the legacy store.
    Set { key: String, value: String },
    /// List keys present in the legacy store.
    List,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Cart,
    Auth,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_none_when_missing_subcommand() {
        let cli = Cli::try_parse_from(["stash"]).expect("parse should succeed");
        assert_eq!(cli.command, None);
    }

    #[test]
    fn parses_health_subcommand() {
        let cli = Cli::try_parse_from(["stash", "health"]).expect("parse should succeed");
        assert_eq!(cli.command, Some(Command::Health));
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli = Cli::try_parse_from(["stash", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Some(Command::Config(ConfigCommand::Init)));
    }

    #[test]
    fn parses_db_store_with_ttl() {
        let cli = Cli::try_parse_from([
            "stash",
            "db",
            "store",
            "cartState",
            r#"{"items":[1,2]}"#,
            "--ttl-ms",
            "86400000",
        ])
        .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Some(Command::Db(DbCommand::Store {
                id: "cartState".into(),
                json: r#"{"items":[1,2]}"#.into(),
                ttl_ms: Some(86_400_000),
            }))
        );
    }

    #[test]
    fn parses_migrate_keys_and_clear_domain() {
        let cli = Cli::try_parse_from(["stash", "migrate", "cart", "email"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Some(Command::Migrate {
                keys: vec!["cart".into(), "email".into()],
            })
        );
        assert!(Cli::try_parse_from(["stash", "migrate", "cart", "--apply"]).is_err());

        let cli = Cli::try_parse_from(["stash", "clear", "auth"]).expect("parse should succeed");
        assert_eq!(
            cli.command,
            Some(Command::Clear {
                domain: Domain::Auth
            })
        );
    }
}
