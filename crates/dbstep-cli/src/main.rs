//! Command line migration tool
//!
//! Thin front end over the `dbstep` library: builds a [`MigrateConfig`]
//! from flags (optionally layered over a JSON config file) and either runs
//! the migration or, with `--check`, reports whether one is needed.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use dbstep::{Migrate, MigrateConfig, MigrationError, MigrationResult};

#[derive(Parser)]
#[command(name = "dbstep")]
#[command(about = "Migrate a database's schema to the version your code expects")]
struct Cli {
    /// The database URL
    #[arg(long)]
    url: Option<String>,

    /// The database user
    #[arg(long)]
    user: Option<String>,

    /// The database password
    #[arg(long)]
    password: Option<String>,

    /// The client's target schema version
    #[arg(long)]
    version: Option<i64>,

    /// Apply every resolvable migration instead of stopping at a target
    #[arg(long)]
    auto: bool,

    /// Name of the table holding the schema version row
    #[arg(long)]
    table: Option<String>,

    /// Resolution root the migration scripts live under
    #[arg(long)]
    root: Option<String>,

    /// Read configuration from a JSON file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Report whether a migration is needed instead of running one
    #[arg(long)]
    check: bool,
}

impl Cli {
    /// Layer the flags over the config file, flags winning
    fn into_config(self) -> MigrationResult<MigrateConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    MigrationError::Configuration(format!(
                        "could not read config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                serde_json::from_str(&text).map_err(|e| {
                    MigrationError::Configuration(format!(
                        "invalid config file {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
            None => MigrateConfig::default(),
        };

        if let Some(url) = self.url {
            config.url = url;
        }
        if self.user.is_some() {
            config.user = self.user;
        }
        if self.password.is_some() {
            config.password = self.password;
        }
        if self.version.is_some() {
            config.version = self.version;
        }
        if self.auto {
            config.auto = true;
        }
        if let Some(table) = self.table {
            config.table = table;
        }
        if let Some(root) = self.root {
            config.root = root;
        }
        Ok(config)
    }
}

async fn run(cli: Cli) -> MigrationResult<ExitCode> {
    let check = cli.check;
    let migrate = Migrate::new(cli.into_config()?);

    if check {
        if migrate.needs_migrate().await? {
            println!("database needs migration");
            Ok(ExitCode::from(1))
        } else {
            println!("database is up to date");
            Ok(ExitCode::SUCCESS)
        }
    } else {
        if migrate.migrate().await? {
            println!("database migrated");
        } else {
            println!("database already up to date");
        }
        Ok(ExitCode::SUCCESS)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err @ MigrationError::Configuration(_)) => {
            eprintln!("{}", err);
            eprintln!();
            let _ = Cli::command().print_help();
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("migration failed: {}", err);
            // Surface the underlying cause chain for diagnosability
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                eprintln!("  caused by: {}", cause);
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
