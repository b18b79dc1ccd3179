#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::uninlined_format_args
)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use nickshift::config::{self, BotMode, Config};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "nickshift")]
#[command(version)]
#[command(about = "Discord nickname rotator and key desk.", long_about = None)]
struct Cli {
    /// Path to config.toml (defaults to $NICKSHIFT_CONFIG, then ~/.nickshift/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rename members in the configured channel on every message
    Nick,

    /// Hand out pooled keys to members holding the required role
    Keys,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install default crypto provider for Rustls TLS.
    // Without it rustls cannot pick a provider when more than one backend is compiled in.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    let cli = Cli::parse();

    // Schema output stays stdout-only: no config load, no logging.
    let mode = match cli.command {
        Commands::Config {
            config_command: ConfigCommands::Schema,
        } => {
            println!("{}", config::schema_json()?);
            return Ok(());
        }
        Commands::Nick => BotMode::Nickname,
        Commands::Keys => BotMode::Keys,
    };

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = Config::load(cli.config.as_deref()).await?;
    config.apply_env_overrides();
    config.validate(mode)?;

    if let Some(path) = &config.config_path {
        tracing::info!("Loaded config from {}", path.display());
    }

    nickshift::daemon::run(config, mode).await
}
