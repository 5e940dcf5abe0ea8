//! mpapi - command-line client for the session relay
//!
//! # Commands
//!
//! - `mpapi serve` - run a relay server
//! - `mpapi list` - list public sessions
//! - `mpapi host` - host a session and print incoming events
//! - `mpapi join <SESSION>` - join a session and print incoming events
//! - `mpapi auto` - join the first public session, or host one if none exist
//!
//! Connection settings come from `config.toml` (see [`config`]) and can be
//! overridden with `--host`, `--port`, `--identifier` and `--debug`.

mod commands;
mod config;
mod state;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppConfig, Overrides};

/// Command-line client for the mpapi session relay
#[derive(Parser)]
#[command(name = "mpapi")]
#[command(about = "Host, join and list relay sessions")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Relay server host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Relay server port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// 36-character application identifier
    #[arg(long, global = true)]
    identifier: Option<String>,

    /// Player name sent with host and join
    #[arg(long, global = true)]
    name: Option<String>,

    /// Log raw protocol lines
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a relay server on the configured port
    Serve,

    /// List public sessions
    List,

    /// Host a new session
    Host(commands::HostArgs),

    /// Join a session by code
    Join(commands::JoinArgs),

    /// Join the first public session, or host one if there is none
    Auto(commands::PlayArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.connection.config.as_deref())?;
    config.apply_overrides(Overrides {
        host: cli.connection.host,
        port: cli.connection.port,
        identifier: cli.connection.identifier,
        debug: cli.connection.debug,
        name: cli.connection.name,
    });

    match cli.command {
        Commands::Serve => commands::serve(&config).await,
        Commands::List => commands::list(&config).await,
        Commands::Host(args) => commands::host(&config, &args).await,
        Commands::Join(args) => commands::join(&config, &args).await,
        Commands::Auto(args) => commands::auto(&config, &args).await,
    }
}
