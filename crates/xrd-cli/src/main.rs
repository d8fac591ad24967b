//! xrdmux CLI
//!
//! - `probe`: log in and show what the server negotiated
//! - `ping`: send concurrent pings over one session
//! - `config`: inspect or create the configuration file

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xrd_cli::commands;
use xrd_core::ClientConfig;

#[derive(Parser)]
#[command(name = "xrdmux")]
#[command(author, version, about = "Multiplexed client for XRootD-style storage servers")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// User name to log in as (overrides config)
    #[arg(short, long, global = true, env = "XRDMUX_USER")]
    user: Option<String>,

    /// Connect and login timeout in seconds (overrides config)
    #[arg(short, long, global = true)]
    timeout: Option<u64>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in to a server and show the negotiated session parameters
    Probe {
        /// Server address (host, host:port or root://host)
        addr: String,
    },

    /// Send pings to a server over one multiplexed session
    Ping {
        /// Server address (host, host:port or root://host)
        addr: String,
        /// Number of concurrent pings
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show the config file path
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(config_path),
            ConfigAction::Path => {
                commands::config_path(config_path);
                Ok(())
            }
            ConfigAction::Init { force } => commands::config_init(config_path, force),
        },
        Commands::Probe { addr } => {
            let config = client_config(config_path, cli.user, cli.timeout)?;
            commands::probe_command(&addr, &config).await
        }
        Commands::Ping { addr, count } => {
            let config = client_config(config_path, cli.user, cli.timeout)?;
            commands::ping_command(&addr, &config, count).await
        }
    }
}

/// Configuration file plus command-line overrides
fn client_config(
    path: Option<&Path>,
    user: Option<String>,
    timeout: Option<u64>,
) -> Result<ClientConfig> {
    let mut config = commands::load_client_config(path)?;
    if let Some(user) = user {
        config.username = user;
    }
    if let Some(secs) = timeout {
        config.connect_timeout = Duration::from_secs(secs);
    }
    Ok(config)
}
