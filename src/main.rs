use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use teamsync::config::{TeamsyncConfig, default_config_path};

mod cmd;

#[derive(Parser)]
#[command(name = "teamsync")]
#[command(version, about = "Team task board with room-scoped realtime sync")]
pub struct Cli {
    /// Path to teamsync.toml (defaults to .teamsync/teamsync.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the REST API and realtime WebSocket server
    Serve {
        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,

        /// SQLite database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Create the database and a default teamsync.toml
    Init {
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Connect a Sync Agent and print every received event as a JSON line
    Listen {
        /// WebSocket URL, e.g. ws://127.0.0.1:3141/ws
        #[arg(long)]
        url: String,

        /// User id to identify as
        #[arg(long)]
        user: Option<String>,

        /// Team scope to join (repeatable)
        #[arg(long = "team")]
        teams: Vec<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    // `config` reports load errors itself instead of failing up front.
    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(&config_path, command.clone());
    }

    let mut config = TeamsyncConfig::load_layered(&config_path)?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    let _log_guard = teamsync::logging::init(&config.logging)?;

    match cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
        } => cmd::cmd_serve(config, port, host, db_path).await?,
        Commands::Init { db_path } => cmd::cmd_init(&config_path, &config, db_path)?,
        Commands::Listen { url, user, teams } => cmd::cmd_listen(&config, url, user, teams).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
