//! Board server command: `teamsync serve`.

use std::path::PathBuf;

use anyhow::Result;

use teamsync::board::server::{ServerConfig, start_server};
use teamsync::config::TeamsyncConfig;

pub async fn cmd_serve(
    mut config: TeamsyncConfig,
    port: Option<u16>,
    host: Option<String>,
    db_path: Option<PathBuf>,
) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(db_path) = db_path {
        config.server.db_path = db_path;
    }

    for warning in config.validate() {
        tracing::warn!("Config: {}", warning);
    }

    start_server(ServerConfig::from(&config)).await
}
