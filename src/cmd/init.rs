//! Project setup command: `teamsync init`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use teamsync::board::db::BoardDb;
use teamsync::config::TeamsyncConfig;

pub fn cmd_init(config_path: &Path, config: &TeamsyncConfig, db_path: Option<PathBuf>) -> Result<()> {
    if let Some(dir) = config_path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        TeamsyncConfig::default().save(config_path)?;
        println!("Created {}", config_path.display());
    }

    let db_path = db_path.unwrap_or_else(|| config.server.db_path.clone());
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    BoardDb::new(&db_path)?;
    println!("Database initialized at {}", db_path.display());
    Ok(())
}
