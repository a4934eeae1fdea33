//! Configuration view and validation commands: `teamsync config`.

use std::path::Path;

use anyhow::{Context, Result};

use teamsync::config::TeamsyncConfig;

use super::super::ConfigCommands;

pub fn cmd_config(config_path: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No config file at {} (using defaults)", config_path.display());
            }
            println!("Effective values (with env overrides):");
            println!();

            let config = TeamsyncConfig::load_layered(config_path)?;
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No teamsync.toml found. Using defaults (valid).");
                return Ok(());
            }

            let config = TeamsyncConfig::load(config_path)?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
