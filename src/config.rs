//! Configuration for teamsync, read from `.teamsync/teamsync.toml`.
//!
//! Layered: file → environment (`TEAMSYNC_*`) → CLI flags. Every section
//! and field has a default, so an empty or missing file is valid.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! db_path = ".teamsync/teamsync.db"
//! cors_permissive = false
//!
//! [realtime]
//! presence_mode = "ref_count"      # or "anchor"
//! identity_policy = "trust_client" # or "require_session"
//! outbox_capacity = 256
//! ping_interval_secs = 30
//! pong_timeout_secs = 60
//!
//! [client]
//! initial_delay_ms = 1000
//! max_delay_ms = 30000
//! max_attempts = 10
//! multiplier = 2.0
//!
//! [logging]
//! level = "info"
//! format = "pretty"                # or "json"
//! dir = ".teamsync/logs"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::client::backoff::BackoffPolicy;
use crate::errors::ConfigError;
use crate::realtime::{HubOptions, IdentityPolicy, PresenceMode, SocketSettings};

/// Directory holding the config file, database and logs.
pub const CONFIG_DIR: &str = ".teamsync";

/// File name of the config file inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "teamsync.toml";

/// `.teamsync/teamsync.toml` relative to the working directory.
pub fn default_config_path() -> PathBuf {
    Path::new(CONFIG_DIR).join(CONFIG_FILE)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Permissive CORS for a separately served front end.
    pub cors_permissive: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
            db_path: PathBuf::from(".teamsync/teamsync.db"),
            cors_permissive: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSection {
    pub presence_mode: PresenceMode,
    pub identity_policy: IdentityPolicy,
    pub outbox_capacity: usize,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            presence_mode: PresenceMode::default(),
            identity_policy: IdentityPolicy::default(),
            outbox_capacity: crate::realtime::hub::DEFAULT_OUTBOX_CAPACITY,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub multiplier: f64,
}

impl Default for ClientSection {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            initial_delay_ms: policy.initial_delay_ms,
            max_delay_ms: policy.max_delay_ms,
            max_attempts: policy.max_attempts,
            multiplier: policy.multiplier,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
    /// Also write a daily rolling log file here when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

/// The complete teamsync.toml configuration structure.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamsyncConfig {
    pub server: ServerSection,
    pub realtime: RealtimeSection,
    pub client: ClientSection,
    pub logging: LoggingSection,
}

impl TeamsyncConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path` if it exists (defaults otherwise), then apply environment overrides.
    pub fn load_layered(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize teamsync.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `TEAMSYNC_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("TEAMSYNC_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("TEAMSYNC_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "TEAMSYNC_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(db_path) = lookup("TEAMSYNC_DB_PATH") {
            self.server.db_path = PathBuf::from(db_path);
        }
        if let Some(level) = lookup("TEAMSYNC_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.realtime.pong_timeout_secs <= self.realtime.ping_interval_secs {
            warnings.push(format!(
                "realtime.pong_timeout_secs ({}) should exceed ping_interval_secs ({})",
                self.realtime.pong_timeout_secs, self.realtime.ping_interval_secs
            ));
        }
        if self.realtime.ping_interval_secs == 0 {
            warnings.push("realtime.ping_interval_secs must be at least 1".to_string());
        }
        if self.realtime.outbox_capacity == 0 {
            warnings.push("realtime.outbox_capacity of 0 is treated as 1".to_string());
        }
        if self.client.multiplier < 1.0 {
            warnings.push(format!(
                "client.multiplier ({}) below 1.0 makes retry delays shrink",
                self.client.multiplier
            ));
        }
        if self.client.max_attempts == 0 {
            warnings.push("client.max_attempts of 0 disables reconnection".to_string());
        }
        if self.client.max_delay_ms < self.client.initial_delay_ms {
            warnings.push(format!(
                "client.max_delay_ms ({}) is below initial_delay_ms ({})",
                self.client.max_delay_ms, self.client.initial_delay_ms
            ));
        }

        warnings
    }

    pub fn hub_options(&self) -> HubOptions {
        HubOptions {
            presence_mode: self.realtime.presence_mode,
            outbox_capacity: self.realtime.outbox_capacity,
        }
    }

    pub fn socket_settings(&self) -> SocketSettings {
        SocketSettings {
            ping_interval: Duration::from_secs(self.realtime.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(self.realtime.pong_timeout_secs),
            identity_policy: self.realtime.identity_policy,
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay_ms: self.client.initial_delay_ms,
            max_delay_ms: self.client.max_delay_ms,
            max_attempts: self.client.max_attempts,
            multiplier: self.client.multiplier,
        }
    }
}
