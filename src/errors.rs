//! Typed error hierarchy for teamsync.
//!
//! Three top-level enums cover the three fallible subsystems:
//! - `BoardError`: REST collaborators (auth, teams, tasks, comments)
//! - `ClientError`: the client-side Sync Agent
//! - `ConfigError`: loading and validating `teamsync.toml`
//!
//! The realtime hub has no error type: unknown ids are no-ops and delivery
//! failures are swallowed.

use thiserror::Error;

/// Errors from the REST layer and its persistence.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Not a member of team {team_id}")]
    NotTeamMember { team_id: String },

    #[error("Only the team owner may {action}")]
    OwnerOnly { action: &'static str },

    #[error("Username '{username}' is already taken")]
    UsernameTaken { username: String },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Missing or invalid session token")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl BoardError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Errors surfaced by the client-side Sync Agent.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Failed to connect to {url}: {source}")]
    ConnectFailed {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("Failed to serialize outbound message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_error_not_found_carries_entity_and_id() {
        let err = BoardError::not_found("Task", "t1");
        match &err {
            BoardError::NotFound { entity, id } => {
                assert_eq!(*entity, "Task");
                assert_eq!(id, "t1");
            }
            _ => panic!("Expected NotFound"),
        }
        assert_eq!(err.to_string(), "Task t1 not found");
    }

    #[test]
    fn board_error_database_keeps_source() {
        let err = BoardError::Database(anyhow::anyhow!("disk full"));
        assert!(err.to_string().contains("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn config_error_parse_from_toml() {
        let toml_err = toml::from_str::<toml::Value>("= nope").unwrap_err();
        let err: ConfigError = toml_err.into();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn client_error_not_connected_is_matchable() {
        let err = ClientError::NotConnected;
        assert!(matches!(err, ClientError::NotConnected));
        assert_eq!(err.to_string(), "Not connected");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&BoardError::Unauthorized);
        assert_std_error(&ClientError::NotConnected);
        assert_std_error(&ConfigError::InvalidValue {
            key: "server.port",
            value: "x".into(),
        });
    }
}
