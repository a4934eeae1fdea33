//! Sync Agent command: `teamsync listen`.

use anyhow::Result;
use serde_json::json;

use teamsync::client::{AgentConfig, AgentState, SyncAgent};
use teamsync::config::TeamsyncConfig;
use teamsync::realtime::events::names;

/// Every event the server pushes to clients.
const SERVER_EVENTS: [&str; 7] = [
    names::TASK_CREATED,
    names::TASK_UPDATED,
    names::TASK_DELETED,
    names::TASK_ASSIGNED,
    names::TASK_ASSIGNED_TO_ME,
    names::COMMENT_ADDED,
    names::USER_PRESENCE,
];

pub async fn cmd_listen(
    config: &TeamsyncConfig,
    url: String,
    user: Option<String>,
    teams: Vec<String>,
) -> Result<()> {
    let mut agent_config = AgentConfig::new(url).with_backoff(config.backoff_policy());
    if let Some(user) = user {
        agent_config = agent_config.with_user(user);
    }
    let agent = SyncAgent::new(agent_config)?;

    for event in SERVER_EVENTS {
        agent.on(event, move |data| {
            println!("{}", json!({"event": event, "data": data}));
        });
    }
    for team in teams {
        agent.join(team);
    }

    let mut state = agent.watch_state();
    agent.connect().await;
    tracing::info!(url = %agent.url(), scopes = agent.active_scopes().len(), "Listening");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        }
        _ = state.wait_for(|s| *s == AgentState::Failed) => {
            tracing::error!("Gave up reconnecting");
        }
    }

    agent.disconnect().await;
    Ok(())
}
