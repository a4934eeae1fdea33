use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{
        Query,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::events::ClientMessage;
use super::hub::RealtimeHub;
use super::ids::{ConnectionId, UserId};

/// Default interval between WebSocket Ping frames.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default time to wait for a Pong before considering the connection dead.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// How far the server trusts the `userId` a client declares in `identify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// Bind whatever the client declares.
    #[default]
    TrustClient,
    /// Only bind the user behind the session token presented at upgrade.
    RequireSession,
}

/// Resolves a session token to the authenticated user.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Option<UserId>;
}

#[derive(Debug, Clone, Copy)]
pub struct SocketSettings {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub identity_policy: IdentityPolicy,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            ping_interval: PING_INTERVAL,
            pong_timeout: PONG_TIMEOUT,
            identity_policy: IdentityPolicy::default(),
        }
    }
}

/// Everything the `/ws` endpoint needs.
#[derive(Clone)]
pub struct RealtimeState {
    pub hub: Arc<RealtimeHub>,
    pub settings: SocketSettings,
    pub sessions: Option<Arc<dyn SessionResolver>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Decides whether an `identify` may bind the declared user.
#[derive(Debug, Clone)]
pub struct IdentityGuard {
    policy: IdentityPolicy,
    session_user: Option<UserId>,
}

impl IdentityGuard {
    pub fn new(policy: IdentityPolicy, session_user: Option<UserId>) -> Self {
        Self {
            policy,
            session_user,
        }
    }

    pub fn permits(&self, declared: &UserId) -> bool {
        match self.policy {
            IdentityPolicy::TrustClient => true,
            IdentityPolicy::RequireSession => self.session_user.as_ref() == Some(declared),
        }
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    state: RealtimeState,
) -> impl IntoResponse {
    let session_user = match state.settings.identity_policy {
        IdentityPolicy::TrustClient => None,
        IdentityPolicy::RequireSession => resolve_session(&state, &params, &headers).await,
    };
    let guard = IdentityGuard::new(state.settings.identity_policy, session_user);
    ws.on_upgrade(move |socket| run_socket_loop(socket, state, guard))
}

async fn resolve_session(
    state: &RealtimeState,
    params: &WsParams,
    headers: &HeaderMap,
) -> Option<UserId> {
    let token = params.token.clone().or_else(|| bearer_token(headers))?;
    let sessions = state.sessions.as_ref()?;
    sessions.resolve(&token).await
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Socket loop: outbox forwarding, inbound dispatch and ping/pong keepalive
/// in one select. The connection is removed from the hub however the loop
/// ends; removing it from the hub elsewhere closes the outbox and ends the loop.
async fn run_socket_loop(socket: WebSocket, state: RealtimeState, guard: IdentityGuard) {
    let (mut sender, mut receiver) = socket.split();
    let (connection_id, mut outbound) = state.hub.on_connect();
    let settings = state.settings;

    let mut ping_interval = tokio::time::interval(settings.ping_interval);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > settings.pong_timeout {
                    tracing::info!(connection_id = %connection_id, "Pong timeout, closing connection");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        if sender.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_frame(&state.hub, connection_id, text.as_str(), &guard);
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    state.hub.on_disconnect(connection_id);
    let _ = sender.send(Message::Close(None)).await;
}

/// Apply one inbound text frame to the hub. Malformed frames are dropped.
pub fn dispatch_frame(
    hub: &RealtimeHub,
    connection_id: ConnectionId,
    text: &str,
    guard: &IdentityGuard,
) {
    let Some(message) = ClientMessage::parse(text) else {
        return;
    };
    match message {
        ClientMessage::Identify { user_id } => {
            if guard.permits(&user_id) {
                hub.identify(connection_id, user_id);
            } else {
                tracing::warn!(
                    connection_id = %connection_id,
                    declared = %user_id,
                    "Rejected identify that does not match the session user"
                );
            }
        }
        ClientMessage::JoinTeam { scope_id } => hub.join(connection_id, scope_id),
        ClientMessage::LeaveTeam { scope_id } => hub.leave(connection_id, &scope_id),
        relayed => {
            if let Some(event) = relayed.into_domain_event() {
                hub.broadcast(&event);
            }
        }
    }
}
