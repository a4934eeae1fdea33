//! Client Sync Agent: one logical connection to the realtime endpoint.
//!
//! Owns a background task that connects, identifies, re-joins every active
//! scope, and reconnects with bounded backoff when the transport drops.
//! Inbound envelopes are dispatched to handlers registered with [`SyncAgent::on`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use super::backoff::{BackoffPolicy, BackoffState};
use super::handlers::{Handler, HandlerId, HandlerTable};
use crate::errors::ClientError;
use crate::realtime::events::{ClientMessage, Envelope};
use crate::realtime::ids::{ScopeId, UserId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected and `identify` has been sent.
    Identified,
    /// Retries exhausted. Only an explicit `connect()` leaves this state.
    Failed,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Identified => "identified",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// `ws://` or `wss://` URL of the `/ws` endpoint.
    pub url: String,
    /// Sent as `identify` on every connection when set.
    pub user_id: Option<UserId>,
    pub backoff: BackoffPolicy,
}

impl AgentConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_id: None,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn validate_url(url: &str) -> Result<(), ClientError> {
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(ClientError::InvalidUrl {
            url: url.to_string(),
            reason: "scheme must be ws:// or wss://".to_string(),
        });
    }
    url.into_client_request()
        .map(|_| ())
        .map_err(|e| ClientError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })
}

/// How a live session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Lost,
}

/// State shared between the agent handle and its connection task.
struct Shared {
    config: AgentConfig,
    state: watch::Sender<AgentState>,
    handlers: Mutex<HandlerTable>,
    scopes: Mutex<BTreeSet<ScopeId>>,
    /// Sender into the live session's writer. `None` while disconnected.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Dispatch holds this for reading; `disconnect` flips it under the write
    /// lock, so no handler can run once `disconnect` has returned.
    open: RwLock<bool>,
}

impl Shared {
    fn set_state(&self, next: AgentState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Sync agent state change");
        }
    }

    fn clear_outbound(&self) {
        lock(&self.outbound).take();
    }

    async fn dispatch(&self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed server frame");
                return;
            }
        };

        let open = self.open.read().await;
        if !*open {
            return;
        }
        let handlers = lock(&self.handlers).handlers_for(&envelope.event);
        for handler in handlers {
            handler(&envelope.data);
        }
    }
}

fn send_control(tx: &mpsc::UnboundedSender<String>, message: &ClientMessage) {
    match serde_json::to_string(message) {
        Ok(frame) => {
            let _ = tx.send(frame);
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize control message"),
    }
}

pub struct SyncAgent {
    shared: Arc<Shared>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl SyncAgent {
    pub fn new(config: AgentConfig) -> Result<Self, ClientError> {
        validate_url(&config.url)?;
        let (state, _) = watch::channel(AgentState::Disconnected);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state,
                handlers: Mutex::new(HandlerTable::new()),
                scopes: Mutex::new(BTreeSet::new()),
                outbound: Mutex::new(None),
                open: RwLock::new(true),
            }),
            task: Mutex::new(None),
        })
    }

    /// Start the connection task. No-op while one is already running.
    pub async fn connect(&self) {
        *self.shared.open.write().await = true;

        let mut task = lock(&self.task);
        if let Some((_, handle)) = task.as_ref()
            && !handle.is_finished()
        {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(Arc::clone(&self.shared), cancel.clone()));
        *task = Some((cancel, handle));
    }

    /// Stop retrying, close the socket, and deregister every handler and scope.
    pub async fn disconnect(&self) {
        let running = lock(&self.task).take();
        if let Some((cancel, _)) = &running {
            cancel.cancel();
        }

        *self.shared.open.write().await = false;
        let cleared = lock(&self.shared.handlers).clear();
        lock(&self.shared.scopes).clear();
        if cleared > 0 {
            tracing::debug!(handlers = cleared, "Cleared handlers on disconnect");
        }

        if let Some((_, handle)) = running {
            let _ = handle.await;
        }
        self.shared.clear_outbound();
        self.shared.set_state(AgentState::Disconnected);
    }

    /// Mark `scope` active. Sent now if connected, and again after every reconnect.
    pub fn join(&self, scope: impl Into<ScopeId>) {
        let scope = scope.into();
        let mut scopes = lock(&self.shared.scopes);
        if !scopes.insert(scope.clone()) {
            return;
        }
        if let Some(tx) = lock(&self.shared.outbound).as_ref() {
            send_control(tx, &ClientMessage::JoinTeam { scope_id: scope });
        }
    }

    pub fn leave(&self, scope: impl Into<ScopeId>) {
        let scope = scope.into();
        let mut scopes = lock(&self.shared.scopes);
        if !scopes.remove(&scope) {
            return;
        }
        if let Some(tx) = lock(&self.shared.outbound).as_ref() {
            send_control(tx, &ClientMessage::LeaveTeam { scope_id: scope });
        }
    }

    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        lock(&self.shared.handlers).insert(event, handler)
    }

    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        lock(&self.shared.handlers).remove(event, id)
    }

    /// Send `{"event", "data"}` as-is over the live connection.
    pub fn emit(&self, event: &str, payload: Value) -> Result<(), ClientError> {
        let frame = serde_json::to_string(&Envelope {
            event: event.to_string(),
            data: payload,
        })?;
        let outbound = lock(&self.shared.outbound);
        let tx = outbound.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(frame).map_err(|_| ClientError::NotConnected)
    }

    pub fn state(&self) -> AgentState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.shared.state.subscribe()
    }

    pub fn active_scopes(&self) -> Vec<ScopeId> {
        lock(&self.shared.scopes).iter().cloned().collect()
    }

    pub fn url(&self) -> &str {
        &self.shared.config.url
    }
}

impl Drop for SyncAgent {
    fn drop(&mut self) {
        if let Some((cancel, _)) = lock(&self.task).take() {
            cancel.cancel();
        }
    }
}

impl fmt::Debug for SyncAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncAgent")
            .field("url", &self.shared.config.url)
            .field("state", &self.state())
            .field("scopes", &self.active_scopes())
            .finish()
    }
}

// ── Connection task ──────────────────────────────────────────────────

async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    let url = shared.config.url.clone();
    let mut backoff = BackoffState::new(shared.config.backoff);

    loop {
        shared.set_state(AgentState::Connecting);
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        match attempt {
            Ok((stream, _)) => {
                backoff.reset();
                tracing::info!(url = %url, "Connected to realtime endpoint");
                let end = run_session(&shared, stream, &cancel).await;
                shared.clear_outbound();
                if end == SessionEnd::Cancelled {
                    break;
                }
                tracing::info!(url = %url, "Connection lost, reconnecting");
            }
            Err(e) => {
                let err = ClientError::ConnectFailed {
                    url: url.clone(),
                    source: e,
                };
                tracing::warn!(attempt = backoff.attempts(), error = %err, "Connection attempt failed");
            }
        }

        shared.set_state(AgentState::Disconnected);
        let Some(delay) = backoff.next_delay_and_advance() else {
            tracing::error!(
                attempts = backoff.attempts(),
                "Max reconnection attempts reached, giving up"
            );
            shared.set_state(AgentState::Failed);
            return;
        };
        tracing::info!(
            attempt = backoff.attempts(),
            max_attempts = backoff.max_attempts(),
            delay_ms = delay,
            "Scheduling reconnection"
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
        }
    }

    shared.set_state(AgentState::Disconnected);
}

/// Drive one live connection until it drops or the agent is cancelled.
async fn run_session(shared: &Shared, stream: WsStream, cancel: &CancellationToken) -> SessionEnd {
    let (mut write, mut read) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    if let Some(user_id) = &shared.config.user_id {
        send_control(
            &tx,
            &ClientMessage::Identify {
                user_id: user_id.clone(),
            },
        );
    }
    let rejoined = {
        // Snapshot and publish under the scopes lock so a concurrent join is
        // sent exactly once.
        let scopes = lock(&shared.scopes);
        for scope in scopes.iter() {
            send_control(
                &tx,
                &ClientMessage::JoinTeam {
                    scope_id: scope.clone(),
                },
            );
        }
        *lock(&shared.outbound) = Some(tx);
        scopes.len()
    };

    shared.set_state(AgentState::Connected);
    if shared.config.user_id.is_some() {
        shared.set_state(AgentState::Identified);
    }
    tracing::debug!(scopes = rejoined, "Re-joined active scopes");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Cancelled;
            }

            frame = rx.recv() => {
                let Some(frame) = frame else {
                    return SessionEnd::Lost;
                };
                if let Err(e) = write.send(Message::Text(frame)).await {
                    tracing::debug!(error = %e, "Failed to send frame");
                    return SessionEnd::Lost;
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => shared.dispatch(&text).await,
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "WebSocket receive error");
                        return SessionEnd::Lost;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_backoff(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay_ms: 10,
            max_delay_ms: 20,
            max_attempts,
            multiplier: 2.0,
        }
    }

    fn unreachable_agent(backoff: BackoffPolicy) -> SyncAgent {
        SyncAgent::new(
            AgentConfig::new("ws://127.0.0.1:1/ws")
                .with_user("alice")
                .with_backoff(backoff),
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_non_ws_urls() {
        let err = SyncAgent::new(AgentConfig::new("http://localhost:3141/ws")).unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl { .. }));
        assert!(SyncAgent::new(AgentConfig::new("ws://localhost:3141/ws")).is_ok());
    }

    #[test]
    fn test_emit_without_connection_is_not_connected() {
        let agent = unreachable_agent(fast_backoff(1));
        let err = agent.emit("task-created", json!({"id": "t1"})).unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[test]
    fn test_join_and_leave_track_active_scopes_offline() {
        let agent = unreachable_agent(fast_backoff(1));
        agent.join("team-b");
        agent.join("team-a");
        agent.join("team-a");
        assert_eq!(
            agent.active_scopes(),
            vec![ScopeId::from("team-a"), ScopeId::from("team-b")]
        );
        agent.leave("team-b");
        agent.leave("team-z");
        assert_eq!(agent.active_scopes(), vec![ScopeId::from("team-a")]);
        assert_eq!(agent.state(), AgentState::Disconnected);
    }

    #[tokio::test]
    async fn test_dispatch_reaches_handlers_until_off() {
        let agent = unreachable_agent(fast_backoff(1));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = agent.on("task-created", move |data| {
            assert_eq!(data["id"], "t1");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let frame = r#"{"event":"task-created","data":{"id":"t1","teamId":"team-a"}}"#;
        agent.shared.dispatch(frame).await;
        agent.shared.dispatch("not json").await;
        agent
            .shared
            .dispatch(r#"{"event":"task-deleted","data":{}}"#)
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(agent.off("task-created", id));
        agent.shared.dispatch(frame).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_handler_fires_after_disconnect() {
        let agent = unreachable_agent(fast_backoff(1));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        agent.on("task-updated", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        agent.join("team-a");

        agent.disconnect().await;
        agent
            .shared
            .dispatch(r#"{"event":"task-updated","data":{"id":"t1","teamId":"team-a"}}"#)
            .await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(agent.active_scopes().is_empty());
        assert_eq!(agent.state(), AgentState::Disconnected);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let agent = unreachable_agent(fast_backoff(2));
        let mut state = agent.watch_state();
        agent.connect().await;

        tokio::time::timeout(
            Duration::from_secs(10),
            state.wait_for(|s| *s == AgentState::Failed),
        )
        .await
        .expect("agent should give up")
        .unwrap();
        assert_eq!(agent.state(), AgentState::Failed);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_retry() {
        let slow = BackoffPolicy {
            initial_delay_ms: 60_000,
            max_delay_ms: 60_000,
            max_attempts: 5,
            multiplier: 1.0,
        };
        let agent = unreachable_agent(slow);
        agent.connect().await;

        // First attempt fails fast, then the agent sleeps for a minute.
        tokio::time::sleep(Duration::from_millis(200)).await;

        tokio::time::timeout(Duration::from_secs(5), agent.disconnect())
            .await
            .expect("disconnect must not wait for the retry delay");
        assert_eq!(agent.state(), AgentState::Disconnected);
    }
}
