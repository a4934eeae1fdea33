//! End-to-end realtime tests: a real server on a loopback port, raw
//! WebSocket clients and the Sync Agent.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use serde_json::{Map, Value, json};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tower::ServiceExt;

use teamsync::board::SharedState;
use teamsync::board::server::{ServerConfig, prepare, serve};
use teamsync::client::{AgentConfig, AgentState, BackoffPolicy, SyncAgent};
use teamsync::realtime::events::TaskPayload;
use teamsync::realtime::{DomainEvent, IdentityPolicy, RealtimeHub, ScopeId, SocketSettings, UserId};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

struct TestServer {
    addr: SocketAddr,
    app: Router,
    state: SharedState,
    _shutdown: oneshot::Sender<()>,
    _dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(SocketSettings::default()).await
    }

    async fn start_with(socket: SocketSettings) -> Self {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            db_path: dir.path().join("board.db"),
            socket,
            ..ServerConfig::default()
        };
        let (app, state) = prepare(&config).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(serve(listener, app.clone(), async move {
            let _ = rx.await;
        }));

        Self {
            addr,
            app,
            state,
            _shutdown: tx,
            _dir: dir,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    fn hub(&self) -> &Arc<RealtimeHub> {
        &self.state.realtime.hub
    }

    async fn client(&self) -> Client {
        let (stream, _) = connect_async(self.ws_url()).await.unwrap();
        stream
    }

    async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// Register a user and return (token, user id).
    async fn register(&self, username: &str) -> (String, String) {
        let (status, body) = self
            .request(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({"username": username, "password": "pw"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        (
            body["token"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    async fn create_team(&self, token: &str, name: &str) -> String {
        let (status, body) = self
            .request("POST", "/api/teams", Some(token), Some(json!({"name": name})))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }
}

async fn send_event(client: &mut Client, event: &str, data: Value) {
    let frame = json!({"event": event, "data": data}).to_string();
    client.send(Message::Text(frame)).await.unwrap();
}

/// Next text frame whose event is not filtered out, or `None` if nothing
/// arrives within `wait`.
async fn next_event(client: &mut Client, wait: Duration, skip_presence: bool) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let msg = tokio::time::timeout_at(deadline, client.next()).await.ok()??;
        let Ok(Message::Text(text)) = msg else {
            continue;
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        if skip_presence && value["event"] == "user-presence" {
            continue;
        }
        return Some(value);
    }
}

async fn expect_event(client: &mut Client, name: &str) -> Value {
    let value = next_event(client, WAIT, true)
        .await
        .unwrap_or_else(|| panic!("timed out waiting for {}", name));
    assert_eq!(value["event"], name, "unexpected frame {}", value);
    value["data"].clone()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn subscriber_count(server: &TestServer, scope: &str) -> usize {
    server.hub().subscribers_of(&ScopeId::from(scope)).len()
}

#[tokio::test]
async fn test_rest_mutation_reaches_only_its_team() {
    let server = TestServer::start().await;
    let (token, alice) = server.register("alice").await;
    let team_a = server.create_team(&token, "Alpha").await;
    let team_b = server.create_team(&token, "Beta").await;

    let mut in_a = server.client().await;
    let mut in_b = server.client().await;
    send_event(&mut in_a, "identify", json!({"userId": alice})).await;
    send_event(&mut in_a, "join-team", json!({"teamId": team_a})).await;
    send_event(&mut in_b, "join-team", json!({"teamId": team_b})).await;
    wait_until(|| subscriber_count(&server, &team_a) == 1 && subscriber_count(&server, &team_b) == 1).await;

    let (status, task) = server
        .request(
            "POST",
            &format!("/api/teams/{}/tasks", team_a),
            Some(&token),
            Some(json!({"title": "Ship it"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let data = expect_event(&mut in_a, "task-created").await;
    assert_eq!(data["id"], task["id"]);
    assert_eq!(data["teamId"], team_a.as_str());
    assert_eq!(data["title"], "Ship it");

    assert!(next_event(&mut in_b, QUIET, true).await.is_none());
}

#[tokio::test]
async fn test_assignment_notifies_assignee_outside_the_room() {
    let server = TestServer::start().await;
    let (owner_token, _) = server.register("alice").await;
    let (_, bob) = server.register("bob").await;
    let team = server.create_team(&owner_token, "Alpha").await;
    let (status, _) = server
        .request(
            "POST",
            &format!("/api/teams/{}/members", team),
            Some(&owner_token),
            Some(json!({"username": "bob"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, task) = server
        .request(
            "POST",
            &format!("/api/teams/{}/tasks", team),
            Some(&owner_token),
            Some(json!({"title": "Review"})),
        )
        .await;
    let task_id = task["id"].as_str().unwrap().to_string();

    // Bob is online but watching no team.
    let mut bob_client = server.client().await;
    send_event(&mut bob_client, "identify", json!({"userId": bob})).await;
    let bob_id = UserId::from(bob.as_str());
    wait_until(|| !server.hub().connections_of(&bob_id).is_empty()).await;

    let (status, _) = server
        .request(
            "POST",
            &format!("/api/tasks/{}/assign", task_id),
            Some(&owner_token),
            Some(json!({"userId": bob})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let data = expect_event(&mut bob_client, "task-assigned-to-me").await;
    assert_eq!(data["taskId"], task_id.as_str());
    assert_eq!(data["assignedUserId"], bob.as_str());
    assert_eq!(data["title"], "Review");
    assert!(next_event(&mut bob_client, QUIET, true).await.is_none());
}

#[tokio::test]
async fn test_peer_relay_reaches_scope_members() {
    let server = TestServer::start().await;
    let mut sender = server.client().await;
    let mut peer = server.client().await;
    let mut outsider = server.client().await;

    send_event(&mut peer, "join-team", json!({"teamId": "team-7"})).await;
    send_event(&mut outsider, "join-team", json!({"teamId": "team-8"})).await;
    wait_until(|| subscriber_count(&server, "team-7") == 1 && subscriber_count(&server, "team-8") == 1).await;

    send_event(
        &mut sender,
        "task-updated",
        json!({"id": "t1", "teamId": "team-7", "status": "done"}),
    )
    .await;

    let data = expect_event(&mut peer, "task-updated").await;
    assert_eq!(data, json!({"id": "t1", "teamId": "team-7", "status": "done"}));
    assert!(next_event(&mut outsider, QUIET, true).await.is_none());
}

#[tokio::test]
async fn test_leave_team_stops_delivery() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    send_event(&mut client, "join-team", json!({"teamId": "team-7"})).await;
    wait_until(|| subscriber_count(&server, "team-7") == 1).await;
    send_event(&mut client, "leave-team", json!({"teamId": "team-7"})).await;
    wait_until(|| subscriber_count(&server, "team-7") == 0).await;

    let delivery = server.hub().broadcast(&DomainEvent::TaskCreated(TaskPayload {
        id: "t1".into(),
        team_id: ScopeId::from("team-7"),
        fields: Map::new(),
    }));
    assert_eq!(delivery.scope_recipients, 0);
    assert!(next_event(&mut client, QUIET, true).await.is_none());
}

#[tokio::test]
async fn test_presence_counts_every_connection() {
    let server = TestServer::start().await;
    let mut observer = server.client().await;
    wait_until(|| server.hub().connection_count() == 1).await;

    let mut first = server.client().await;
    let mut second = server.client().await;
    send_event(&mut first, "identify", json!({"userId": "alice"})).await;
    send_event(&mut second, "identify", json!({"userId": "alice"})).await;
    let alice = UserId::from("alice");
    wait_until(|| server.hub().connections_of(&alice).len() == 2).await;

    first.close(None).await.unwrap();
    wait_until(|| server.hub().connections_of(&alice).len() == 1).await;
    second.close(None).await.unwrap();

    let mut statuses = Vec::new();
    while let Some(frame) = next_event(&mut observer, WAIT, false).await {
        assert_eq!(frame["event"], "user-presence");
        assert_eq!(frame["data"]["userId"], "alice");
        let status = frame["data"]["status"].as_str().unwrap().to_string();
        let done = status == "offline";
        statuses.push(status);
        if done {
            break;
        }
    }
    assert_eq!(statuses, vec!["online", "offline"]);
    assert!(server.hub().online_users().is_empty());
}

#[tokio::test]
async fn test_require_session_rejects_foreign_identity() {
    let server = TestServer::start_with(SocketSettings {
        identity_policy: IdentityPolicy::RequireSession,
        ..SocketSettings::default()
    })
    .await;
    let (token, alice) = server.register("alice").await;

    let url = format!("{}?token={}", server.ws_url(), token);
    let (mut client, _) = connect_async(url).await.unwrap();
    send_event(&mut client, "identify", json!({"userId": "mallory"})).await;
    send_event(&mut client, "identify", json!({"userId": alice})).await;

    let alice_id = UserId::from(alice.as_str());
    wait_until(|| server.hub().connections_of(&alice_id).len() == 1).await;
    assert_eq!(server.hub().online_users(), vec![alice_id]);
}

#[tokio::test]
async fn test_agent_rejoins_scopes_after_reconnect() {
    let server = TestServer::start().await;
    let backoff = BackoffPolicy {
        initial_delay_ms: 20,
        max_delay_ms: 100,
        max_attempts: 20,
        multiplier: 2.0,
    };
    let agent = SyncAgent::new(
        AgentConfig::new(server.ws_url())
            .with_user("carol")
            .with_backoff(backoff),
    )
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    agent.on("task-created", move |data| {
        let _ = tx.send(data.clone());
    });
    agent.join("team-a");
    agent.join("team-b");

    let mut state = agent.watch_state();
    agent.connect().await;
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == AgentState::Identified))
        .await
        .unwrap()
        .unwrap();

    let carol = UserId::from("carol");
    let hub = server.hub().clone();
    let scopes_joined = |hub: &RealtimeHub| {
        hub.connections_of(&carol)
            .first()
            .map(|c| hub.scopes_of(*c).len() == 2)
            .unwrap_or(false)
    };
    wait_until(|| scopes_joined(&hub)).await;
    let original = hub.connections_of(&carol)[0];

    // Drop the connection from the server side.
    assert!(hub.on_disconnect(original));

    wait_until(|| {
        hub.connections_of(&carol)
            .first()
            .is_some_and(|c| *c != original && hub.scopes_of(*c).len() == 2)
    })
    .await;

    for team in ["team-a", "team-b"] {
        hub.broadcast(&DomainEvent::TaskCreated(TaskPayload {
            id: format!("task-{}", team),
            team_id: ScopeId::from(team),
            fields: Map::new(),
        }));
    }

    let mut received = Vec::new();
    for _ in 0..2 {
        let data = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        received.push(data["teamId"].as_str().unwrap().to_string());
    }
    received.sort();
    assert_eq!(received, vec!["team-a", "team-b"]);

    agent.disconnect().await;
    assert_eq!(agent.state(), AgentState::Disconnected);
    wait_until(|| hub.connections_of(&carol).is_empty()).await;
}
