use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{Query, ws::WebSocketUpgrade},
    http::HeaderMap,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState, SharedState};
use super::db::BoardDb;
use crate::config::TeamsyncConfig;
use crate::realtime::ws::{self, WsParams};
use crate::realtime::{HubOptions, RealtimeHub, SocketSettings};

/// Configuration for the board server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub cors_permissive: bool,
    pub hub: HubOptions,
    pub socket: SocketSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
            db_path: PathBuf::from(".teamsync/teamsync.db"),
            cors_permissive: false,
            hub: HubOptions::default(),
            socket: SocketSettings::default(),
        }
    }
}

impl From<&TeamsyncConfig> for ServerConfig {
    fn from(config: &TeamsyncConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.server.db_path.clone(),
            cors_permissive: config.server.cors_permissive,
            hub: config.hub_options(),
            socket: config.socket_settings(),
        }
    }
}

/// Build the full application router: REST API plus the `/ws` endpoint.
pub fn build_router(state: SharedState, cors_permissive: bool) -> Router {
    let realtime = state.realtime.clone();

    let mut app = api::api_router()
        .route(
            "/ws",
            get(
                move |upgrade: WebSocketUpgrade, query: Query<WsParams>, headers: HeaderMap| {
                    ws::ws_handler(upgrade, query, headers, realtime.clone())
                },
            ),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_permissive {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open the database and assemble state and router for `config`.
pub fn prepare(config: &ServerConfig) -> Result<(Router, SharedState)> {
    if let Some(parent) = config.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = BoardDb::new(&config.db_path).context("Failed to initialize board database")?;
    let purged = db.purge_expired_sessions()?;
    if purged > 0 {
        tracing::debug!(sessions = purged, "Purged expired sessions");
    }

    let hub = Arc::new(RealtimeHub::new(config.hub));
    let state = AppState::new(db, hub, config.socket);
    let app = build_router(state.clone(), config.cors_permissive);
    Ok((app, state))
}

/// Start the board server and run until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let (app, state) = prepare(&config)?;

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        presence_mode = %state.realtime.hub.presence_mode(),
        identity_policy = ?config.socket.identity_policy,
        "teamsync listening"
    );

    serve(listener, app, shutdown_signal()).await?;
    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Serve `app` on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: tokio::net::TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
