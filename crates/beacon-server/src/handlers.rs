//! HTTP and WebSocket handlers for the Beacon server.
//!
//! This module wires the hub to axum: the WebSocket handshake, explicit
//! logout, connection lookups and the health check.

use crate::auth::JwtAuthenticator;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, MeteredSink, MeteredSource};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use beacon_core::{Hub, StoreProvider};
use beacon_protocol::WireFormat;
use beacon_transport::{outbound, websocket, ConnectionId};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The presence hub.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state backed by the configured directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no token secret is configured.
    pub fn new(config: Config) -> Result<Self> {
        let auth = JwtAuthenticator::new(config.jwt_secret()?);
        let stores: Arc<dyn StoreProvider> = Arc::new(config.seed_store());
        let hub = Hub::new(stores, Arc::new(auth), config.hub_config());

        info!(
            users = config.directory.users.len(),
            groups = config.directory.groups.len(),
            "Directory loaded"
        );

        Ok(Self {
            hub: Arc::new(hub),
            config,
        })
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_route = format!(
        "{}/:username",
        state.config.transport.websocket_path.trim_end_matches('/')
    );

    Router::new()
        .route(&ws_route, get(ws_handler))
        .route("/logout", post(logout_handler))
        .route("/connections/:username", get(connection_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let shutdown = CancellationToken::new();
    let sweep = state.hub.liveness_monitor().spawn(shutdown.clone());

    let app = app(Arc::clone(&state));
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}/<username>?token=...",
        addr,
        config.transport.websocket_path.trim_end_matches('/')
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = sweep.await {
        error!("Liveness sweep task failed: {}", e);
    }

    info!("Beacon server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.hub.connected_count(),
    }))
}

/// Live connection lookup.
async fn connection_handler(
    Path(username): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Json<Value> {
    let current = state.hub.registry().lookup(&username);
    Json(json!({
        "username": username,
        "connected": current.is_some(),
        "connected_since": current.map(|handle| handle.connected_at()),
    }))
}

/// Explicit logout with a bearer token.
async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Missing bearer token"))?;

    let identity = state.hub.authenticate(token).map_err(|e| {
        warn!(error = %e, "Logout rejected");
        reject(StatusCode::UNAUTHORIZED, "Invalid token")
    })?;

    metrics::record_logout();
    let change = state.hub.logout(&identity).await.map_err(|e| {
        error!(identity = %identity, error = %e, "Logout failed");
        metrics::record_error("logout");
        reject(StatusCode::INTERNAL_SERVER_ERROR, "Logout failed")
    })?;

    Ok(Json(json!({
        "username": identity,
        "status": "offline",
        "changed": change.is_changed(),
    })))
}

fn reject(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message })))
}

/// Query parameters of the WebSocket handshake.
#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    #[serde(default)]
    token: String,
    #[serde(default)]
    format: WireFormat,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(username): Path<String>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, username, params, state))
}

/// Run one WebSocket session through the hub.
async fn handle_websocket(
    socket: WebSocket,
    username: String,
    params: ConnectParams,
    state: Arc<AppState>,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection = ConnectionId::generate();
    debug!(identity = %username, connection = %connection, format = ?params.format, "WebSocket connected");

    let (source, sink) = websocket::split(socket);
    let (handle, queue) = outbound::channel(connection.clone(), state.hub.config().outbound_capacity);
    let writer = outbound::spawn_writer(queue, MeteredSink::new(sink), params.format);

    match state
        .hub
        .serve(&username, &params.token, MeteredSource::new(source), handle)
        .await
    {
        Ok(end) => debug!(identity = %username, connection = %connection, end = ?end, "Session finished"),
        Err(e) => metrics::record_handshake_rejected(e.close_code()),
    }

    if let Err(e) = writer.await {
        error!(connection = %connection, error = %e, "Writer task failed");
    }

    debug!(identity = %username, connection = %connection, "WebSocket disconnected");
}
