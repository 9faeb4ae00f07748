//! HTTP and WebSocket handlers for Tether server.
//!
//! Each WebSocket connection gets a writer task draining its channel into
//! the socket, and a [`Session`] reading from the socket until it closes.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, MetricsObserver};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    validate_id, ChannelHandle, Hub, MemoryHistory, MemoryProfiles, Outcome, Session,
    SessionObserver, SessionParams, TransportError,
};
use tether_protocol::{codec, ServerEvent};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Default and maximum page size for history reads.
const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

/// Shared server state.
pub struct AppState {
    /// The presence and messaging hub.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
    observer: Arc<MetricsObserver>,
}

impl AppState {
    /// Create new app state with in-memory stores.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub = Hub::with_stores(
            config.hub_config(),
            Arc::new(MemoryProfiles::new()),
            Arc::new(MemoryHistory::new(config.history.max_messages_per_room)),
        );
        Self {
            hub: Arc::new(hub),
            config,
            observer: Arc::new(MetricsObserver),
        }
    }
}

/// Build the application router.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.trim_end_matches('/');

    Router::new()
        .route(&format!("{ws_path}/health"), get(hub_health_handler))
        .route(&format!("{ws_path}/:room_id/:user_id"), get(ws_handler))
        .route("/rooms/:room_id/join", post(join_handler))
        .route(
            "/rooms/:room_id/messages",
            get(history_handler).post(post_message_handler),
        )
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = app(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Tether server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}/{{room_id}}/{{user_id}}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// An error response with a JSON body.
#[derive(Debug)]
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "detail": self.1 }))).into_response()
    }
}

fn check_ids(room_id: &str, user_id: &str) -> Result<(), ApiError> {
    validate_id(room_id)
        .and_then(|()| validate_id(user_id))
        .map_err(|e| ApiError(StatusCode::BAD_REQUEST, e.to_string()))
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Hub health with live counts.
async fn hub_health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats().await;
    Json(json!({
        "status": "healthy",
        "active_rooms": stats.active_rooms,
        "total_connected_users": stats.connected_users,
    }))
}

/// WebSocket handshake parameters.
#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    #[serde(default, alias = "username")]
    display_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((room_id, user_id)): Path<(String, String)>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    check_ids(&room_id, &user_id)?;

    let params = SessionParams {
        room_id,
        user_id,
        display_name: params.display_name,
        avatar_url: params.avatar_url,
    };
    Ok(ws
        .max_message_size(state.config.max_message_size())
        .on_upgrade(move |socket| handle_websocket(socket, state, params)))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, params: SessionParams) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (handle, mut outbound) = state.hub.open_channel();
    let connection = handle.id();
    let (mut sink, stream) = socket.split();

    debug!(
        room = %params.room_id,
        user = %params.user_id,
        connection = %connection,
        "WebSocket connected"
    );

    // Sole writer for this socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            metrics::record_message(frame.len(), "outbound");
            if sink.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let replies = handle.clone();
    let send_timeout = state.hub.config().send_timeout;
    let observer = Arc::clone(&state.observer);
    let inbound = stream.filter_map(move |msg| {
        let replies = replies.clone();
        let observer = Arc::clone(&observer);
        async move {
            match msg {
                Ok(Message::Text(text)) => {
                    metrics::record_message(text.len(), "inbound");
                    Some(Ok(text))
                }
                Ok(Message::Binary(data)) => {
                    metrics::record_message(data.len(), "inbound");
                    match String::from_utf8(data) {
                        Ok(text) => Some(Ok(text)),
                        Err(e) => {
                            debug!(connection = %connection, error = %e, "Rejected binary frame");
                            reject_frame(&replies, send_timeout, "binary frame is not valid UTF-8")
                                .await;
                            observer.on_dispatch("invalid", &Outcome::Rejected);
                            None
                        }
                    }
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => None,
                Ok(Message::Close(_)) => {
                    debug!(connection = %connection, "Received close frame");
                    None
                }
                Err(e) => {
                    warn!(connection = %connection, error = %e, "WebSocket error");
                    metrics::record_error("websocket");
                    Some(Err(TransportError::ReceiveFailed(e.to_string())))
                }
            }
        }
    });

    let session = Session::connect(Arc::clone(&state.hub), params, handle)
        .await
        .with_observer(state.observer.clone());
    session.run(inbound).await;

    writer.abort();
    metrics::set_active_rooms(state.hub.stats().await.active_rooms);

    debug!(connection = %connection, "WebSocket disconnected");
}

/// Answer a frame that never reaches the session with an `error` event.
async fn reject_frame(handle: &ChannelHandle, timeout: Duration, message: &str) {
    match codec::encode(&ServerEvent::error(message)) {
        Ok(text) => {
            if let Err(e) = handle.send(text.into(), timeout).await {
                debug!(connection = %handle.id(), error = %e, "Error reply not delivered");
            }
        }
        Err(e) => warn!(error = %e, "Failed to encode error reply"),
    }
}

#[derive(Debug, Deserialize)]
struct JoinRequest {
    user_id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

/// Register a user in a room's presence roster without a connection.
async fn join_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(body): Json<JoinRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check_ids(&room_id, &body.user_id)?;

    let meta = state
        .hub
        .resolve_meta(&room_id, &body.user_id, body.username, body.avatar_url)
        .await;
    state.hub.pre_join(&room_id, &body.user_id, meta).await;

    Ok(Json(json!({
        "status": "success",
        "room_id": room_id,
        "user_id": body.user_id,
    })))
}

#[derive(Debug, Deserialize)]
struct PostMessageRequest {
    user_id: String,
    #[serde(default)]
    username: Option<String>,
    content: String,
}

/// Post a chat message through the same path as WebSocket chat.
async fn post_message_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(body): Json<PostMessageRequest>,
) -> Result<Json<tether_protocol::ChatMessage>, ApiError> {
    check_ids(&room_id, &body.user_id)?;
    if body.content.trim().is_empty() {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            "content cannot be empty".to_string(),
        ));
    }

    let author = state
        .hub
        .resolve_meta(&room_id, &body.user_id, body.username, None)
        .await;
    let (message, _) = state
        .hub
        .post_message(&room_id, &body.user_id, body.content, &author)
        .await;
    Ok(Json(message))
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    limit: Option<usize>,
}

/// Recent chat history for a room.
async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<tether_protocol::ChatMessage>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    state
        .hub
        .recent_messages(&room_id, limit)
        .await
        .map(Json)
        .map_err(|e| {
            error!(room = %room_id, error = %e, "History read failed");
            metrics::record_error("history");
            ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })
}
