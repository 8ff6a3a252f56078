use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parlor_core::fingerprint::ConnectionContext;
use parlor_core::ids::RoomId;
use parlor_core::provider::ChatProvider;
use parlor_room::RoomManager;

use crate::connection;
use crate::http;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 9300 }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RoomManager>,
    pub provider: Arc<dyn ChatProvider>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/{room}", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/rate", post(http::rate))
        .route("/context-aware-summary", post(http::summary))
        .route("/context-aware-suggestions", post(http::suggestions))
        .route("/context-aware-sentiment", post(http::session_sentiment))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server. Returns a handle that keeps it alive.
pub async fn start(
    config: ServerConfig,
    rooms: Arc<RoomManager>,
    provider: Arc<dyn ChatProvider>,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState { rooms, provider };
    let router = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(port = local_addr.port(), "parlor server started");

    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
    })
}

/// Handle returned by `start()` — dropping it does not stop the server, but
/// it carries the bound port for callers that asked for port 0.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade for one room. The connection's network descriptor is
/// captured here, before the protocol switch, and follows every frame the
/// connection sends.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let room_id = RoomId::from_raw(room);
    let handle = match state.rooms.room(&room_id) {
        Ok(handle) => handle,
        Err(error) => {
            return (StatusCode::BAD_REQUEST, error.to_string()).into_response();
        }
    };

    let context = connection_context(&addr, &headers);
    ws.on_upgrade(move |socket| connection::handle_socket(socket, handle, context))
        .into_response()
}

fn connection_context(addr: &SocketAddr, headers: &HeaderMap) -> ConnectionContext {
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let mut context = ConnectionContext::new(addr.ip().to_string(), user_agent);
    if let Some(device) = headers.get("x-device").and_then(|v| v.to_str().ok()) {
        context = context.with_device(device);
    }
    context
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "rooms": state.rooms.len(),
        "provider": state.provider.name(),
    }))
}
