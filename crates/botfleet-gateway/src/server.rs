//! HTTP side of the gateway: router, health and roster endpoints

use crate::control::FleetControl;
use crate::ws::handle_connection;
use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use botfleet_core::{ControlConfig, SurfaceEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for every HTTP and WebSocket handler.
pub struct GatewayState {
    pub control: Arc<dyn FleetControl>,
    /// Upward events; every WebSocket client subscribes.
    pub events: broadcast::Sender<SurfaceEvent>,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(control: Arc<dyn FleetControl>, events: broadcast::Sender<SurfaceEvent>) -> Self {
        Self {
            control,
            events,
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/bots", get(bots_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already bound listener. Used by tests to grab an ephemeral port.
pub async fn serve_listener(listener: TcpListener, state: Arc<GatewayState>) -> anyhow::Result<()> {
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

pub async fn start_gateway(config: &ControlConfig, state: Arc<GatewayState>) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address {}:{}: {}", config.bind, config.port, e))?;

    info!("Botfleet gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  WebSocket: ws://{}/ws", bind_addr);

    let listener = TcpListener::bind(&bind_addr).await?;
    serve_listener(listener, state).await
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let bots = state.control.roster().await.len();
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "bots": bots,
        "clients": state.events.receiver_count(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn bots_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.control.roster().await)
}
