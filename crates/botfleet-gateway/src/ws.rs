//! WebSocket connection handling
//!
//! Each client gets the current roster as `bot-online` events, then every
//! upward event from the broadcast channel. Text frames from the client are
//! parsed as [`SurfaceCommand`]s and handed to the fleet.

use crate::server::GatewayState;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use botfleet_core::{SurfaceCommand, SurfaceEvent};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Subscribe before taking the roster so nothing falls in between.
    let mut events_rx = state.events.subscribe();

    for bot in state.control.roster().await {
        if !send_event(&mut ws_tx, &bot.online_event()).await {
            return;
        }
    }
    info!("Control client connected");

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<SurfaceCommand>(&text) {
                            Ok(cmd) => {
                                debug!(?cmd, "control request");
                                state.control.submit(cmd).await;
                            }
                            Err(e) => {
                                warn!("Unparseable message ({}): {}", e, preview(&text));
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!("Control client disconnected");
                        return;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        return;
                    }
                    None => return,
                    _ => {} // Binary, Ping, Pong
                }
            }

            event = events_rx.recv() => {
                match event {
                    Ok(event) => {
                        if !send_event(&mut ws_tx, &event).await {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client lagged, dropped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Event broadcast closed");
                        return;
                    }
                }
            }
        }
    }
}

/// First 100 characters of a client frame, for log lines.
fn preview(text: &str) -> String {
    text.chars().take(100).collect()
}

/// Returns false once the client is gone.
async fn send_event(ws_tx: &mut SplitSink<WebSocket, WsMessage>, event: &SurfaceEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => ws_tx.send(WsMessage::Text(json)).await.is_ok(),
        Err(e) => {
            warn!(event = event.name(), "failed to encode event: {}", e);
            true
        }
    }
}
