//! Registration handler and per-agent session loop

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{SinkExt, StreamExt};
use serde_json::json;

use tether_protocol::FrameCodec;

use crate::auth::AgentIdentity;
use crate::session::TunnelSession;
use crate::state::ServerState;

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// `GET /healthz`
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "sessions": state.registry.len(),
    }))
}

/// Authorize an agent and upgrade its connection into a session
pub async fn connect_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let identity = match state.authorizer.authorize(&headers) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!("Rejected agent registration: {}", e);
            return error_response(StatusCode::UNAUTHORIZED, "unauthorized");
        }
    };

    if state.registry.is_shutting_down() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "server is shutting down");
    }

    let Some(ws) = ws else {
        return error_response(StatusCode::BAD_REQUEST, "websocket upgrade required");
    };

    tracing::info!(
        "Agent for {} connecting (protocol {})",
        identity.key,
        identity.version.as_deref().unwrap_or("unknown")
    );
    ws.on_upgrade(move |socket| run_session(state, identity, socket))
}

/// Drive one agent transport until it closes
async fn run_session(state: Arc<ServerState>, identity: AgentIdentity, socket: WebSocket) {
    let (session, mut outbound_rx) = TunnelSession::new(identity.key.clone());
    if let Err(e) = state.registry.register(Arc::clone(&session)) {
        tracing::warn!("Dropping agent for {}: {}", identity.key, e);
        return;
    }
    let instance = session.instance_id();
    let (mut sink, mut stream) = socket.split();

    let writer = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = session.cancel_token().cancelled() => break,
                    frame = outbound_rx.recv() => {
                        let Some(frame) = frame else { break };
                        let bytes = match frame.to_bytes() {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                tracing::error!("Failed to encode frame for {}: {}", session.key(), e);
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(WsMessage::Binary(bytes.to_vec())).await {
                            tracing::debug!("Write to agent {} failed: {}", session.key(), e);
                            break;
                        }
                    }
                }
            }
            let _ = sink.send(WsMessage::Close(None)).await;
        })
    };

    let monitor = {
        let session = Arc::clone(&session);
        let health = state.health;
        tokio::spawn(async move {
            if health.run(Arc::clone(&session)).await {
                session.close();
            }
        })
    };

    let mut codec = FrameCodec::new();
    loop {
        tokio::select! {
            _ = session.cancel_token().cancelled() => break,
            message = stream.next() => match message {
                Some(Ok(WsMessage::Binary(data))) => match codec.decode_all(&data) {
                    Ok(frames) => {
                        for frame in frames {
                            session.handle_frame(frame).await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Protocol error from agent {}: {}", identity.key, e);
                        break;
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    tracing::debug!("Agent {} closed the transport", identity.key);
                    break;
                }
                Some(Ok(_)) => session.touch(),
                Some(Err(e)) => {
                    tracing::debug!("Transport error from agent {}: {}", identity.key, e);
                    break;
                }
            },
        }
    }

    state.registry.unregister(&identity.key, instance);
    session.close();
    monitor.abort();
    let _ = writer.await;
    tracing::info!("Agent for {} disconnected (#{})", identity.key, instance);
}
