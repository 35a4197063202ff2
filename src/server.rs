//! Broker Server (spec.md §4.7): HTTP upgrade, the auth/ClientId gate, and
//! the per-session read loop. Shape follows the teacher's forwarder
//! upgrade handler: validate headers before upgrading, then hand the split
//! socket to a dedicated per-connection loop.

use crate::config::Config;
use crate::handlers::{self, HandlerContext};
use crate::manager::TopicManager;
use crate::session::ClientSession;
use crate::session_registry::SessionRegistry;
use crate::wire::{Request, Response};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<TopicManager>,
    pub registry: Arc<SessionRegistry>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(upgrade))
        .with_state(state)
        .fallback(not_found)
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

/// Step 1-2 of the upgrade path (spec.md §4.7): an exact-match auth check,
/// then a `ClientId` uniqueness check, both rejected *before* the socket is
/// upgraded.
async fn upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> HttpResponse {
    if let Some(expected) = &state.config.api_key {
        let provided = headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .trim();
        if provided != expected.trim() {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }

    let client_id = headers
        .get("ClientId")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if state.registry.contains(&client_id).await {
        return (StatusCode::CONFLICT, "client id already in use").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id))
        .into_response()
}

/// Step 3 onward: construct the Session, register it, and run the read
/// loop until the socket closes or a destructive error is classified.
async fn handle_socket(socket: WebSocket, state: AppState, client_id: String) {
    let (sink, mut stream) = socket.split();
    let session = ClientSession::new(client_id.clone(), sink);

    // A second connection racing on the same id between the pre-upgrade
    // check and here loses; its socket is closed without ever joining the
    // registry.
    if !state.registry.add(session.clone()).await {
        session.close().await;
        return;
    }

    let ctx = HandlerContext {
        manager: state.manager.clone(),
        session: session.clone(),
    };
    let failed_peers = state.manager.failed_peer_sender();

    loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            _ => break,
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<Request>(&text) {
                Ok(request) => {
                    if let Some(response) = handlers::dispatch(&ctx, request).await {
                        if session.send_json(&response).await.is_err() {
                            let _ = failed_peers.try_send(client_id.clone());
                        }
                    }
                }
                Err(e) => {
                    let response = Response::unknown(400, format!("malformed request: {e}"));
                    let _ = session.send_json(&response).await;
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    state.manager.unsubscribe_all(&client_id).await;
    state.registry.remove(&client_id).await;
    session.close().await;
}

#[cfg(test)]
mod tests {
    // End-to-end upgrade/auth/read-loop behavior is covered by
    // tests/broker.rs, which drives a real axum::serve instance with a
    // tokio-tungstenite client; header parsing alone isn't worth mocking.
    #[allow(unused_imports)]
    use super::*;
}
