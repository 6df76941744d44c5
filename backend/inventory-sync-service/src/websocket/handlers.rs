//! WebSocket endpoint: upgrade, per-connection socket loop, envelope routing.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::unbounded_channel;
use uuid::Uuid;

use crate::state::AppState;
use crate::websocket::message_types::{
    Envelope, TYPE_PING, TYPE_PONG, TYPE_SUBSCRIBE, TYPE_UNSUBSCRIBE,
};
use crate::websocket::ClientIdentity;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, params, socket))
}

/// Drives a single connection: forwards registry traffic to the peer and
/// routes inbound frames until either side closes.
async fn handle_socket(state: AppState, params: WsParams, socket: WebSocket) {
    let (tx, mut rx) = unbounded_channel::<Message>();
    let identity = ClientIdentity {
        user_id: params.user_id,
        session_id: params.session_id,
    };
    let client_id = state.registry.register(tx, identity).await;

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            // Registry -> peer (broadcasts, acks, heartbeat probes)
            outgoing = rx.recv() => {
                match outgoing {
                    Some(message) => {
                        if sink.send(message).await.is_err() {
                            break;
                        }
                    }
                    // Session was pruned; force-close the socket.
                    None => break,
                }
            }

            // Peer -> registry
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&state, client_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                        // The frame layer answers pings itself; both frames
                        // prove the peer is alive.
                        state.registry.mark_alive(client_id, Utc::now()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.registry.unregister(client_id).await;
    let _ = sink.send(Message::Close(None)).await;
}

/// Route one inbound text frame. A malformed envelope earns an error reply;
/// the connection always stays open.
async fn handle_text(state: &AppState, client_id: Uuid, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(e) => {
            tracing::debug!(%client_id, error = %e, "malformed envelope");
            let _ = state
                .registry
                .send(client_id, &Envelope::error("malformed message envelope"))
                .await;
            return;
        }
    };

    let kind = envelope.kind.clone();
    match kind.as_str() {
        TYPE_SUBSCRIBE => match envelope.channel() {
            Some(channel) => {
                let _ = state.registry.subscribe(client_id, channel).await;
            }
            None => {
                let _ = state
                    .registry
                    .send(client_id, &Envelope::error("subscribe requires a channel"))
                    .await;
            }
        },
        TYPE_UNSUBSCRIBE => match envelope.channel() {
            Some(channel) => {
                let _ = state.registry.unsubscribe(client_id, channel).await;
            }
            None => {
                let _ = state
                    .registry
                    .send(client_id, &Envelope::error("unsubscribe requires a channel"))
                    .await;
            }
        },
        TYPE_PING => {
            state.registry.mark_alive(client_id, Utc::now()).await;
            let _ = state.registry.send(client_id, &Envelope::pong()).await;
        }
        TYPE_PONG => {
            state.registry.mark_alive(client_id, Utc::now()).await;
        }
        kind => match state.dispatcher.get(kind) {
            Some(handler) => {
                if let Err(e) = handler.handle(client_id, envelope).await {
                    tracing::debug!(%client_id, kind, error = %e, "domain handler rejected envelope");
                    let _ = state
                        .registry
                        .send(client_id, &Envelope::error(e.to_string()))
                        .await;
                }
            }
            // Unrecognized types fan out verbatim on a channel named after
            // the type.
            None => {
                let delivered = state.registry.broadcast(kind, &envelope).await;
                tracing::debug!(%client_id, kind, delivered, "relayed unrecognized envelope");
            }
        },
    }
}
