use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::HeaderMap,
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, trace, warn};

use dealchat_api::ApiError;
use dealchat_api::middleware::{AuthError, bearer_token, verify_token};
use dealchat_types::events::{AckResult, RelayCommand, RelayEvent};

use crate::relay::Relay;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct RelayState {
    pub relay: Relay,
    pub jwt_secret: Arc<str>,
}

#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    pub token: Option<String>,
}

pub fn router(state: RelayState) -> Router {
    Router::new().route("/chat", get(ws_upgrade)).with_state(state)
}

/// Authenticates before upgrading: a missing or invalid token is answered
/// with 401 and no session is ever created.
pub async fn ws_upgrade(
    State(state): State<RelayState>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .or_else(|| bearer_token(&headers))
        .ok_or(AuthError::MissingToken)?;
    let claims = verify_token(&state.jwt_secret, &token).map_err(|e| {
        warn!("Relay handshake rejected: {}", e);
        e
    })?;

    let user_id = claims.sub;
    Ok(ws.on_upgrade(move |socket| handle_connection(socket, state.relay, user_id)))
}

pub async fn handle_connection(socket: WebSocket, relay: Relay, user_id: i64) {
    let (mut sender, mut receiver) = socket.split();

    let (mut session, mut events_rx) = match relay.open(user_id).await {
        Ok(opened) => opened,
        Err(e) => {
            warn!("User {} could not open a relay session: {}", user_id, e);
            return;
        }
    };
    let conn_id = session.conn_id;
    info!("User {} connected to relay ({})", user_id, conn_id);

    if let Some(ready) = encode(&RelayEvent::Ready { user_id }) {
        if sender.send(ready).await.is_err() {
            relay.close(session).await;
            return;
        }
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward dispatcher events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let Some(frame) = encode(&event) else { continue };
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_relay = relay.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let (ack, command) = parse_frame(text.as_str());
                    let result = match command {
                        Ok(command) => {
                            trace!("User {} -> {:?}", session.user_id, command);
                            recv_relay.handle(&mut session, command).await
                        }
                        Err(e) => {
                            warn!(
                                "User {} bad command: {} -- raw: {}",
                                session.user_id,
                                e,
                                text.as_str().chars().take(200).collect::<String>()
                            );
                            AckResult::failed("Malformed command")
                        }
                    };
                    if let Some(ack) = ack {
                        recv_relay
                            .dispatcher()
                            .send_to(session.conn_id, RelayEvent::Ack { ack, result })
                            .await;
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        session
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            relay.dispatcher().unregister(conn_id).await;
        }
        session = &mut recv_task => {
            send_task.abort();
            match session {
                Ok(session) => relay.close(session).await,
                Err(_) => relay.dispatcher().unregister(conn_id).await,
            }
        }
    }

    info!("User {} disconnected from relay ({})", user_id, conn_id);
}

/// Splits a client frame into its optional `ack` id and the command.
fn parse_frame(text: &str) -> (Option<u64>, Result<RelayCommand, serde_json::Error>) {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => {
            let ack = value.get("ack").and_then(Value::as_u64);
            (ack, serde_json::from_value(value))
        }
        Err(e) => (None, Err(e)),
    }
}

fn encode(event: &RelayEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!("Failed to encode relay event: {}", e);
            None
        }
    }
}
