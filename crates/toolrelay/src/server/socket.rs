use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::peers::{PeerHandle, PeerInfo};
use crate::relay::{Envelope, PeerMessageOutcome};
use crate::server::ServerState;
use crate::utils::time::now_rfc3339;

pub const SERVER_INFO: &str = "server_info";
pub const CLIENT_IDENTIFY: &str = "client_identify";
pub const PING: &str = "ping";
pub const PONG: &str = "pong";
pub const ERROR: &str = "error";

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Bookkeeping for one WebSocket connection, identified or not.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub connected_at: String,
    pub message_count: u64,
    pub identified: bool,
}

pub(crate) async fn ws_handler(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let info = ClientInfo {
        id: Uuid::new_v4().to_string(),
        remote_addr: Some(remote.to_string()),
        user_agent,
        connected_at: now_rfc3339(),
        message_count: 0,
        identified: false,
    };
    ws.on_upgrade(move |socket| handle_socket(state, socket, info))
}

async fn handle_socket(state: Arc<ServerState>, socket: WebSocket, info: ClientInfo) {
    let client_id = info.id.clone();
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Outgoing text frames from the relay and from this connection's replies.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    state.stats.total_connections.fetch_add(1, Ordering::Relaxed);
    state.clients.write().await.insert(client_id.clone(), info.clone());
    tracing::info!(
        client_id = %client_id,
        remote_addr = ?info.remote_addr,
        "websocket client connected"
    );

    send_envelope(
        &tx,
        SERVER_INFO,
        json!({
            "clientId": client_id,
            "serverTime": now_rfc3339(),
            "serverVersion": env!("CARGO_PKG_VERSION"),
        }),
    );

    let write_task = async move {
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await;
        loop {
            tokio::select! {
                message = rx.recv() => {
                    let Some(text) = message else { break };
                    if ws_sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = keepalive.tick() => {
                    if ws_sink.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    };

    let read_state = Arc::clone(&state);
    let read_tx = tx.clone();
    let read_id = client_id.clone();
    let read_task = async move {
        while let Some(Ok(message)) = ws_stream.next().await {
            match message {
                Message::Text(text) => {
                    read_state.record_message(&read_id).await;
                    handle_text(&read_state, &read_id, &info, &read_tx, text.as_str()).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = write_task => {},
        _ = read_task => {},
    }

    state.context.membership.remove(&client_id).await;
    state.clients.write().await.remove(&client_id);
    tracing::info!(client_id = %client_id, "websocket client disconnected");
}

async fn handle_text(
    state: &ServerState,
    client_id: &str,
    info: &ClientInfo,
    tx: &mpsc::UnboundedSender<String>,
    text: &str,
) {
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::warn!(client_id = %client_id, error = %error, "unparseable websocket frame");
            send_envelope(
                tx,
                ERROR,
                json!({ "message": "Invalid message format", "details": error.to_string() }),
            );
            return;
        }
    };

    if state
        .context
        .correlator
        .on_peer_response(client_id, &envelope)
        .await
        != PeerMessageOutcome::NotHandled
    {
        return;
    }

    match envelope.kind.as_str() {
        CLIENT_IDENTIFY => identify(state, client_id, info, tx, &envelope.data).await,
        PING => send_envelope(tx, PONG, json!({ "timestamp": now_rfc3339() })),
        PONG => tracing::debug!(client_id = %client_id, "pong received"),
        other => {
            tracing::warn!(client_id = %client_id, kind = %other, "unknown message type");
            send_envelope(
                tx,
                ERROR,
                json!({ "message": "Unknown message type", "details": other }),
            );
        }
    }
}

async fn identify(
    state: &ServerState,
    client_id: &str,
    info: &ClientInfo,
    tx: &mpsc::UnboundedSender<String>,
    data: &Value,
) {
    let client = data
        .get("client")
        .or_else(|| data.get("clientType"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let capabilities = data
        .get("capabilities")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let peer = PeerHandle::new(
        PeerInfo {
            id: client_id.to_string(),
            client,
            capabilities,
            remote_addr: info.remote_addr.clone(),
            connected_at: info.connected_at.clone(),
        },
        tx.clone(),
    );
    state.context.membership.add(peer).await;
    if let Some(entry) = state.clients.write().await.get_mut(client_id) {
        entry.identified = true;
    }
}

fn send_envelope(tx: &mpsc::UnboundedSender<String>, kind: &str, data: Value) {
    match Envelope::new(kind, data).to_text() {
        Ok(text) => {
            let _ = tx.send(text);
        }
        Err(error) => tracing::error!(kind = %kind, error = %error, "failed to encode envelope"),
    }
}
