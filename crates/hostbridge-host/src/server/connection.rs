//! Orchestrator link lifecycle.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use hostbridge_types::Envelope;

use super::HostState;

/// Handshake header carrying the orchestrator's display name.
pub const CLIENT_NAME_HEADER: &str = "x-client-name";

/// How long the writer gets to flush the closing frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Unique identifier for an orchestrator connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new unique connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Diagnostics for a connected orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientInfo {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Name from the handshake header, if sent.
    pub name: Option<String>,
    /// Peer address.
    pub remote_addr: SocketAddr,
    /// When the link was accepted.
    pub connected_at: DateTime<Utc>,
}

impl ClientInfo {
    /// Describe a freshly accepted connection.
    pub fn new(name: Option<String>, remote_addr: SocketAddr) -> Self {
        Self {
            id: ConnectionId::new(),
            name,
            remote_addr,
            connected_at: Utc::now(),
        }
    }

    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

/// Why the receive loop ended.
enum Exit {
    Closed,
    Superseded,
}

/// Serve one orchestrator link until it closes or is superseded.
pub async fn handle_socket(socket: WebSocket, state: HostState, info: ClientInfo) {
    let cancel = state.activate(info.clone());
    let (mut sink, mut receiver) = socket.split();

    tracing::info!(
        connection_id = %info.id,
        client_name = %info.display_name(),
        remote_addr = %info.remote_addr,
        "orchestrator connected"
    );

    // Replies finish out of order on their own tasks; a single writer owns
    // the sink.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let mut writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let exit = loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break Exit::Superseded,
            msg = receiver.next() => msg,
        };

        let text = match msg {
            Some(Ok(Message::Text(text))) => text.to_string(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!(connection_id = %info.id, "dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Ping(data))) => {
                let _ = out_tx.send(Message::Pong(data));
                continue;
            }
            Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => break Exit::Closed,
            Some(Err(e)) => {
                tracing::warn!(connection_id = %info.id, error = %e, "WebSocket error");
                break Exit::Closed;
            }
        };

        // Queueing waits for room on the host thread; a superseding link or
        // shutdown must still end this one meanwhile.
        tokio::select! {
            _ = cancel.cancelled() => break Exit::Superseded,
            _ = handle_text(&text, &state, &out_tx, info.id) => {}
        }
    };

    state.deactivate(info.id);

    let frame = match exit {
        Exit::Superseded => CloseFrame {
            code: close_code::AWAY,
            reason: "superseded".into(),
        },
        Exit::Closed => CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        },
    };
    let _ = out_tx.send(Message::Close(Some(frame)));
    drop(out_tx);
    if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }

    tracing::info!(
        connection_id = %info.id,
        client_name = %info.display_name(),
        superseded = matches!(exit, Exit::Superseded),
        "orchestrator disconnected"
    );
}

async fn handle_text(
    text: &str,
    state: &HostState,
    out: &mpsc::UnboundedSender<Message>,
    connection_id: ConnectionId,
) {
    match Envelope::from_json(text) {
        Ok(Envelope::Request(request)) => {
            // Posting happens here, in arrival order; only the wait is
            // concurrent.
            let pending = state.dispatcher().submit(request).await;
            let out = out.clone();
            tokio::spawn(async move {
                let id = pending.id().to_string();
                let reply = pending.wait().await;
                if !send_envelope(&out, &reply) {
                    tracing::debug!(
                        connection_id = %connection_id,
                        request_id = %id,
                        "link closed before reply could be sent"
                    );
                }
            });
        }
        Ok(other) => {
            tracing::warn!(
                connection_id = %connection_id,
                id = %other.id(),
                "ignoring reply envelope sent to the host"
            );
        }
        Err(err) => {
            let id = Envelope::salvage_id(text).unwrap_or_default();
            tracing::warn!(
                connection_id = %connection_id,
                request_id = %id,
                error = %err,
                "malformed envelope"
            );
            send_envelope(out, &Envelope::error(id, err));
        }
    }
}

/// Queue an envelope on the link. Returns false if the link is gone.
fn send_envelope(out: &mpsc::UnboundedSender<Message>, envelope: &Envelope) -> bool {
    match envelope.to_json() {
        Ok(json) => out.send(Message::Text(json.into())).is_ok(),
        Err(err) => {
            tracing::error!(id = %envelope.id(), error = %err, "failed to encode reply");
            false
        }
    }
}
