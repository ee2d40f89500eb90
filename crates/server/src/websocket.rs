//! WebSocket handling

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use agent_avatar_protocol::{ClientMessage, ServerMessage};

use crate::gateway::{Connection, SendError};
use crate::state::AvatarServer;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection outbound queue depth. A viewer this far behind is dropped.
const OUTBOUND_CAPACITY: usize = 100;

/// Frames queued for the socket writer task
enum OutboundMessage {
    /// JSON-serialized ServerMessage
    Json(ServerMessage),
    /// Protocol-level pong
    Pong(Bytes),
}

/// `Connection` backed by the outbound queue of one socket.
pub struct ChannelConnection {
    id: u64,
    open: AtomicBool,
    tx: mpsc::Sender<OutboundMessage>,
    /// Flips to true once the connection is closed from either side.
    closed: watch::Sender<bool>,
}

impl ChannelConnection {
    fn new(id: u64, tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            id,
            open: AtomicBool::new(true),
            tx,
            closed: watch::channel(false).0,
        }
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
        self.closed.send_replace(true);
    }

    /// Resolves the socket's read loop when the gateway drops this viewer.
    fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    fn send_pong(&self, data: Bytes) -> Result<(), SendError> {
        self.enqueue(OutboundMessage::Pong(data))
    }

    fn enqueue(&self, msg: OutboundMessage) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => {
                self.mark_closed();
                SendError::Closed
            }
        })
    }
}

impl Connection for ChannelConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, msg: &ServerMessage) -> Result<(), SendError> {
        self.enqueue(OutboundMessage::Json(msg.clone()))
    }

    fn close(&self) {
        self.mark_closed();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(server): State<Arc<AvatarServer>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, server))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, server: Arc<AvatarServer>) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        "WebSocket connection opened"
    );

    let (mut ws_tx, ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_CAPACITY);

    // Single writer per socket keeps per-connection delivery ordered
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let result = match msg {
                OutboundMessage::Json(server_msg) => match serde_json::to_string(&server_msg) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!(
                            component = "websocket",
                            event = "ws.send.serialize_failed",
                            connection_id = conn_id,
                            error = %e,
                            "Failed to serialize server message"
                        );
                        continue;
                    }
                },
                OutboundMessage::Pong(data) => ws_tx.send(Message::Pong(data)).await,
            };

            if result.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
        }
    });

    let connection = Arc::new(ChannelConnection::new(conn_id, outbound_tx));
    if server.gateway().open(connection.clone()).is_err() {
        send_task.abort();
        return;
    }

    read_inbound(conn_id, &connection, ws_rx).await;

    connection.close();
    server.gateway().close(conn_id);
    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        "WebSocket connection closed"
    );
    send_task.abort();
}

/// Serve inbound frames until the peer leaves or the connection is closed.
async fn read_inbound<S, E>(conn_id: u64, connection: &ChannelConnection, mut inbound: S)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut closed = connection.closed_signal();
    loop {
        let result = tokio::select! {
            _ = closed.wait_for(|closed| *closed) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.dropped",
                    connection_id = conn_id,
                    "Connection dropped by the server"
                );
                break;
            }
            next = inbound.next() => match next {
                Some(result) => result,
                None => break,
            },
        };

        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                if connection.send_pong(data).is_err() {
                    break;
                }
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Client sent close frame"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        let text = text.as_str();
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Ping) => {
                if connection.send(&ServerMessage::Pong).is_err() {
                    break;
                }
            }
            Err(e) => {
                // Unknown or malformed input gets no reply
                debug!(
                    component = "websocket",
                    event = "ws.message.ignored",
                    connection_id = conn_id,
                    error = %e,
                    payload_bytes = text.len(),
                    payload_preview = %truncate_for_log(text, 120),
                    "Ignoring client message"
                );
            }
        }
    }
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ConnectionRegistry;
    use agent_avatar_protocol::{AvatarState, StateRecord};
    use std::time::Duration;

    #[test]
    fn full_queue_reports_backpressure() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ChannelConnection::new(1, tx);
        let msg = ServerMessage::state(&StateRecord::new(AvatarState::Bash, 1));

        conn.send(&msg).unwrap();
        assert!(matches!(conn.send(&msg), Err(SendError::Full)));
        assert!(conn.is_open());
    }

    #[test]
    fn dropped_receiver_closes_the_connection() {
        let (tx, rx) = mpsc::channel(4);
        let conn = ChannelConnection::new(2, tx);
        drop(rx);

        assert!(!conn.is_open());
        let msg = ServerMessage::Pong;
        assert!(matches!(conn.send(&msg), Err(SendError::Closed)));
    }

    #[tokio::test]
    async fn queued_messages_keep_their_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let conn = ChannelConnection::new(3, tx);
        for state in [AvatarState::Thinking, AvatarState::Writing] {
            conn.send(&ServerMessage::state(&StateRecord::new(state, 5)))
                .unwrap();
        }

        let mut seen = Vec::new();
        while let Ok(OutboundMessage::Json(msg)) = rx.try_recv() {
            seen.push(msg.record().unwrap().state);
        }
        assert_eq!(seen, vec![AvatarState::Thinking, AvatarState::Writing]);
    }

    #[tokio::test]
    async fn viewer_dropped_for_backpressure_stops_reading() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Arc::new(ChannelConnection::new(5, tx));
        conn.send(&ServerMessage::Pong).unwrap();

        let registry = ConnectionRegistry::new();
        registry.insert(conn.clone());
        let msg = ServerMessage::state(&StateRecord::new(AvatarState::Bash, 9));
        let report = registry.broadcast(&msg);
        assert_eq!(report.dropped, 1);
        assert_eq!(registry.len(), 0);

        // Peer never sends or hangs up; the loop must still end
        let (_peer, inbound) = futures::channel::mpsc::unbounded::<Result<Message, axum::Error>>();
        tokio::time::timeout(Duration::from_secs(1), read_inbound(5, &conn, inbound))
            .await
            .expect("read loop should end once the connection is dropped");
    }

    #[tokio::test]
    async fn read_loop_answers_pings_until_the_peer_closes() {
        let (tx, mut rx) = mpsc::channel(8);
        let conn = ChannelConnection::new(6, tx);
        let inbound = futures::stream::iter(vec![
            Ok::<_, axum::Error>(Message::Text("garbage".into())),
            Ok(Message::Text(r#"{"type":"ping"}"#.into())),
            Ok(Message::Close(None)),
            Ok(Message::Text(r#"{"type":"ping"}"#.into())),
        ]);

        read_inbound(6, &conn, inbound).await;

        assert!(matches!(
            rx.try_recv(),
            Ok(OutboundMessage::Json(ServerMessage::Pong))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_flag_blocks_sends() {
        let (tx, _rx) = mpsc::channel(4);
        let conn = ChannelConnection::new(4, tx);
        conn.close();
        assert!(matches!(
            conn.send(&ServerMessage::Pong),
            Err(SendError::Closed)
        ));
    }
}
