//! Real-time channel client for the terminal viewer.
//!
//! Connects to the server's `/ws`, forwards every decoded `ServerMessage` to
//! the animation loop and reconnects after a fixed delay whenever the channel
//! is lost, until closed.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use agent_avatar_protocol::{ClientMessage, ServerMessage};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum SessionEnd {
    Lost,
    Stopped,
}

/// Handle to the background connection task.
pub struct ViewerClient {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ViewerClient {
    pub fn spawn(
        url: String,
        reconnect_delay: Duration,
        keepalive: Duration,
        updates: mpsc::Sender<ServerMessage>,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(connection_loop(
            url,
            reconnect_delay,
            keepalive,
            updates,
            stop_rx,
        ));
        Self { stop, task }
    }

    /// Stop reconnecting and close the open channel, if any.
    pub async fn close(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            debug!(
                component = "viewer_client",
                event = "viewer_client.join_failed",
                error = %e,
                "Client task ended abnormally"
            );
        }
    }
}

async fn connection_loop(
    url: String,
    reconnect_delay: Duration,
    keepalive: Duration,
    updates: mpsc::Sender<ServerMessage>,
    mut stop: watch::Receiver<bool>,
) {
    let mut attempt: u64 = 0;
    loop {
        if *stop.borrow() {
            break;
        }
        attempt += 1;

        let connect = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = stop.changed() => break,
        };
        match connect {
            Ok((ws, _)) => {
                info!(
                    component = "viewer_client",
                    event = "viewer_client.connected",
                    url = %url,
                    attempt,
                    "Connected"
                );
                attempt = 0;
                match session(ws, keepalive, &updates, &mut stop).await {
                    SessionEnd::Stopped => break,
                    SessionEnd::Lost => info!(
                        component = "viewer_client",
                        event = "viewer_client.lost",
                        "Channel lost, reconnecting"
                    ),
                }
            }
            Err(e) => {
                // Logged once per outage; retries stay quiet
                if attempt == 1 {
                    warn!(
                        component = "viewer_client",
                        event = "viewer_client.connect_failed",
                        url = %url,
                        error = %e,
                        "Failed to connect, retrying"
                    );
                }
            }
        }

        tokio::select! {
            _ = time::sleep(reconnect_delay) => {}
            _ = stop.changed() => break,
        }
    }
    debug!(
        component = "viewer_client",
        event = "viewer_client.stopped",
        "Client stopped"
    );
}

async fn session(
    mut ws: Socket,
    keepalive: Duration,
    updates: &mpsc::Sender<ServerMessage>,
    stop: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let mut ping = time::interval_at(Instant::now() + keepalive, keepalive);
    let ping_json = match serde_json::to_string(&ClientMessage::Ping) {
        Ok(json) => json,
        Err(_) => return SessionEnd::Stopped,
    };

    loop {
        tokio::select! {
            _ = stop.changed() => {
                let _ = ws.close(None).await;
                return SessionEnd::Stopped;
            }
            _ = ping.tick() => {
                if ws.send(Message::Text(ping_json.clone().into())).await.is_err() {
                    return SessionEnd::Lost;
                }
            }
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(msg) => {
                            let delivered = tokio::select! {
                                sent = updates.send(msg) => sent.is_ok(),
                                _ = stop.changed() => false,
                            };
                            if !delivered {
                                let _ = ws.close(None).await;
                                return SessionEnd::Stopped;
                            }
                        }
                        Err(e) => debug!(
                            component = "viewer_client",
                            event = "viewer_client.message.ignored",
                            error = %e,
                            "Ignoring server message"
                        ),
                    }
                }
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(
                        component = "viewer_client",
                        event = "viewer_client.error",
                        error = %e,
                        "Channel error"
                    );
                    return SessionEnd::Lost;
                }
            }
        }
    }
}
