//! Router assembly and the serve loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{get_avatar, get_state, health_handler, post_state};
use crate::state::AvatarServer;
use crate::websocket::ws_handler;

pub fn build_router(server: Arc<AvatarServer>) -> Router {
    let mut app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/state", get(get_state).post(post_state))
        .route("/api/avatar", get(get_avatar));

    if let Some(dir) = &server.avatar().dir {
        app = app.nest_service("/avatar", ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(server)
}

/// Serve `server` on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    server: Arc<AvatarServer>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = listener.local_addr()?;
    info!(
        component = "server",
        event = "server.listening",
        addr = %addr,
        avatar = %server.avatar().manifest.name,
        "Listening"
    );

    let result = axum::serve(listener, build_router(server.clone()))
        .with_graceful_shutdown(shutdown)
        .await;
    // Writes after shutdown no longer reach the (closed) viewers
    server.gateway().detach();
    result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ResolvedAvatar;
    use agent_avatar_cli::trigger::{self, SetOutcome};
    use agent_avatar_protocol::{AvatarState, ServerMessage};
    use futures::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start() -> (Arc<AvatarServer>, SocketAddr) {
        let server = Arc::new(AvatarServer::new(ResolvedAvatar::builtin()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(server.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (server, addr)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        ws
    }

    async fn next_message(ws: &mut Client) -> ServerMessage {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for a message")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn assert_silent(ws: &mut Client) {
        let quiet = tokio::time::timeout(Duration::from_millis(150), ws.next()).await;
        assert!(quiet.is_err(), "expected no further messages");
    }

    async fn wait_for_connections(server: &AvatarServer, count: usize) {
        for _ in 0..100 {
            if server.gateway().registry().len() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} registered connections");
    }

    #[tokio::test]
    async fn fresh_viewer_is_welcomed_with_current_state() {
        let (server, addr) = start().await;
        server.ingress().propose("thinking").unwrap();

        let mut ws = connect(addr).await;
        let welcome = next_message(&mut ws).await;

        assert_eq!(welcome, ServerMessage::welcome(&server.store().get_state()));
        assert!(matches!(
            welcome,
            ServerMessage::Welcome { state: AvatarState::Thinking, .. }
        ));
    }

    #[tokio::test]
    async fn one_write_reaches_both_viewers_once() {
        let (server, addr) = start().await;
        let mut first = connect(addr).await;
        let mut second = connect(addr).await;
        next_message(&mut first).await;
        next_message(&mut second).await;
        wait_for_connections(&server, 2).await;

        server.ingress().propose("writing").unwrap();

        for ws in [&mut first, &mut second] {
            let msg = next_message(ws).await;
            assert!(matches!(
                msg,
                ServerMessage::State { state: AvatarState::Writing, .. }
            ));
            assert_silent(ws).await;
        }
    }

    #[tokio::test]
    async fn ping_gets_pong_and_garbage_gets_nothing() {
        let (_server, addr) = start().await;
        let mut ws = connect(addr).await;
        next_message(&mut ws).await;

        ws.send(Message::Text("not json".into())).await.unwrap();
        ws.send(Message::Text(r#"{"type":"dance"}"#.into()))
            .await
            .unwrap();
        ws.send(Message::Text(r#"{"type":"ping"}"#.into()))
            .await
            .unwrap();

        assert_eq!(next_message(&mut ws).await, ServerMessage::Pong);
        assert_silent(&mut ws).await;
    }

    #[tokio::test]
    async fn closed_viewer_is_unregistered() {
        let (server, addr) = start().await;
        let mut ws = connect(addr).await;
        next_message(&mut ws).await;
        wait_for_connections(&server, 1).await;

        ws.close(None).await.unwrap();
        wait_for_connections(&server, 0).await;

        // Writes after the viewer left still succeed
        server.ingress().propose("bash").unwrap();
        assert_eq!(server.store().get_state().state, AvatarState::Bash);
    }

    #[tokio::test]
    async fn serve_stops_forwarding_once_shut_down() {
        use crate::gateway::tests::RecordingConnection;

        let server = Arc::new(AvatarServer::new(ResolvedAvatar::builtin()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let viewer = RecordingConnection::new();
        server.gateway().open(viewer.clone()).unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let serving = tokio::spawn(serve(listener, server.clone(), async move {
            let _ = stop_rx.await;
        }));
        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        server.ingress().propose("bash").unwrap();
        assert_eq!(viewer.messages().len(), 1, "only the welcome");
    }

    #[tokio::test]
    async fn http_state_endpoints() {
        let (server, addr) = start().await;
        let base_url = format!("http://{addr}");

        let outcome = trigger::set_state(&base_url, "bogus").await.unwrap();
        let SetOutcome::Rejected(rejection) = outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        assert!(!rejection.ok);
        assert_eq!(
            rejection.valid_states,
            vec!["idle", "thinking", "writing", "bash", "error", "success", "waiting"]
        );
        assert_eq!(server.store().get_state().state, AvatarState::Idle);

        let outcome = trigger::set_state(&base_url, "success").await.unwrap();
        let SetOutcome::Accepted(accepted) = outcome else {
            panic!("expected acceptance, got {outcome:?}");
        };
        assert_eq!(accepted.previous, AvatarState::Idle);

        let record = trigger::get_state(&base_url).await.unwrap();
        assert_eq!(record, server.store().get_state());
        assert_eq!(record.state, AvatarState::Success);
        assert!(trigger::check_health(&base_url).await);
    }
}
