//! Observer push channel: WebSocket upgrade on one endpoint plus `/health`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Extension,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use watchdog_common::ShutdownListener;

use crate::hub::Hub;
use crate::registry::{PushError, PushSink};

/// Write half of an upgraded observer socket.
pub struct WsSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl PushSink for WsSink {
    async fn push(&mut self, frame: &str) -> Result<(), PushError> {
        self.0
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| PushError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), PushError> {
        // The peer may already be gone; the close frame is best effort.
        let _ = self.0.send(Message::Close(None)).await;
        self.0
            .close()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))
    }
}

#[derive(Clone)]
struct PushState {
    inner: Arc<PushStateInner>,
}

struct PushStateInner {
    hub: Arc<Hub>,
    shutdown: ShutdownListener,
}

pub fn router(hub: Arc<Hub>, endpoint: &str, shutdown: ShutdownListener) -> Router {
    let state = PushState {
        inner: Arc::new(PushStateInner { hub, shutdown }),
    };

    Router::new()
        .route(endpoint, get(connect))
        .route("/health", get(health))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

/// Serve the push channel on `listener` until shutdown.
pub async fn serve_push(
    listener: TcpListener,
    hub: Arc<Hub>,
    endpoint: &str,
    shutdown: ShutdownListener,
) -> Result<()> {
    let app = router(hub, endpoint, shutdown.clone());
    let mut stop = shutdown;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { stop.wait().await })
    .await
    .context("push channel encountered an unrecoverable error")?;

    info!("push channel stopped");
    Ok(())
}

async fn health(Extension(state): Extension<PushState>) -> Response {
    let observers = state.inner.hub.registry().len().await;
    Json(json!({ "status": "ok", "observers": observers })).into_response()
}

async fn connect(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Extension(state): Extension<PushState>,
) -> Response {
    ws.on_failed_upgrade(move |err| {
        warn!(observer = %peer, "websocket upgrade failed: {}", err);
    })
    .on_upgrade(move |socket| observe(socket, peer, state))
}

/// Keep one observer registered for the lifetime of its socket. Observers
/// are push-only; anything they send besides a close is ignored.
async fn observe(socket: WebSocket, peer: SocketAddr, state: PushState) {
    let identity = peer.to_string();
    let (sink, mut stream) = socket.split();
    let registry = state.inner.hub.registry().clone();
    let id = registry.register(&identity, Box::new(WsSink(sink))).await;

    let mut shutdown = state.inner.shutdown.clone();
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    debug!(observer = %identity, "read error: {}", err);
                    break;
                }
            },
        }
    }

    registry.evict_connection(&identity, id).await;
}
