//! # Gateway Server
//!
//! The `axum` router and listener loop.
//!
//! ## Routes
//! - `GET /` and `GET /ws`: WebSocket upgrade. The `Sec-WebSocket-Protocol` header carries
//!   the client's token; it is echoed back as the selected sub-protocol so
//!   standard clients complete the handshake, and the session decides
//!   admission.
//! - `GET /health`: returns `OK`, behind the per-IP HTTP limiter
//!   ([`limit_by_ip`]).
//!
//! ## Shutdown
//! [`GatewayState::drain`] stops admissions, queues `1001` close frames and
//! waits for the tracked sessions; cancelling the shutdown token then stops
//! the listener.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, State, WebSocketUpgrade},
    http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderMap},
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::http_limit::{limit_by_ip, HttpLimitError, HttpQuota};
use super::session::{run_session, SHUTDOWN_REASON};
use crate::core::registry::{ClientRegistry, CLOSE_GOING_AWAY};

/// Shared state for the routes. Cheap to clone.
#[derive(Clone)]
pub struct GatewayState {
    registry: Arc<ClientRegistry>,
    sessions: TaskTracker,
    shutdown: CancellationToken,
    http_quota: HttpQuota,
}

impl GatewayState {
    pub fn new(registry: Arc<ClientRegistry>, http_quota: HttpQuota) -> Self {
        Self {
            registry,
            sessions: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            http_quota,
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn http_quota(&self) -> HttpQuota {
        self.http_quota
    }

    /// Sessions still running.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Cancelling this token stops the listener.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Refuses new connections, asks every open one to close with `1001` and
    /// waits up to `grace` for their sessions to finish. Returns whether all
    /// sessions ended in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.registry.stop_accepting();
        let closing = self.registry.close_all(CLOSE_GOING_AWAY, SHUTDOWN_REASON);
        tracing::info!(connections = closing, "Closing client connections");

        self.sessions.close();
        tokio::time::timeout(grace, self.sessions.wait()).await.is_ok()
    }
}

/// Builds the routes. The HTTP limiter's pruning task stops with the
/// shutdown token.
pub fn router(state: GatewayState) -> Result<Router, HttpLimitError> {
    let http_routes = limit_by_ip(
        Router::new().route("/health", get(health_handler)),
        state.http_quota,
        state.shutdown_token(),
    )?;

    Ok(Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .merge(http_routes)
        .with_state(state))
}

/// Serves until the state's shutdown token is cancelled.
pub async fn serve(listener: TcpListener, state: GatewayState) -> io::Result<()> {
    let shutdown = state.shutdown_token();
    let app = router(state).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("WebSocket gateway listening on {}", addr);
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<GatewayState>,
) -> Response {
    let presented = headers
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let ws = match &presented {
        Some(token) => ws.protocols([token.clone()]),
        None => ws,
    };

    let registry = state.registry.clone();
    let sessions = state.sessions.clone();
    ws.on_upgrade(move |socket| sessions.track_future(run_session(socket, registry, presented, peer)))
}
