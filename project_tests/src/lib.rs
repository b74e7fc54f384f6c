//! # project_tests
//!
//! Shared harness for the end-to-end tests: a live gateway on an ephemeral
//! port and a `tokio-tungstenite` client that presents a token.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use lib_common::core::{ClientRegistry, RateLimiter};
use lib_common::gateway::{serve, GatewayState, HttpQuota};

pub const TOKEN: &str = "test-token";

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct Gateway {
    pub addr: SocketAddr,
    pub state: GatewayState,
    pub registry: Arc<ClientRegistry>,
    pub server: JoinHandle<std::io::Result<()>>,
}

pub async fn start_gateway(limiter: RateLimiter) -> Gateway {
    let registry = Arc::new(ClientRegistry::new(TOKEN, limiter));
    let state = GatewayState::new(registry.clone(), HttpQuota::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind gateway");
    let addr = listener.local_addr().expect("gateway address");
    let server = tokio::spawn(serve(listener, state.clone()));
    Gateway {
        addr,
        state,
        registry,
        server,
    }
}

/// Connects to `/ws`, presenting `token` as the sub-protocol when given.
pub async fn connect(addr: SocketAddr, token: Option<&str>) -> Client {
    let mut request = format!("ws://{}/ws", addr)
        .into_client_request()
        .expect("client request");
    if let Some(token) = token {
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_str(token).expect("header value"));
    }
    let (client, _response) = tokio_tungstenite::connect_async(request)
        .await
        .expect("websocket handshake");
    client
}

/// Next data or close frame, skipping pings; `None` once the stream ends.
pub async fn next_frame(client: &mut Client) -> Option<Message> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")?;
        match frame {
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(message) => return Some(message),
            Err(_) => return None,
        }
    }
}

pub async fn next_text(client: &mut Client) -> String {
    match next_frame(client).await {
        Some(Message::Text(text)) => text.as_str().to_string(),
        other => panic!("expected a text frame, got {:?}", other),
    }
}

pub async fn expect_close(client: &mut Client) -> (u16, String) {
    match next_frame(client).await {
        Some(Message::Close(Some(CloseFrame { code, reason }))) => (u16::from(code), reason.as_str().to_string()),
        other => panic!("expected a close frame, got {:?}", other),
    }
}

/// True if nothing arrives within `wait`.
pub async fn stays_quiet(client: &mut Client, wait: Duration) -> bool {
    tokio::time::timeout(wait, client.next()).await.is_err()
}

/// Polls until `check` holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
