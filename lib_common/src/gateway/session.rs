//! # Subscriber Session
//!
//! One task per upgraded WebSocket. The session is the only writer of its
//! socket: everything outbound (welcome, broadcasts, advisories, close frames)
//! is queued on the connection's outbox and forwarded here in order.
//!
//! ## Workflow:
//! 1. Queue the welcome text, then ask the [`ClientRegistry`] to admit the
//!    presented token. The welcome is queued first so it always precedes any
//!    broadcast.
//! 2. Rejected: send `1008 Unauthorized` (or `1001` while shutting down) and
//!    end. Nothing is ever delivered to a rejected peer.
//! 3. Admitted: forward the outbox and count every inbound data frame against
//!    the rate limiter until either side closes.
//! 4. Forget the connection, dropping its rate-limit window with it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::core::registry::{
    ClientRegistry, Outbound, RegistryError, CLOSE_GOING_AWAY, CLOSE_POLICY_VIOLATION,
};

pub const WELCOME_TEXT: &str = "Connected to the notification service!";
pub const RATE_LIMIT_TEXT: &str = "Rate limit exceeded. Try again later.";
pub const UNAUTHORIZED_REASON: &str = "Unauthorized";
pub const SHUTDOWN_REASON: &str = "Server shutting down";

fn close_message(code: u16, reason: String) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

pub async fn run_session(
    mut socket: WebSocket,
    registry: Arc<ClientRegistry>,
    presented: Option<String>,
    peer: SocketAddr,
) {
    let (outbox, mut queued) = mpsc::unbounded_channel();
    let _ = outbox.send(Outbound::Text(WELCOME_TEXT.into()));

    let id = match registry.admit(presented.as_deref(), outbox.clone()) {
        Ok(id) => id,
        Err(e) => {
            let (code, reason) = match e {
                RegistryError::ShuttingDown => (CLOSE_GOING_AWAY, SHUTDOWN_REASON),
                _ => (CLOSE_POLICY_VIOLATION, UNAUTHORIZED_REASON),
            };
            tracing::warn!(%peer, code, "Closing unadmitted connection: {}", e);
            let _ = socket.send(close_message(code, reason.to_string())).await;
            return;
        }
    };
    tracing::info!(connection = id, %peer, "Client connected");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = queued.recv() => {
                let Some(frame) = frame else { break };
                match frame {
                    Outbound::Text(text) => {
                        if sink.send(Message::Text(text.as_ref().into())).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close { code, reason } => {
                        let _ = sink.send(close_message(code, reason)).await;
                        break;
                    }
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                        match registry.check_message(id, Instant::now()) {
                            Ok(()) => {}
                            Err(RegistryError::RateLimited) => {
                                tracing::warn!(connection = id, %peer, "Rate limit exceeded for client");
                                let _ = outbox.send(Outbound::Text(RATE_LIMIT_TEXT.into()));
                            }
                            Err(_) => break,
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                }
            }
        }
    }

    registry.forget(id);
    tracing::info!(connection = id, %peer, "Client disconnected");
}
