//! # Client Registry
//!
//! Tracks every live subscriber connection, its authorization outcome and its
//! inbound rate-limit window.
//!
//! ## Connection lifecycle
//!
//! ```text
//!   Pending --(token matches)--> Authorized --(close/error/shutdown)--> Closed
//!      |
//!      +-----(token mismatch)--> Closed   (never stored)
//! ```
//!
//! Only `Authorized` connections are stored, so a rejected peer can never be
//! enumerated for delivery. The rate-limit window is a field of the stored
//! connection and is discarded together with it in [`ClientRegistry::forget`].
//!
//! Outbound traffic never touches the socket directly: each connection owns
//! the sending half of an unbounded channel that its session task drains in
//! order. Sends are therefore synchronous and never suspend the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;

use super::rate_limiter::{MessageWindow, RateLimiter};

/// Process-unique handle of one connection attempt.
pub type ConnectionId = u64;

/// WebSocket close code for a policy violation (bad token).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// WebSocket close code for a server going away (shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// A frame queued for delivery to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Shared between every recipient of one broadcast.
    Text(Arc<str>),
    /// Sent last; the session ends after writing it.
    Close { code: u16, reason: String },
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgraded, token not yet checked.
    Pending,
    /// Token matched; receives broadcasts.
    Authorized,
    /// Rejected, closed by the peer, or closed by shutdown.
    Closed,
}

/// Why the registry refused an operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Missing or mismatched token.
    #[error("handshake token rejected")]
    AuthRejected,

    /// Admission after shutdown began.
    #[error("registry is shutting down")]
    ShuttingDown,

    /// The connection's window is full.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Not admitted, or already forgotten.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

/// One live subscriber.
#[derive(Debug)]
struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    outbox: mpsc::UnboundedSender<Outbound>,
    window: MessageWindow,
}

impl Connection {
    fn new(id: ConnectionId, outbox: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id,
            state: ConnectionState::Pending,
            outbox,
            window: MessageWindow::new(),
        }
    }

    /// Decides the handshake. A `Pending` connection moves to `Authorized` on
    /// an exact token match and to `Closed` otherwise; any other state is left
    /// alone.
    fn authorize(&mut self, presented: Option<&str>, secret: &str) -> ConnectionState {
        if self.state == ConnectionState::Pending {
            self.state = match presented {
                Some(token) if token == secret => ConnectionState::Authorized,
                _ => ConnectionState::Closed,
            };
        }
        self.state
    }

    fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    /// Authorized and its session task is still draining the outbox.
    fn is_open(&self) -> bool {
        self.state == ConnectionState::Authorized && !self.outbox.is_closed()
    }
}

/// A borrowed delivery handle for one open, authorized connection.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: ConnectionId,
    outbox: mpsc::UnboundedSender<Outbound>,
}

impl Subscriber {
    /// The connection this handle delivers to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the session task still drains the outbox.
    pub fn is_open(&self) -> bool {
        !self.outbox.is_closed()
    }

    /// Queues a text frame. Fails only when the session has gone away.
    pub fn send_text(&self, text: impl Into<Arc<str>>) -> Result<(), RegistryError> {
        self.outbox
            .send(Outbound::Text(text.into()))
            .map_err(|_| RegistryError::UnknownConnection(self.id))
    }
}

/// Owner of every authorized connection and its rate-limit window.
///
/// The shared secret is compared by exact match. All mutation happens under
/// one lock, so the registry is safe to share across runtime worker threads.
pub struct ClientRegistry {
    secret: String,
    limiter: RateLimiter,
    next_id: AtomicU64,
    accepting: AtomicBool,
    connections: Mutex<HashMap<ConnectionId, Connection>>,
}

impl ClientRegistry {
    /// A registry that admits `secret` holders and limits each of them with
    /// `limiter`.
    pub fn new(secret: impl Into<String>, limiter: RateLimiter) -> Self {
        Self {
            secret: secret.into(),
            limiter,
            next_id: AtomicU64::new(1),
            accepting: AtomicBool::new(true),
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Connection>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decides a pending connection attempt.
    ///
    /// On success the connection is stored as `Authorized` and its id is
    /// returned. On `AuthRejected` nothing is stored; the caller closes the
    /// socket with [`CLOSE_POLICY_VIOLATION`].
    pub fn admit(
        &self,
        presented: Option<&str>,
        outbox: mpsc::UnboundedSender<Outbound>,
    ) -> Result<ConnectionId, RegistryError> {
        // The accepting flag is only read and written under the map lock, so
        // an admission either precedes `close_all` or is refused.
        let mut connections = self.lock();
        if !self.accepting.load(Ordering::Acquire) {
            return Err(RegistryError::ShuttingDown);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut connection = Connection::new(id, outbox);

        match connection.authorize(presented, &self.secret) {
            ConnectionState::Authorized => {
                connections.insert(id, connection);
                tracing::debug!(connection = id, "Connection authorized");
                Ok(id)
            }
            _ => {
                tracing::warn!(connection = id, "Rejected connection with invalid token");
                Err(RegistryError::AuthRejected)
            }
        }
    }

    /// Removes a connection and its rate-limit history. Idempotent; returns
    /// whether anything was removed.
    pub fn forget(&self, id: ConnectionId) -> bool {
        match self.lock().remove(&id) {
            Some(mut connection) => {
                connection.close();
                true
            }
            None => false,
        }
    }

    /// A fresh view of every open, authorized connection.
    pub fn open_authorized(&self) -> Vec<Subscriber> {
        let connections = self.lock();
        let mut subscribers: Vec<_> = connections
            .values()
            .filter(|c| c.is_open())
            .map(|c| Subscriber {
                id: c.id,
                outbox: c.outbox.clone(),
            })
            .collect();
        subscribers.sort_by_key(Subscriber::id);
        subscribers
    }

    /// Runs one inbound message from `id` through the rate limiter.
    pub fn check_message(&self, id: ConnectionId, now: Instant) -> Result<(), RegistryError> {
        let mut connections = self.lock();
        let connection = connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;

        if self.limiter.admit_message(&mut connection.window, now) {
            Ok(())
        } else {
            Err(RegistryError::RateLimited)
        }
    }

    /// `Closed` for ids that were never admitted or have been forgotten.
    pub fn state_of(&self, id: ConnectionId) -> ConnectionState {
        self.lock()
            .get(&id)
            .map(Connection::state)
            .unwrap_or(ConnectionState::Closed)
    }

    /// Refuses all further admissions.
    pub fn stop_accepting(&self) {
        let _connections = self.lock();
        self.accepting.store(false, Ordering::Release);
    }

    /// False once shutdown has begun.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Refuses further admissions, then queues a close frame on every
    /// connection and marks it closed. The entries stay until their sessions
    /// call [`ClientRegistry::forget`].
    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        let mut connections = self.lock();
        self.accepting.store(false, Ordering::Release);
        let mut closed = 0;
        for connection in connections.values_mut() {
            if connection.state == ConnectionState::Authorized {
                let _ = connection.outbox.send(Outbound::Close {
                    code,
                    reason: reason.to_string(),
                });
                connection.close();
                closed += 1;
            }
        }
        closed
    }

    /// Stored connections, including ones already asked to close.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no connection is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
