//! Client identity, per-connection outbound paths, and the connection registry.
//!
//! Push clients get a bounded mpsc channel drained by their socket write
//! loop; poll clients get a [`PollQueue`] drained by explicit poll requests.
//! Both are tracked in one `DashMap`-backed registry so broadcast and
//! addressed sends work the same way for either transport.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use switchboard_core::{now_millis, Message};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::config::{ConnectionConfig, PollConfig};
use super::error::TransportError;
use super::poll_queue::PollQueue;

// ---------------------------------------------------------------------------
// ClientId
// ---------------------------------------------------------------------------

/// Opaque client identifier, unique within one transport instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generates a fresh id of the form `client-<epochMillis>-<7 base36 chars>`.
#[must_use]
pub fn generate_client_id() -> ClientId {
    let mut rng = rand::rng();
    let suffix: String = (0..7)
        .map(|_| char::from(BASE36[rng.random_range(0..BASE36.len())]))
        .collect();
    ClientId(format!("client-{}-{suffix}", now_millis()))
}

// ---------------------------------------------------------------------------
// Outbound paths
// ---------------------------------------------------------------------------

/// Which transport style a connection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Full-duplex socket.
    Push,
    /// Request/response polling.
    Poll,
}

/// Frame handed to a socket write loop.
#[derive(Debug)]
pub enum OutboundMessage {
    /// A JSON-encoded envelope.
    Text(String),
    /// A close frame with an optional reason.
    Close(Option<String>),
}

/// Error returned when a connection's outbound path refuses a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The socket channel stayed full for the whole send timeout.
    #[error("send timed out")]
    Timeout,
    /// The poll queue is full and its policy rejects new entries.
    #[error("outbound queue full")]
    Full,
}

#[derive(Debug)]
enum Outbound {
    Socket(mpsc::Sender<OutboundMessage>),
    Queue(Arc<PollQueue>),
}

/// Handle to a single connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ClientId,
    pub kind: ConnectionKind,
    pub connected_at: Instant,
    outbound: Outbound,
}

impl ConnectionHandle {
    /// Delivers an already-encoded frame to this connection.
    ///
    /// For push connections, a socket whose write loop has exited is
    /// treated as closing and the frame is silently discarded.
    ///
    /// # Errors
    ///
    /// Returns `SendError::Timeout` if the socket channel stays full for
    /// `timeout`, or `SendError::Full` if a rejecting poll queue is full.
    pub async fn send(
        &self,
        message: &Message,
        frame: &str,
        timeout: Duration,
    ) -> Result<(), SendError> {
        match &self.outbound {
            Outbound::Socket(tx) => {
                let send = tx.send(OutboundMessage::Text(frame.to_string()));
                match tokio::time::timeout(timeout, send).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => {
                        debug!(client_id = %self.id, "socket closing, frame discarded");
                        Ok(())
                    }
                    Err(_) => Err(SendError::Timeout),
                }
            }
            Outbound::Queue(queue) => queue.push(message.clone()).map_err(|_| SendError::Full),
        }
    }

    /// Requests that the connection close. Push sockets receive a close
    /// frame; poll queues stop blocking pollers.
    pub fn close(&self, reason: Option<String>) {
        match &self.outbound {
            Outbound::Socket(tx) => {
                // A full or closed channel means the socket is already going away.
                let _ = tx.try_send(OutboundMessage::Close(reason));
            }
            Outbound::Queue(queue) => queue.close(),
        }
    }

    /// The poll queue for poll connections, `None` for sockets.
    #[must_use]
    pub fn poll_queue(&self) -> Option<&Arc<PollQueue>> {
        match &self.outbound {
            Outbound::Queue(queue) => Some(queue),
            Outbound::Socket(_) => None,
        }
    }

    /// Whether the outbound path can still accept messages.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        match &self.outbound {
            Outbound::Socket(tx) => !tx.is_closed(),
            Outbound::Queue(queue) => !queue.is_closed(),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Outcome of a broadcast fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients the message was handed to.
    pub delivered: usize,
    /// Clients whose send failed or who vanished mid-broadcast.
    pub failed: Vec<ClientId>,
}

impl BroadcastReport {
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

/// Thread-safe registry of the connections owned by one transport.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ClientId, Arc<ConnectionHandle>>,
    config: ConnectionConfig,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            connections: DashMap::new(),
            config,
        }
    }

    /// Registers a push connection with a freshly generated id, returning the
    /// handle and the receiver for its write loop.
    pub fn register_socket(&self) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(self.config.outbound_channel_capacity.max(1));
        loop {
            let id = generate_client_id();
            if let Entry::Vacant(slot) = self.connections.entry(id.clone()) {
                let handle = Arc::new(ConnectionHandle {
                    id,
                    kind: ConnectionKind::Push,
                    connected_at: Instant::now(),
                    outbound: Outbound::Socket(tx),
                });
                slot.insert(Arc::clone(&handle));
                return (handle, rx);
            }
        }
    }

    /// Registers a poll connection under `id`, or a generated id when `None`.
    ///
    /// Returns the handle and `true` if it was newly created. If `id` is
    /// already registered, the existing handle is returned with `false`.
    pub fn register_queue(
        &self,
        id: Option<ClientId>,
        poll: &PollConfig,
    ) -> (Arc<ConnectionHandle>, bool) {
        let mut id = id.unwrap_or_else(generate_client_id);
        loop {
            match self.connections.entry(id.clone()) {
                Entry::Occupied(existing) => {
                    if existing.get().kind == ConnectionKind::Poll {
                        return (Arc::clone(existing.get()), false);
                    }
                    // A socket holds this id; fall back to a fresh one.
                    id = generate_client_id();
                }
                Entry::Vacant(slot) => {
                    let handle = Arc::new(ConnectionHandle {
                        id,
                        kind: ConnectionKind::Poll,
                        connected_at: Instant::now(),
                        outbound: Outbound::Queue(Arc::new(PollQueue::new(poll))),
                    });
                    slot.insert(Arc::clone(&handle));
                    return (handle, true);
                }
            }
        }
    }

    /// Removes a connection. Only one caller ever observes `Some` for a
    /// given registration.
    pub fn remove(&self, id: &ClientId) -> Option<Arc<ConnectionHandle>> {
        self.connections.remove(id).map(|(_, handle)| handle)
    }

    #[must_use]
    pub fn get(&self, id: &ClientId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(id).map(|r| Arc::clone(r.value()))
    }

    #[must_use]
    pub fn contains(&self, id: &ClientId) -> bool {
        self.connections.contains_key(id)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<ClientId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Removes and returns all connections. Used during shutdown.
    pub fn drain_all(&self) -> Vec<Arc<ConnectionHandle>> {
        let keys = self.ids();
        keys.iter().filter_map(|key| self.remove(key)).collect()
    }

    /// Sends one message to one client.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ClientNotFound` for an unknown id,
    /// `TransportError::Encode` if the message cannot be serialised, and
    /// `TransportError::Send` if the outbound path refused it.
    pub async fn send_to(&self, id: &ClientId, message: &Message) -> Result<(), TransportError> {
        let handle = self
            .get(id)
            .ok_or_else(|| TransportError::ClientNotFound(id.clone()))?;
        let frame = message.to_json()?;
        handle
            .send(message, &frame, self.config.send_timeout)
            .await
            .map_err(|reason| TransportError::Send {
                client_id: id.clone(),
                reason,
            })
    }

    /// Sends one message to every connection registered at call time.
    ///
    /// Sends run concurrently and all of them settle before this returns.
    /// A failure for one client is logged and recorded but never stops
    /// delivery to the others.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Encode` only if the message itself cannot be
    /// serialised; per-client failures land in the report.
    pub async fn broadcast(&self, message: &Message) -> Result<BroadcastReport, TransportError> {
        let frame = message.to_json()?;
        let targets: Vec<Arc<ConnectionHandle>> = self
            .connections
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();

        let timeout = self.config.send_timeout;
        let sends = targets.iter().map(|handle| {
            let frame = frame.as_str();
            async move { (handle, handle.send(message, frame, timeout).await) }
        });

        let mut report = BroadcastReport::default();
        for (handle, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        client_id = %handle.id,
                        message_type = %message.message_type,
                        error = %e,
                        "broadcast delivery failed"
                    );
                    report.failed.push(handle.id.clone());
                }
            }
        }
        Ok(report)
    }
}
