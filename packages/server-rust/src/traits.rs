use async_trait::async_trait;
use switchboard_core::Message;

use crate::network::{BroadcastReport, ClientCallback, ClientId, MessageCallback, TransportError};

/// Capability set the server drives a transport through.
///
/// Implementations: [`WebSocketTransport`](crate::network::WebSocketTransport)
/// (push), [`HttpPollTransport`](crate::network::HttpPollTransport) (poll),
/// and a recording mock in tests.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Short name used in logs and status output.
    fn name(&self) -> &'static str;

    /// Binds listening resources. Returns once the transport accepts clients.
    ///
    /// # Errors
    ///
    /// Fails if the listener cannot be bound or the transport is already
    /// running.
    async fn initialize(&self) -> Result<(), TransportError>;

    /// Closes every client and releases listening resources. Idempotent.
    ///
    /// # Errors
    ///
    /// Fails if the serve task ended abnormally.
    async fn shutdown(&self) -> Result<(), TransportError>;

    /// Best-effort delivery to every client connected at call time.
    ///
    /// # Errors
    ///
    /// Fails only if the message cannot be encoded; per-client failures are
    /// reported, not raised.
    async fn broadcast(&self, message: &Message) -> Result<BroadcastReport, TransportError>;

    /// Delivers one message to one client.
    ///
    /// # Errors
    ///
    /// `TransportError::ClientNotFound` if the id is unknown.
    async fn send_to_client(&self, client_id: &ClientId, message: &Message)
        -> Result<(), TransportError>;

    fn on_client_connect(&self, callback: ClientCallback);

    fn on_client_disconnect(&self, callback: ClientCallback);

    fn on_message(&self, callback: MessageCallback);

    /// Number of clients currently known to this transport.
    fn connected_count(&self) -> usize;
}
