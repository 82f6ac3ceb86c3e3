//! Transport-level errors.

use switchboard_core::CodecError;

use super::connection::{ClientId, SendError};

/// Errors raised by transport adapters.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The addressed client is not connected to this transport.
    #[error("Client not found: {0}")]
    ClientNotFound(ClientId),

    /// The listener could not bind its address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The client is known but its outbound path refused the message.
    #[error("send to {client_id} failed: {reason}")]
    Send {
        client_id: ClientId,
        reason: SendError,
    },

    /// The message could not be encoded as a frame.
    #[error(transparent)]
    Encode(#[from] CodecError),

    /// `initialize` was called on a transport that is already serving.
    #[error("transport already initialized")]
    AlreadyInitialized,

    /// The serve task ended abnormally.
    #[error("transport server error: {0}")]
    Server(String),
}
