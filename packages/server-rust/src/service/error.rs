//! Router-level errors.

use switchboard_core::ClassifyError;

use crate::network::{ClientId, TransportError};

/// Errors raised while registering handlers, dispatching, or shutting down.
///
/// Inside request processing every variant ends up as an `error.<type>`
/// envelope carrying the `Display` text; none reach the transport raw.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Request handler for type '{message_type}' already registered")]
    DuplicateHandler { message_type: String },

    #[error("No handler registered for request type '{message_type}'")]
    HandlerNotFound { message_type: String },

    #[error("Client not found: {client_id}")]
    ClientNotFound { client_id: ClientId },

    #[error("Request handler did not return a response")]
    NoResponseProduced,

    #[error("Handler for '{message_type}' panicked")]
    HandlerPanicked { message_type: String },

    #[error("transport shutdown timed out after {timeout_ms}ms")]
    TransportShutdownTimeout { timeout_ms: u64 },

    #[error(transparent)]
    Unroutable(#[from] ClassifyError),

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for RouterError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ClientNotFound(client_id) => Self::ClientNotFound { client_id },
            other => Self::Transport(other),
        }
    }
}
