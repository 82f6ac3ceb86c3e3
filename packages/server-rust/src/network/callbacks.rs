//! Callback sets a transport raises toward its owner.

use std::sync::Arc;

use parking_lot::RwLock;
use switchboard_core::Message;

use super::connection::ClientId;

/// Invoked with the id of a client that connected or disconnected.
pub type ClientCallback = Arc<dyn Fn(&ClientId) + Send + Sync>;

/// Invoked with each decoded inbound message and its sender.
pub type MessageCallback = Arc<dyn Fn(Message, ClientId) + Send + Sync>;

/// Append-only callback lists shared by the push and poll transports.
///
/// Emitting snapshots the list first, so a callback may register further
/// callbacks without deadlocking.
#[derive(Default)]
pub struct TransportCallbacks {
    connect: RwLock<Vec<ClientCallback>>,
    disconnect: RwLock<Vec<ClientCallback>>,
    message: RwLock<Vec<MessageCallback>>,
}

impl TransportCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_connect(&self, callback: ClientCallback) {
        self.connect.write().push(callback);
    }

    pub fn add_disconnect(&self, callback: ClientCallback) {
        self.disconnect.write().push(callback);
    }

    pub fn add_message(&self, callback: MessageCallback) {
        self.message.write().push(callback);
    }

    pub fn emit_connect(&self, client_id: &ClientId) {
        let callbacks = self.connect.read().clone();
        for callback in &callbacks {
            callback(client_id);
        }
    }

    pub fn emit_disconnect(&self, client_id: &ClientId) {
        let callbacks = self.disconnect.read().clone();
        for callback in &callbacks {
            callback(client_id);
        }
    }

    /// Delivers `message` to every message callback, in registration order.
    pub fn emit_message(&self, message: Message, client_id: &ClientId) {
        let callbacks = self.message.read().clone();
        let Some((last, rest)) = callbacks.split_last() else {
            return;
        };
        for callback in rest {
            callback(message.clone(), client_id.clone());
        }
        last(message, client_id.clone());
    }
}

impl std::fmt::Debug for TransportCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCallbacks")
            .field("connect", &self.connect.read().len())
            .field("disconnect", &self.disconnect.read().len())
            .field("message", &self.message.read().len())
            .finish()
    }
}
