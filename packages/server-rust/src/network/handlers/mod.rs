//! axum handlers for both transports and the state they share.

pub mod health;
pub mod http_poll;
pub mod websocket;

pub use health::health_handler;
pub use http_poll::{connect_handler, disconnect_handler, message_handler, poll_handler};
pub use websocket::ws_upgrade_handler;

use std::sync::Arc;

use tracing::info;

use super::{ClientId, ConnectionRegistry, ListenerHealth, NetworkConfig, TransportCallbacks};

/// State carried through axum extractors. Cloning is cheap.
#[derive(Clone)]
pub struct TransportState {
    /// Transport name reported by `/health`.
    pub name: &'static str,
    pub registry: Arc<ConnectionRegistry>,
    pub callbacks: Arc<TransportCallbacks>,
    pub config: Arc<NetworkConfig>,
    pub health: ListenerHealth,
}

impl TransportState {
    #[must_use]
    pub fn new(name: &'static str, config: NetworkConfig) -> Self {
        Self {
            name,
            registry: Arc::new(ConnectionRegistry::new(config.connection.clone())),
            callbacks: Arc::new(TransportCallbacks::new()),
            config: Arc::new(config),
            health: ListenerHealth::new(),
        }
    }

    /// Removes a client and raises the disconnect callbacks.
    ///
    /// Returns `false` if the client was already gone, in which case no
    /// callback fires. Registry removal is the single point that decides
    /// who reports a disconnect.
    pub fn disconnect(&self, client_id: &ClientId, reason: Option<String>) -> bool {
        let Some(handle) = self.registry.remove(client_id) else {
            return false;
        };
        handle.close(reason);
        info!(transport = self.name, client_id = %client_id, "client disconnected");
        metrics::gauge!("switchboard_connections_active", "transport" => self.name).decrement(1.0);
        self.callbacks.emit_disconnect(client_id);
        true
    }

    /// Closes and reports every client. Returns how many were closed.
    pub fn disconnect_all(&self, reason: &str) -> usize {
        let ids = self.registry.ids();
        ids.iter()
            .filter(|id| self.disconnect(id, Some(reason.to_string())))
            .count()
    }

    pub(crate) fn record_connect(&self, client_id: &ClientId) {
        info!(transport = self.name, client_id = %client_id, "client connected");
        metrics::counter!("switchboard_connections_total", "transport" => self.name).increment(1);
        metrics::gauge!("switchboard_connections_active", "transport" => self.name).increment(1.0);
        self.callbacks.emit_connect(client_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::network::PollConfig;

    #[test]
    fn disconnect_fires_once() {
        let state = TransportState::new("test", NetworkConfig::default());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        state
            .callbacks
            .add_disconnect(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));

        let (handle, _rx) = state.registry.register_socket();
        assert!(state.disconnect(&handle.id, None));
        assert!(!state.disconnect(&handle.id, None));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disconnect_all_counts_clients() {
        let state = TransportState::new("test", NetworkConfig::default());
        let (_a, _rx) = state.registry.register_socket();
        let _ = state.registry.register_queue(None, &PollConfig::default());

        assert_eq!(state.disconnect_all("bye"), 2);
        assert_eq!(state.registry.count(), 0);
    }
}
