//! Router-side view of connected clients.

use dashmap::DashSet;

use crate::network::ClientId;

/// Membership set fed only by transport connect/disconnect callbacks.
///
/// Used for introspection; dispatch never consults it.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashSet<ClientId>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the client was already present.
    pub fn insert(&self, client_id: ClientId) -> bool {
        self.clients.insert(client_id)
    }

    /// Returns `false` if the client was not present.
    pub fn remove(&self, client_id: &ClientId) -> bool {
        self.clients.remove(client_id).is_some()
    }

    #[must_use]
    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.clients.contains(client_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
