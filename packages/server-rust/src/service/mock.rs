//! Recording transport for router and server tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use switchboard_core::Message;

use crate::network::{
    BroadcastReport, ClientCallback, ClientId, MessageCallback, TransportCallbacks,
    TransportError,
};
use crate::traits::TransportAdapter;

#[derive(Default)]
pub(crate) struct MockTransport {
    callbacks: TransportCallbacks,
    clients: Mutex<HashSet<ClientId>>,
    sent: Mutex<Vec<(ClientId, Message)>>,
    broadcasts: Mutex<Vec<Message>>,
    pub initialize_calls: AtomicUsize,
    pub shutdown_calls: AtomicUsize,
    pub fail_initialize: AtomicBool,
    pub fail_shutdown: AtomicBool,
    pub shutdown_delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, id: &str) -> ClientId {
        let id = ClientId::new(id);
        self.clients.lock().insert(id.clone());
        self.callbacks.emit_connect(&id);
        id
    }

    pub fn disconnect(&self, id: &ClientId) {
        if self.clients.lock().remove(id) {
            self.callbacks.emit_disconnect(id);
        }
    }

    pub fn inbound(&self, id: &ClientId, message: Message) {
        self.callbacks.emit_message(message, id);
    }

    pub fn sent(&self) -> Vec<(ClientId, Message)> {
        self.sent.lock().clone()
    }

    pub fn broadcasts(&self) -> Vec<Message> {
        self.broadcasts.lock().clone()
    }

    /// Waits until at least `n` addressed sends were recorded.
    pub async fn wait_for_sent(&self, n: usize) -> Vec<(ClientId, Message)> {
        for _ in 0..500 {
            let sent = self.sent();
            if sent.len() >= n {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {n} sends, saw {}", self.sent().len());
    }
}

#[async_trait]
impl TransportAdapter for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(TransportError::Server("bind refused".into()));
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.shutdown_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_shutdown.load(Ordering::SeqCst) {
            return Err(TransportError::Server("listener crashed".into()));
        }
        let ids: Vec<ClientId> = self.clients.lock().drain().collect();
        for id in &ids {
            self.callbacks.emit_disconnect(id);
        }
        Ok(())
    }

    async fn broadcast(&self, message: &Message) -> Result<BroadcastReport, TransportError> {
        self.broadcasts.lock().push(message.clone());
        Ok(BroadcastReport {
            delivered: self.clients.lock().len(),
            failed: Vec::new(),
        })
    }

    async fn send_to_client(
        &self,
        client_id: &ClientId,
        message: &Message,
    ) -> Result<(), TransportError> {
        if !self.clients.lock().contains(client_id) {
            return Err(TransportError::ClientNotFound(client_id.clone()));
        }
        self.sent.lock().push((client_id.clone(), message.clone()));
        Ok(())
    }

    fn on_client_connect(&self, callback: ClientCallback) {
        self.callbacks.add_connect(callback);
    }

    fn on_client_disconnect(&self, callback: ClientCallback) {
        self.callbacks.add_disconnect(callback);
    }

    fn on_message(&self, callback: MessageCallback) {
        self.callbacks.add_message(callback);
    }

    fn connected_count(&self) -> usize {
        self.clients.lock().len()
    }
}
