use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use switchboard_core::Message;

use super::error::RouterError;
use crate::network::ClientId;

// ---------------------------------------------------------------------------
// Handler traits
// ---------------------------------------------------------------------------

/// Produces the reply for one `request.*` type.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, message: Message, client_id: &ClientId) -> anyhow::Result<Message>;
}

/// Reacts to one `event.*` type. Events have no reply channel.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, message: Message, client_id: &ClientId) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a handler.
pub struct FnHandler<F>(F);

/// Wraps `f` as a [`RequestHandler`].
pub fn request_fn<F, Fut>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(Message, ClientId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Message>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Wraps `f` as an [`EventHandler`].
pub fn event_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Message, ClientId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(Message, ClientId) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Message>> + Send,
{
    async fn handle(&self, message: Message, client_id: &ClientId) -> anyhow::Result<Message> {
        (self.0)(message, client_id.clone()).await
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Message, ClientId) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, message: Message, client_id: &ClientId) -> anyhow::Result<()> {
        (self.0)(message, client_id.clone()).await
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Type-keyed handler tables.
///
/// Request types bind exactly one handler; the first registration wins.
/// Event types bind any number of handlers, invoked in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    requests: DashMap<String, Arc<dyn RequestHandler>>,
    events: DashMap<String, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the handler for `message_type`.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::DuplicateHandler` if the type already has a
    /// handler. The existing binding is kept.
    pub fn register_request(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), RouterError> {
        match self.requests.entry(message_type.into()) {
            Entry::Occupied(entry) => Err(RouterError::DuplicateHandler {
                message_type: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(handler);
                Ok(())
            }
        }
    }

    /// Appends a handler for `message_type`.
    pub fn register_event(&self, message_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.events.entry(message_type.into()).or_default().push(handler);
    }

    #[must_use]
    pub fn request_handler(&self, message_type: &str) -> Option<Arc<dyn RequestHandler>> {
        self.requests.get(message_type).map(|h| Arc::clone(h.value()))
    }

    /// Snapshot of the handlers bound to an event type.
    #[must_use]
    pub fn event_handlers(&self, message_type: &str) -> Vec<Arc<dyn EventHandler>> {
        self.events
            .get(message_type)
            .map(|handlers| handlers.value().clone())
            .unwrap_or_default()
    }

    /// Registered request types, sorted.
    #[must_use]
    pub fn request_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.requests.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    /// Registered event types, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.events.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
