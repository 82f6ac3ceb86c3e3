//! Message routing: classification, middleware, handler dispatch, and error
//! envelope synthesis.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use switchboard_core::{Message, MessageCategory};
use tracing::{debug, error, warn};

use super::error::RouterError;
use super::middleware::{Middleware, MiddlewareChain, Terminal};
use super::registry::{EventHandler, HandlerRegistry, RequestHandler};
use crate::network::ClientId;

// ---------------------------------------------------------------------------
// MessageRouter
// ---------------------------------------------------------------------------

/// Routes inbound envelopes by type prefix.
///
/// | Category | Outcome |
/// |---|---|
/// | `request.*` | middleware, one handler, reply or `error.<type>` |
/// | `event.*` | middleware, every handler, no reply |
/// | `error.*`, `system.*` | dropped |
/// | anything else | `error.<type>` |
#[derive(Default)]
pub struct MessageRouter {
    handlers: HandlerRegistry,
    middleware: MiddlewareChain,
}

impl MessageRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns `RouterError::DuplicateHandler` if `message_type` is taken.
    pub fn register_request_handler(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), RouterError> {
        self.handlers.register_request(message_type, handler)
    }

    pub fn register_event_handler(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) {
        self.handlers.register_event(message_type, handler);
    }

    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    #[must_use]
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Processes one inbound message and returns the envelope to send back
    /// to the sender, if any.
    ///
    /// Never fails: request failures of any kind become an `error.<type>`
    /// envelope that keeps the original id and context.
    pub async fn dispatch(&self, message: Message, client_id: &ClientId) -> Option<Message> {
        let category = match message.category() {
            Ok(category) => category,
            Err(e) => {
                warn!(
                    client_id = %client_id,
                    message_type = %message.message_type,
                    "unroutable message"
                );
                return Some(Message::error_for(&message, e.to_string()));
            }
        };

        match category {
            MessageCategory::Request => Some(self.dispatch_request(message, client_id).await),
            MessageCategory::Event => {
                self.dispatch_event(message, client_id).await;
                None
            }
            MessageCategory::Error | MessageCategory::System => {
                warn!(
                    client_id = %client_id,
                    message_type = %message.message_type,
                    "dropping router-originated type sent by a client"
                );
                None
            }
        }
    }

    async fn dispatch_request(&self, message: Message, client_id: &ClientId) -> Message {
        let origin = header_of(&message);
        let run = self
            .middleware
            .execute(message, client_id, Terminal::Request(&self.handlers));
        let result = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(RouterError::HandlerPanicked {
                message_type: origin.message_type.clone(),
            }
            .into()),
        };

        match result {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                let e = RouterError::NoResponseProduced;
                warn!(client_id = %client_id, message_type = %origin.message_type, "{e}");
                Message::error_for(&origin, e.to_string())
            }
            Err(e) => {
                error!(
                    client_id = %client_id,
                    message_type = %origin.message_type,
                    message_id = %origin.id,
                    "request failed: {e:#}"
                );
                Message::error_for(&origin, e.to_string())
            }
        }
    }

    async fn dispatch_event(&self, message: Message, client_id: &ClientId) {
        let message_type = message.message_type.clone();
        let run = self
            .middleware
            .execute(message, client_id, Terminal::Event(&self.handlers));
        let result = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(RouterError::HandlerPanicked {
                message_type: message_type.clone(),
            }
            .into()),
        };

        match result {
            Ok(_) => debug!(client_id = %client_id, message_type = %message_type, "event dispatched"),
            Err(e) => error!(
                client_id = %client_id,
                message_type = %message_type,
                "event middleware failed: {e:#}"
            ),
        }
    }
}

/// Copy of the fields an error envelope needs, without the payload.
fn header_of(message: &Message) -> Message {
    Message {
        id: message.id.clone(),
        message_type: message.message_type.clone(),
        payload: Value::Null,
        timestamp: message.timestamp,
        context: message.context.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
