//! Ordered middleware around a terminal dispatch stage.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use switchboard_core::Message;
use tracing::{debug, error};

use crate::network::ClientId;
use crate::service::error::RouterError;
use crate::service::registry::HandlerRegistry;

// ---------------------------------------------------------------------------
// Middleware trait
// ---------------------------------------------------------------------------

/// One stage of the dispatch chain.
///
/// A middleware may inspect or rewrite the message, call `next.run(..)` to
/// continue, or return without calling it to short-circuit. For requests a
/// short-circuit must produce the reply itself; returning `Ok(None)` for a
/// request is reported as a missing response.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        message: Message,
        client_id: &ClientId,
        next: Next<'_>,
    ) -> anyhow::Result<Option<Message>>;
}

// ---------------------------------------------------------------------------
// Terminal stage
// ---------------------------------------------------------------------------

/// What runs after the last middleware.
#[derive(Clone, Copy)]
pub enum Terminal<'a> {
    /// Look up exactly one request handler and return its reply.
    Request(&'a HandlerRegistry),
    /// Fan out to every event handler; yields no reply.
    Event(&'a HandlerRegistry),
}

impl Terminal<'_> {
    async fn run(self, message: Message, client_id: &ClientId) -> anyhow::Result<Option<Message>> {
        match self {
            Self::Request(handlers) => {
                let handler = handlers.request_handler(&message.message_type).ok_or_else(|| {
                    RouterError::HandlerNotFound {
                        message_type: message.message_type.clone(),
                    }
                })?;
                handler.handle(message, client_id).await.map(Some)
            }
            Self::Event(handlers) => {
                fan_out_event(handlers, message, client_id).await;
                Ok(None)
            }
        }
    }
}

/// Runs every handler for an event concurrently and waits for all of them.
/// Failures are logged one by one and never abort the others.
async fn fan_out_event(handlers: &HandlerRegistry, message: Message, client_id: &ClientId) {
    let bound = handlers.event_handlers(&message.message_type);
    if bound.is_empty() {
        debug!(message_type = %message.message_type, "no event handlers registered");
        return;
    }

    let runs = bound.iter().map(|handler| {
        let message_type = message.message_type.clone();
        let run = AssertUnwindSafe(handler.handle(message.clone(), client_id)).catch_unwind();
        async move {
            run.await
                .unwrap_or_else(|_| Err(RouterError::HandlerPanicked { message_type }.into()))
        }
    });
    for (index, result) in join_all(runs).await.into_iter().enumerate() {
        if let Err(e) = result {
            error!(
                message_type = %message.message_type,
                message_id = %message.id,
                client_id = %client_id,
                handler = index,
                "event handler failed: {e:#}"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Next
// ---------------------------------------------------------------------------

/// Continuation handed to each middleware.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    terminal: Terminal<'a>,
    client_id: &'a ClientId,
}

impl Next<'_> {
    /// Passes `message` to the rest of the chain.
    ///
    /// # Errors
    ///
    /// Propagates whatever the downstream middleware or handler returns,
    /// including `RouterError::HandlerNotFound` from the request stage.
    pub async fn run(self, message: Message) -> anyhow::Result<Option<Message>> {
        match self.remaining.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    remaining: rest,
                    terminal: self.terminal,
                    client_id: self.client_id,
                };
                head.handle(message, self.client_id, next).await
            }
            None => self.terminal.run(message, self.client_id).await,
        }
    }
}

// ---------------------------------------------------------------------------
// MiddlewareChain
// ---------------------------------------------------------------------------

/// Append-only middleware list with copy-on-write snapshots.
///
/// Each execution loads one snapshot up front, so registering middleware
/// while traffic flows never changes a dispatch already in progress.
pub struct MiddlewareChain {
    stack: ArcSwap<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stack: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Appends `middleware` after every previously registered one.
    pub fn push(&self, middleware: Arc<dyn Middleware>) {
        self.stack.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&middleware));
            next
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.load().is_empty()
    }

    /// Runs `message` through the current snapshot and then `terminal`.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a middleware or the terminal stage.
    pub async fn execute(
        &self,
        message: Message,
        client_id: &ClientId,
        terminal: Terminal<'_>,
    ) -> anyhow::Result<Option<Message>> {
        let snapshot = self.stack.load_full();
        Next {
            remaining: snapshot.as_slice(),
            terminal,
            client_id,
        }
        .run(message)
        .await
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
