//! Per-request time budget.
//!
//! Requests that exceed the budget fail with `RouterError::Timeout`, which
//! the router turns into an error envelope. Events are not bounded.

use std::time::Duration;

use async_trait::async_trait;
use switchboard_core::{Message, MessageCategory};

use super::chain::{Middleware, Next};
use crate::network::ClientId;
use crate::service::error::RouterError;

// ---------------------------------------------------------------------------
// TimeoutMiddleware
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutMiddleware {
    budget: Duration,
}

impl TimeoutMiddleware {
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }
}

#[async_trait]
impl Middleware for TimeoutMiddleware {
    async fn handle(
        &self,
        message: Message,
        _client_id: &ClientId,
        next: Next<'_>,
    ) -> anyhow::Result<Option<Message>> {
        if message.category().ok() != Some(MessageCategory::Request) {
            return next.run(message).await;
        }

        match tokio::time::timeout(self.budget, next.run(message)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                #[allow(clippy::cast_possible_truncation)]
                let timeout_ms = self.budget.as_millis() as u64;
                Err(RouterError::Timeout { timeout_ms }.into())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
