//! Dispatch counters, latency histograms, and a tracing span per message.

use std::time::Instant;

use async_trait::async_trait;
use switchboard_core::Message;
use tracing::{info_span, Instrument};

use super::chain::{Middleware, Next};
use crate::network::ClientId;

/// Records `switchboard_dispatch_total` and
/// `switchboard_dispatch_duration_seconds`, labelled by category and outcome.
#[derive(Debug, Clone, Default)]
pub struct MetricsMiddleware;

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn handle(
        &self,
        message: Message,
        client_id: &ClientId,
        next: Next<'_>,
    ) -> anyhow::Result<Option<Message>> {
        let category = message.category().map_or("unroutable", |c| c.as_str());
        let span = info_span!(
            "dispatch",
            message_type = %message.message_type,
            message_id = %message.id,
            client_id = %client_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let start = Instant::now();
        let result = next.run(message).instrument(span.clone()).await;
        let elapsed = start.elapsed();

        let outcome = if result.is_ok() { "ok" } else { "error" };
        #[allow(clippy::cast_possible_truncation)]
        span.record("duration_ms", elapsed.as_millis() as u64);
        span.record("outcome", outcome);

        ::metrics::counter!("switchboard_dispatch_total", "category" => category, "outcome" => outcome)
            .increment(1);
        ::metrics::histogram!("switchboard_dispatch_duration_seconds", "category" => category)
            .record(elapsed.as_secs_f64());

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::service::middleware::chain::{MiddlewareChain, Terminal};
    use crate::service::registry::{request_fn, HandlerRegistry};

    #[tokio::test]
    async fn passes_results_through() {
        let registry = HandlerRegistry::new();
        registry
            .register_request(
                "request.ok",
                request_fn(|message: Message, _| async move {
                    Ok(Message::reply_to(&message, "response.ok", json!({})))
                }),
            )
            .unwrap();
        let chain = MiddlewareChain::new();
        chain.push(Arc::new(MetricsMiddleware));

        let ok = chain
            .execute(
                Message::new("request.ok", json!({})),
                &ClientId::new("c1"),
                Terminal::Request(&registry),
            )
            .await
            .unwrap();
        assert!(ok.is_some());

        let missing = chain
            .execute(
                Message::new("request.missing", json!({})),
                &ClientId::new("c1"),
                Terminal::Request(&registry),
            )
            .await;
        assert!(missing.is_err());
    }
}
