//! The two transport adapters and the listener plumbing they share.

use std::sync::atomic::{AtomicU16, Ordering};

use async_trait::async_trait;
use axum::routing::{get, post};
use axum::Router;
use switchboard_core::Message;
use tokio::sync::Mutex;
use tracing::info;

use super::handlers::{
    connect_handler, disconnect_handler, health_handler, message_handler, poll_handler,
    ws_upgrade_handler, TransportState,
};
use super::listener::{bind, HealthState, ServeHandle};
use super::middleware::build_http_layers;
use super::{
    BroadcastReport, ClientCallback, ClientId, MessageCallback, NetworkConfig, TransportError,
};
use crate::traits::TransportAdapter;

const SHUTDOWN_CLOSE_REASON: &str = "server shutting down";

/// Listener state common to both transports.
struct ListenerCore {
    state: TransportState,
    serve: Mutex<Option<ServeHandle>>,
    port: AtomicU16,
}

impl ListenerCore {
    fn new(name: &'static str, config: NetworkConfig) -> Self {
        Self {
            state: TransportState::new(name, config),
            serve: Mutex::new(None),
            port: AtomicU16::new(0),
        }
    }

    async fn start(&self, routes: Router<TransportState>) -> Result<(), TransportError> {
        let mut serve = self.serve.lock().await;
        if serve.is_some() {
            return Err(TransportError::AlreadyInitialized);
        }

        self.state.health.set(HealthState::Starting);
        let listener = bind(&self.state.config).await?;
        let router = routes
            .route("/health", get(health_handler))
            .layer(build_http_layers(&self.state.config))
            .with_state(self.state.clone());

        let handle = ServeHandle::spawn(listener, router, self.state.name)?;
        self.port.store(handle.port(), Ordering::Relaxed);
        *serve = Some(handle);
        self.state.health.set(HealthState::Ready);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let mut serve = self.serve.lock().await;
        self.state.health.set(HealthState::Draining);

        let closed = self.state.disconnect_all(SHUTDOWN_CLOSE_REASON);
        if closed > 0 {
            info!(transport = self.state.name, clients = closed, "closed client connections");
        }

        let result = match serve.take() {
            Some(handle) => handle.stop().await,
            None => Ok(()),
        };
        self.state.health.set(HealthState::Stopped);
        info!(transport = self.state.name, "transport stopped");
        result
    }

    fn port(&self) -> Option<u16> {
        match self.port.load(Ordering::Relaxed) {
            0 => None,
            port => Some(port),
        }
    }
}

macro_rules! delegate_adapter {
    ($ty:ty) => {
        #[async_trait]
        impl TransportAdapter for $ty {
            fn name(&self) -> &'static str {
                Self::NAME
            }

            async fn initialize(&self) -> Result<(), TransportError> {
                self.core.start(Self::routes()).await
            }

            async fn shutdown(&self) -> Result<(), TransportError> {
                self.core.stop().await
            }

            async fn broadcast(&self, message: &Message) -> Result<BroadcastReport, TransportError> {
                self.core.state.registry.broadcast(message).await
            }

            async fn send_to_client(
                &self,
                client_id: &ClientId,
                message: &Message,
            ) -> Result<(), TransportError> {
                self.core.state.registry.send_to(client_id, message).await
            }

            fn on_client_connect(&self, callback: ClientCallback) {
                self.core.state.callbacks.add_connect(callback);
            }

            fn on_client_disconnect(&self, callback: ClientCallback) {
                self.core.state.callbacks.add_disconnect(callback);
            }

            fn on_message(&self, callback: MessageCallback) {
                self.core.state.callbacks.add_message(callback);
            }

            fn connected_count(&self) -> usize {
                self.core.state.registry.count()
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Push transport
// ---------------------------------------------------------------------------

/// Full-duplex socket transport served at `GET /ws`.
pub struct WebSocketTransport {
    core: ListenerCore,
}

impl WebSocketTransport {
    pub const NAME: &'static str = "websocket";

    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            core: ListenerCore::new(Self::NAME, config),
        }
    }

    /// Bound port once initialized.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.core.port()
    }

    fn routes() -> Router<TransportState> {
        Router::new().route("/ws", get(ws_upgrade_handler))
    }
}

delegate_adapter!(WebSocketTransport);

// ---------------------------------------------------------------------------
// Poll transport
// ---------------------------------------------------------------------------

/// Request/response transport with per-client outbound queues.
pub struct HttpPollTransport {
    core: ListenerCore,
}

impl HttpPollTransport {
    pub const NAME: &'static str = "http";

    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            core: ListenerCore::new(Self::NAME, config),
        }
    }

    /// Bound port once initialized.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.core.port()
    }

    fn routes() -> Router<TransportState> {
        Router::new()
            .route("/connect", post(connect_handler))
            .route("/disconnect", post(disconnect_handler))
            .route("/message", post(message_handler))
            .route("/poll", post(poll_handler))
    }
}

delegate_adapter!(HttpPollTransport);

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::tungstenite::Message as TMessage;

    use super::*;

    fn local() -> NetworkConfig {
        NetworkConfig::bind("127.0.0.1", 0)
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn websocket_round_trip_through_adapter() {
        let transport = Arc::new(WebSocketTransport::new(local()));
        let echo = Arc::clone(&transport);
        transport.on_message(Arc::new(move |message: Message, client_id: ClientId| {
            let echo = Arc::clone(&echo);
            tokio::spawn(async move {
                let reply = Message::reply_to(&message, "response.echo", message.payload.clone());
                echo.send_to_client(&client_id, &reply).await.unwrap();
            });
        }));

        transport.initialize().await.unwrap();
        let port = transport.port().unwrap();

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/ws"))
            .await
            .unwrap();
        let request = Message::new("request.echo", json!({"hi": 1}));
        ws.send(TMessage::Text(request.to_json().unwrap().into()))
            .await
            .unwrap();

        let Some(Ok(TMessage::Text(text))) = ws.next().await else {
            panic!("expected a reply frame");
        };
        let reply = Message::from_json(text.as_str()).unwrap();
        assert_eq!(reply.id, request.id);
        assert_eq!(reply.payload, json!({"hi": 1}));

        transport.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn initialize_twice_fails() {
        let transport = HttpPollTransport::new(local());
        transport.initialize().await.unwrap();
        assert!(matches!(
            transport.initialize().await,
            Err(TransportError::AlreadyInitialized)
        ));
        transport.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_reports_disconnects() {
        let transport = HttpPollTransport::new(local());
        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disconnects);
        transport.on_client_disconnect(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        transport.initialize().await.unwrap();
        let base = format!("http://127.0.0.1:{}", transport.port().unwrap());

        let http = reqwest::Client::new();
        http.post(format!("{base}/connect")).send().await.unwrap();
        assert_eq!(transport.connected_count(), 1);

        transport.shutdown().await.unwrap();
        transport.shutdown().await.unwrap();
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(transport.connected_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_sockets_once() {
        let transport = WebSocketTransport::new(local());
        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disconnects);
        transport.on_client_disconnect(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        transport.initialize().await.unwrap();
        let port = transport.port().unwrap();

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/ws"))
            .await
            .unwrap();
        wait_until(|| transport.connected_count() == 1).await;

        transport.shutdown().await.unwrap();
        match ws.next().await {
            Some(Ok(TMessage::Close(Some(frame)))) => {
                assert_eq!(frame.reason.as_str(), SHUTDOWN_CLOSE_REASON);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        drop(ws);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn health_route_is_served() {
        let transport = HttpPollTransport::new(local());
        transport.initialize().await.unwrap();
        let port = transport.port().unwrap();

        let body: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["transport"], "http");
        assert_eq!(body["state"], "ready");

        transport.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn send_to_unknown_client_fails() {
        let transport = WebSocketTransport::new(local());
        let err = transport
            .send_to_client(&ClientId::new("nobody"), &Message::new("event.x", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ClientNotFound(_)));
    }
}
