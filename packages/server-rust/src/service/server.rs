//! The server: owns a transport, routes its traffic, and coordinates shutdown.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use switchboard_core::Message;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::clients::ClientRegistry;
use super::config::{ServerConfig, DEFAULT_SHUTDOWN_REASON};
use super::error::RouterError;
use super::lifecycle::{LifecycleController, ServerState};
use super::middleware::Middleware;
use super::registry::{EventHandler, RequestHandler};
use super::router::MessageRouter;
use crate::network::{BroadcastReport, ClientId};
use crate::traits::TransportAdapter;

/// Pause between broadcasting the shutdown notice and closing the transport,
/// so clients can read the notice first.
pub const SHUTDOWN_NOTICE_GRACE: Duration = Duration::from_secs(1);

/// How a call to [`Server::shutdown`] ended. Shutdown never returns an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The transport closed in time; the server is `Stopped`.
    Completed,
    /// Transport teardown outran the configured timeout.
    TimedOut,
    /// Transport teardown failed with the given reason.
    Failed(String),
    /// Nothing to do: another shutdown already ran or is running, or the
    /// server is still initializing.
    Skipped { state: ServerState },
}

/// Snapshot returned by [`Server::status`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub state: ServerState,
    pub transport: &'static str,
    pub connected_clients: usize,
    pub in_flight: u64,
    pub uptime_secs: u64,
    pub development: bool,
    pub request_types: Vec<String>,
}

struct ServerInner {
    transport: Arc<dyn TransportAdapter>,
    router: MessageRouter,
    clients: ClientRegistry,
    lifecycle: LifecycleController,
    config: ServerConfig,
}

/// Cheaply cloneable handle to one server instance.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Creates a server over `transport` and subscribes to its callbacks.
    /// Nothing is bound until [`initialize`](Self::initialize).
    #[must_use]
    pub fn new(transport: Arc<dyn TransportAdapter>, config: ServerConfig) -> Self {
        let inner = Arc::new(ServerInner {
            transport,
            router: MessageRouter::new(),
            clients: ClientRegistry::new(),
            lifecycle: LifecycleController::new(),
            config,
        });
        wire_callbacks(&inner);
        Self { inner }
    }

    /// Binds the transport and starts dispatching.
    ///
    /// # Errors
    ///
    /// `RouterError::InvalidState` unless the server is `Created`, or the
    /// transport's own error. A failed initialize leaves the server
    /// `Created` so it can be retried.
    pub async fn initialize(&self) -> Result<(), RouterError> {
        let lifecycle = &self.inner.lifecycle;
        lifecycle
            .transition(ServerState::Created, ServerState::Initializing)
            .map_err(|state| RouterError::InvalidState {
                action: "initialize",
                state: state.as_str(),
            })?;

        if let Err(e) = self.inner.transport.initialize().await {
            let _ = lifecycle.transition(ServerState::Initializing, ServerState::Created);
            return Err(e.into());
        }

        lifecycle
            .transition(ServerState::Initializing, ServerState::Running)
            .map_err(|state| RouterError::InvalidState {
                action: "start running",
                state: state.as_str(),
            })?;
        info!(transport = self.inner.transport.name(), "server running");
        Ok(())
    }

    /// # Errors
    ///
    /// `RouterError::DuplicateHandler` if the type already has a handler.
    pub fn register_request_handler(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), RouterError> {
        self.inner.router.register_request_handler(message_type, handler)
    }

    pub fn register_event_handler(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) {
        self.inner.router.register_event_handler(message_type, handler);
    }

    /// Appends middleware; dispatches already running keep their chain.
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.inner.router.use_middleware(middleware);
    }

    /// Best-effort delivery to every connected client.
    ///
    /// # Errors
    ///
    /// Only if the message cannot be encoded.
    pub async fn broadcast(&self, message: &Message) -> Result<BroadcastReport, RouterError> {
        Ok(self.inner.transport.broadcast(message).await?)
    }

    /// # Errors
    ///
    /// `RouterError::ClientNotFound` if the client is not connected.
    pub async fn send_to_client(
        &self,
        client_id: &ClientId,
        message: &Message,
    ) -> Result<(), RouterError> {
        Ok(self.inner.transport.send_to_client(client_id, message).await?)
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.inner.lifecycle.state()
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn TransportAdapter> {
        &self.inner.transport
    }

    #[must_use]
    pub fn router(&self) -> &MessageRouter {
        &self.inner.router
    }

    #[must_use]
    pub fn status(&self) -> ServerStatus {
        let inner = &self.inner;
        ServerStatus {
            state: inner.lifecycle.state(),
            transport: inner.transport.name(),
            connected_clients: inner.clients.len(),
            in_flight: inner.lifecycle.in_flight_count(),
            uptime_secs: inner.lifecycle.uptime_secs(),
            development: inner.config.development,
            request_types: inner.router.handlers().request_types(),
        }
    }

    /// Shuts down with the default notice reason.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        self.shutdown_with_reason(DEFAULT_SHUTDOWN_REASON).await
    }

    /// Stops dispatching, notifies clients, waits [`SHUTDOWN_NOTICE_GRACE`],
    /// then races transport teardown against the configured timeout.
    ///
    /// Concurrent calls are safe: exactly one performs the sequence and the
    /// rest return `Skipped`. A server that was never initialized moves
    /// straight to `Stopped` without touching the transport.
    pub async fn shutdown_with_reason(&self, reason: &str) -> ShutdownOutcome {
        let inner = &self.inner;
        let lifecycle = &inner.lifecycle;

        match lifecycle.transition(ServerState::Running, ServerState::ShuttingDown) {
            Ok(()) => {}
            Err(ServerState::Created)
                if lifecycle
                    .transition(ServerState::Created, ServerState::Stopped)
                    .is_ok() =>
            {
                info!("server stopped before initialize");
                return ShutdownOutcome::Completed;
            }
            Err(_) => {
                let state = lifecycle.state();
                debug!(state = %state, "shutdown already handled");
                return ShutdownOutcome::Skipped { state };
            }
        }

        info!(transport = inner.transport.name(), reason, "shutting down");

        #[allow(clippy::cast_possible_truncation)]
        let reconnect_in = inner.config.reconnect_hint.as_millis() as u64;
        let notice = Message::system_shutdown(reason, reconnect_in);
        match inner.transport.broadcast(&notice).await {
            Ok(report) => info!(
                delivered = report.delivered,
                failed = report.failed.len(),
                "shutdown notice sent"
            ),
            Err(e) => warn!(error = %e, "shutdown notice not sent"),
        }

        tokio::time::sleep(SHUTDOWN_NOTICE_GRACE).await;

        let timeout = inner.config.shutdown_timeout;
        match tokio::time::timeout(timeout, inner.transport.shutdown()).await {
            Ok(Ok(())) => {
                let _ = lifecycle.transition(ServerState::ShuttingDown, ServerState::Stopped);
                info!("server stopped");
                ShutdownOutcome::Completed
            }
            Ok(Err(e)) => {
                error!(error = %e, "transport shutdown failed");
                ShutdownOutcome::Failed(e.to_string())
            }
            Err(_) => {
                #[allow(clippy::cast_possible_truncation)]
                let timeout_ms = timeout.as_millis() as u64;
                error!("{}", RouterError::TransportShutdownTimeout { timeout_ms });
                ShutdownOutcome::TimedOut
            }
        }
    }
}

/// Subscribes the server to its transport. Callbacks hold a weak reference
/// so the transport never keeps a dropped server alive.
fn wire_callbacks(inner: &Arc<ServerInner>) {
    let weak = Arc::downgrade(inner);
    inner.transport.on_client_connect(Arc::new(move |client_id: &ClientId| {
        if let Some(inner) = weak.upgrade() {
            inner.clients.insert(client_id.clone());
        }
    }));

    let weak = Arc::downgrade(inner);
    inner.transport.on_client_disconnect(Arc::new(move |client_id: &ClientId| {
        if let Some(inner) = weak.upgrade() {
            inner.clients.remove(client_id);
        }
    }));

    let weak: Weak<ServerInner> = Arc::downgrade(inner);
    inner.transport.on_message(Arc::new(move |message: Message, client_id: ClientId| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if !inner.lifecycle.is_accepting() {
            warn!(
                client_id = %client_id,
                message_type = %message.message_type,
                state = %inner.lifecycle.state(),
                "not running, dropping inbound message"
            );
            return;
        }
        let guard = inner.lifecycle.in_flight_guard();
        tokio::spawn(async move {
            let _guard = guard;
            inner.process(message, client_id).await;
        });
    }));
}

impl ServerInner {
    async fn process(&self, message: Message, client_id: ClientId) {
        let span = info_span!(
            "message",
            client_id = %client_id,
            message_type = %message.message_type,
            message_id = %message.id,
        );
        async {
            let Some(reply) = self.router.dispatch(message, &client_id).await else {
                return;
            };
            if let Err(e) = self.transport.send_to_client(&client_id, &reply).await {
                warn!(error = %e, reply_type = %reply.message_type, "reply not delivered");
            }
        }
        .instrument(span)
        .await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use switchboard_core::{ShutdownNotice, SYSTEM_SHUTDOWN};

    use super::*;
    use crate::service::mock::MockTransport;
    use crate::service::registry::{event_fn, request_fn};

    fn setup(config: ServerConfig) -> (Server, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let server = Server::new(Arc::clone(&transport) as Arc<dyn TransportAdapter>, config);
        server
            .register_request_handler(
                "request.echo",
                request_fn(|message: Message, _| async move {
                    Ok(Message::reply_to(&message, "response.echo", message.payload.clone()))
                }),
            )
            .unwrap();
        (server, transport)
    }

    async fn running(config: ServerConfig) -> (Server, Arc<MockTransport>) {
        let (server, transport) = setup(config);
        server.initialize().await.unwrap();
        (server, transport)
    }

    #[tokio::test]
    async fn initialize_moves_to_running() {
        let (server, transport) = setup(ServerConfig::default());
        assert_eq!(server.state(), ServerState::Created);

        server.initialize().await.unwrap();
        assert_eq!(server.state(), ServerState::Running);
        assert_eq!(transport.initialize_calls.load(Ordering::SeqCst), 1);

        let err = server.initialize().await.unwrap_err();
        assert!(matches!(err, RouterError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn failed_initialize_can_be_retried() {
        let (server, transport) = setup(ServerConfig::default());
        transport.fail_initialize.store(true, Ordering::SeqCst);
        assert!(server.initialize().await.is_err());
        assert_eq!(server.state(), ServerState::Created);

        transport.fail_initialize.store(false, Ordering::SeqCst);
        server.initialize().await.unwrap();
        assert_eq!(server.state(), ServerState::Running);
    }

    #[tokio::test]
    async fn request_reply_reaches_sender() {
        let (_server, transport) = running(ServerConfig::default()).await;
        let client = transport.connect("c1");
        let request = Message::new("request.echo", json!({"x": 1}));

        transport.inbound(&client, request.clone());
        let sent = transport.wait_for_sent(1).await;
        assert_eq!(sent[0].0, client);
        assert_eq!(sent[0].1.id, request.id);
        assert_eq!(sent[0].1.payload, json!({"x": 1}));
    }

    #[tokio::test]
    async fn failed_request_sends_error_envelope() {
        let (_server, transport) = running(ServerConfig::default()).await;
        let client = transport.connect("c1");

        transport.inbound(&client, Message::new("request.unknown", json!({})));
        let sent = transport.wait_for_sent(1).await;
        assert_eq!(sent[0].1.message_type, "error.request.unknown");
    }

    #[tokio::test]
    async fn panicking_handler_still_answers_the_sender() {
        let (server, transport) = running(ServerConfig::default()).await;
        server
            .register_request_handler(
                "request.boom",
                request_fn(|message: Message, _| async move {
                    assert!(message.payload.is_null(), "unexpected payload");
                    Ok(message)
                }),
            )
            .unwrap();
        let client = transport.connect("c1");
        let request = Message::new("request.boom", json!({"bad": true}));

        transport.inbound(&client, request.clone());
        let sent = transport.wait_for_sent(1).await;
        assert_eq!(sent[0].0, client);
        assert_eq!(sent[0].1.message_type, "error.request.boom");
        assert_eq!(sent[0].1.id, request.id);
    }

    #[tokio::test]
    async fn events_produce_no_reply() {
        let (server, transport) = running(ServerConfig::default()).await;
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        server.register_event_handler(
            "event.note",
            event_fn(move |_, _| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        let client = transport.connect("c1");

        transport.inbound(&client, Message::new("event.note", json!({})));
        for _ in 0..100 {
            if hits.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn messages_before_initialize_are_dropped() {
        let (_server, transport) = setup(ServerConfig::default());
        let client = transport.connect("c1");

        transport.inbound(&client, Message::new("request.echo", json!({})));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn status_tracks_clients() {
        let (server, transport) = running(ServerConfig {
            development: true,
            ..ServerConfig::default()
        })
        .await;
        let a = transport.connect("a");
        transport.connect("b");
        transport.disconnect(&a);

        let status = server.status();
        assert_eq!(status.state, ServerState::Running);
        assert_eq!(status.transport, "mock");
        assert_eq!(status.connected_clients, 1);
        assert!(status.development);
        assert_eq!(status.request_types, vec!["request.echo"]);
    }

    #[tokio::test]
    async fn send_to_unknown_client_is_client_not_found() {
        let (server, _transport) = running(ServerConfig::default()).await;
        let err = server
            .send_to_client(&ClientId::new("ghost"), &Message::new("event.x", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::ClientNotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_notifies_then_stops() {
        let (server, transport) = running(ServerConfig::default()).await;
        transport.connect("c1");

        let outcome = server.shutdown_with_reason("maintenance").await;
        assert_eq!(outcome, ShutdownOutcome::Completed);
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(transport.shutdown_calls.load(Ordering::SeqCst), 1);

        let broadcasts = transport.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].message_type, SYSTEM_SHUTDOWN);
        let notice: ShutdownNotice = serde_json::from_value(broadcasts[0].payload.clone()).unwrap();
        assert_eq!(notice.reason, "maintenance");
        assert_eq!(notice.reconnect_in, 5000);
        assert_eq!(server.status().connected_clients, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_grace_before_teardown() {
        let (server, transport) = running(ServerConfig::default()).await;
        let handle = {
            let server = server.clone();
            tokio::spawn(async move { server.shutdown().await })
        };

        tokio::time::sleep(SHUTDOWN_NOTICE_GRACE / 2).await;
        assert_eq!(transport.broadcasts().len(), 1);
        assert_eq!(transport.shutdown_calls.load(Ordering::SeqCst), 0);
        assert_eq!(server.state(), ServerState::ShuttingDown);

        assert_eq!(handle.await.unwrap(), ShutdownOutcome::Completed);
        assert_eq!(transport.shutdown_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_shutdown_runs_once() {
        let (server, transport) = running(ServerConfig::default()).await;

        let (a, b) = tokio::join!(server.shutdown(), server.shutdown());
        let outcomes = [a, b];
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == ShutdownOutcome::Completed)
                .count(),
            1
        );
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, ShutdownOutcome::Skipped { .. })));
        assert_eq!(transport.broadcasts().len(), 1);
        assert_eq!(transport.shutdown_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_transport_times_out() {
        let (server, transport) = running(ServerConfig {
            shutdown_timeout: Duration::from_millis(200),
            ..ServerConfig::default()
        })
        .await;
        *transport.shutdown_delay.lock() = Some(Duration::from_secs(60));

        assert_eq!(server.shutdown().await, ShutdownOutcome::TimedOut);
        assert_eq!(server.state(), ServerState::ShuttingDown);
        assert!(matches!(
            server.shutdown().await,
            ShutdownOutcome::Skipped {
                state: ServerState::ShuttingDown
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_transport_shutdown_is_reported() {
        let (server, transport) = running(ServerConfig::default()).await;
        transport.fail_shutdown.store(true, Ordering::SeqCst);

        let outcome = server.shutdown().await;
        assert!(matches!(outcome, ShutdownOutcome::Failed(reason) if reason.contains("listener crashed")));
    }

    #[tokio::test]
    async fn shutdown_before_initialize_skips_transport() {
        let (server, transport) = setup(ServerConfig::default());
        assert_eq!(server.shutdown().await, ShutdownOutcome::Completed);
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(transport.shutdown_calls.load(Ordering::SeqCst), 0);
        assert!(transport.broadcasts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn messages_after_shutdown_are_dropped() {
        let (server, transport) = running(ServerConfig::default()).await;
        let client = transport.connect("c1");
        *transport.shutdown_delay.lock() = Some(Duration::from_secs(60));
        let handle = {
            let server = server.clone();
            tokio::spawn(async move { server.shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        transport.inbound(&client, Message::new("request.echo", json!({})));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(transport.sent().is_empty());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_dispatched_after_shutdown_completes() {
        let (server, transport) = running(ServerConfig::default()).await;
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        server.register_event_handler(
            "event.ping",
            event_fn(move |_, _| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        let client = transport.connect("c1");

        assert_eq!(server.shutdown().await, ShutdownOutcome::Completed);
        assert_eq!(server.state(), ServerState::Stopped);

        transport.inbound(&client, Message::new("event.ping", json!({})));
        transport.inbound(&client, Message::new("request.echo", json!({})));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(transport.sent().is_empty());
        assert_eq!(server.status().in_flight, 0);
    }
}
