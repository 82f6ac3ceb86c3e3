//! Listener lifecycle shared by both transports: bind, serve, drain, stop.

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::config::NetworkConfig;
use super::error::TransportError;

/// Health of one transport listener.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Not yet bound.
    Starting,
    /// Accepting connections.
    Ready,
    /// Closing connections; new ones are refused.
    Draining,
    /// Listener released.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Lock-free shared health cell read by request handlers.
#[derive(Debug, Clone)]
pub struct ListenerHealth(Arc<ArcSwap<HealthState>>);

impl ListenerHealth {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(ArcSwap::from_pointee(HealthState::Starting)))
    }

    #[must_use]
    pub fn get(&self) -> HealthState {
        **self.0.load()
    }

    pub fn set(&self, state: HealthState) {
        self.0.store(Arc::new(state));
    }

    /// Whether new clients may connect.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.get() == HealthState::Ready
    }
}

impl Default for ListenerHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds the configured address.
///
/// # Errors
///
/// Returns `TransportError::Bind` if the address is unavailable.
pub async fn bind(config: &NetworkConfig) -> Result<TcpListener, TransportError> {
    let addr = config.addr();
    TcpListener::bind(&addr)
        .await
        .map_err(|source| TransportError::Bind { addr, source })
}

/// A running `axum::serve` task plus the means to stop it.
#[derive(Debug)]
pub struct ServeHandle {
    port: u16,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<std::io::Result<()>>,
}

impl ServeHandle {
    /// Starts serving `router` on an already-bound listener.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Bind` if the listener's local address cannot
    /// be read.
    pub fn spawn(listener: TcpListener, router: Router, name: &str) -> Result<Self, TransportError> {
        let local = listener.local_addr().map_err(|source| TransportError::Bind {
            addr: "<bound listener>".to_string(),
            source,
        })?;
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    // A dropped sender also means stop.
                    let _ = stop_rx.wait_for(|stop| *stop).await;
                })
                .await
        });

        info!(transport = name, addr = %local, "listener bound");
        Ok(Self {
            port: local.port(),
            stop_tx,
            task,
        })
    }

    /// The port actually bound, which differs from the configured one when
    /// the configured port is 0.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Signals graceful shutdown and waits for the serve task to finish.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Server` if serving failed or the task
    /// panicked.
    pub async fn stop(self) -> Result<(), TransportError> {
        let _ = self.stop_tx.send(true);
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Server(e.to_string())),
            Err(e) => Err(TransportError::Server(e.to_string())),
        }
    }
}
