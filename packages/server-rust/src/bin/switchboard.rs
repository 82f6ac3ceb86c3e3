//! `switchboard` -- runs the router over WebSocket push, HTTP polling, or both.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use futures_util::future::join_all;
use switchboard_core::Message;
use switchboard_server::network::{NetworkConfig, PollConfig};
use switchboard_server::service::middleware::{
    AuthMiddleware, JwtVerifier, MetricsMiddleware, TimeoutMiddleware,
};
use switchboard_server::service::{event_fn, request_fn, Server, ServerConfig, ShutdownOutcome};
use switchboard_server::telemetry::{self, LogFormat};
use switchboard_server::{HttpPollTransport, TransportAdapter, WebSocketTransport};
use tracing::{error, info, warn};

const DEV_JWT_SECRET: &str = "switchboard-dev-secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    Websocket,
    Http,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Environment {
    Development,
    Test,
    Production,
}

/// Transport-agnostic message router.
#[derive(Debug, Parser)]
#[command(name = "switchboard", version)]
struct Cli {
    /// Address every listener binds to.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "WEBSOCKET_PORT", default_value_t = 8080)]
    websocket_port: u16,

    #[arg(long, env = "HTTP_PORT", default_value_t = 8081)]
    http_port: u16,

    /// Which transports to start.
    #[arg(long, env = "DEFAULT_TRANSPORT", value_enum, default_value_t = TransportKind::Websocket)]
    transport: TransportKind,

    #[arg(long, env = "NODE_ENV", value_enum, default_value_t = Environment::Development)]
    environment: Environment,

    /// HS256 secret for bearer tokens.
    #[arg(long, env = "JWT_SECRET", default_value = DEV_JWT_SECRET, hide_env_values = true)]
    jwt_secret: String,

    /// Token lifetime in seconds.
    #[arg(long, env = "JWT_EXPIRES_IN", default_value_t = 86_400)]
    jwt_expires_in: u64,

    /// Default filter when `RUST_LOG` is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "CORS_ALLOWED_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_allowed_origins: Vec<String>,

    #[arg(long, env = "SHUTDOWN_TIMEOUT_MS", default_value_t = 10_000)]
    shutdown_timeout_ms: u64,

    /// Per-request budget; unbounded when unset.
    #[arg(long, env = "REQUEST_TIMEOUT_MS")]
    request_timeout_ms: Option<u64>,

    #[arg(long, env = "POLL_QUEUE_CAPACITY", default_value_t = 256)]
    poll_queue_capacity: usize,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,
}

impl Cli {
    fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    fn network_config(&self, port: u16) -> NetworkConfig {
        NetworkConfig {
            cors_origins: self.cors_allowed_origins.clone(),
            poll: PollConfig {
                queue_capacity: self.poll_queue_capacity,
                ..PollConfig::default()
            },
            ..NetworkConfig::bind(self.host.clone(), port)
        }
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            development: self.is_development(),
            ..ServerConfig::default()
        }
    }

    fn transports(&self) -> Vec<Arc<dyn TransportAdapter>> {
        let mut transports: Vec<Arc<dyn TransportAdapter>> = Vec::new();
        if matches!(self.transport, TransportKind::Websocket | TransportKind::Both) {
            transports.push(Arc::new(WebSocketTransport::new(
                self.network_config(self.websocket_port),
            )));
        }
        if matches!(self.transport, TransportKind::Http | TransportKind::Both) {
            transports.push(Arc::new(HttpPollTransport::new(
                self.network_config(self.http_port),
            )));
        }
        transports
    }
}

/// Installs the middleware stack and the demo handlers on one server.
fn configure(server: &Server, cli: &Cli) -> anyhow::Result<()> {
    server.use_middleware(Arc::new(MetricsMiddleware));
    server.use_middleware(Arc::new(AuthMiddleware::new(JwtVerifier::from_secret(
        cli.jwt_secret.as_bytes(),
        Duration::from_secs(cli.jwt_expires_in),
    ))));
    if let Some(ms) = cli.request_timeout_ms {
        server.use_middleware(Arc::new(TimeoutMiddleware::new(Duration::from_millis(ms))));
    }

    server.register_request_handler(
        "request.echo",
        request_fn(|message: Message, _| async move {
            Ok(Message::reply_to(&message, "response.echo", message.payload.clone()))
        }),
    )?;
    server.register_event_handler(
        "event.notification",
        event_fn(|message: Message, client_id| async move {
            info!(client_id = %client_id, payload = %message.payload, "notification received");
            Ok(())
        }),
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let format = if cli.is_development() {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    };
    telemetry::init_tracing(format, &cli.log_level)?;

    if cli.environment == Environment::Production && cli.jwt_secret == DEV_JWT_SECRET {
        warn!("JWT_SECRET is the development default; set a real secret in production");
    }

    if let Some(port) = cli.metrics_port {
        let handle = telemetry::install_metrics_recorder()?;
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tokio::spawn(async move {
            if let Err(e) = telemetry::serve_metrics(handle, addr).await {
                error!(error = %e, "metrics endpoint stopped");
            }
        });
        info!(%addr, "metrics endpoint enabled");
    }

    let config = cli.server_config();
    let mut servers = Vec::new();
    for transport in cli.transports() {
        let server = Server::new(transport, config.clone());
        configure(&server, &cli)?;
        server
            .initialize()
            .await
            .with_context(|| format!("failed to start {} transport", server.transport().name()))?;
        servers.push(server);
    }
    info!(servers = servers.len(), "switchboard running");

    shutdown_signal().await;
    info!("shutdown signal received");

    let outcomes = join_all(servers.iter().map(Server::shutdown)).await;
    let clean = outcomes
        .iter()
        .all(|outcome| matches!(outcome, ShutdownOutcome::Completed | ShutdownOutcome::Skipped { .. }));
    if clean {
        info!("switchboard stopped");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(?outcomes, "shutdown did not complete cleanly");
        Ok(ExitCode::FAILURE)
    }
}
