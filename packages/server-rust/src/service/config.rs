use std::time::Duration;

/// Default `reason` carried by the `system.shutdown` notice.
pub const DEFAULT_SHUTDOWN_REASON: &str = "Server is shutting down";

/// Server-level configuration, independent of any transport.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long transport teardown may take before shutdown is reported as
    /// timed out.
    pub shutdown_timeout: Duration,
    /// `reconnectIn` hint sent to clients in the shutdown notice.
    pub reconnect_hint: Duration,
    /// Reported by `status()`; the binary also switches to pretty logs.
    pub development: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(10),
            reconnect_hint: Duration::from_secs(5),
            development: false,
        }
    }
}
