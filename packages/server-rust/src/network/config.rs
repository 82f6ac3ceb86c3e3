//! Network configuration types for the transport adapters.

use std::time::Duration;

/// Top-level network configuration for one transport listener.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the listener.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Per-connection settings.
    pub connection: ConnectionConfig,
    /// Outbound queue settings for poll clients.
    pub poll: PollConfig,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time an HTTP request may take, long polls included.
    pub request_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            connection: ConnectionConfig::default(),
            poll: PollConfig::default(),
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl NetworkConfig {
    /// Shorthand for a listener on `host:port` with all other settings defaulted.
    #[must_use]
    pub fn bind(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// The `host:port` string handed to the TCP listener.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Per-connection configuration for push (socket) clients.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bounded mpsc channel capacity for outbound frames per connection.
    pub outbound_channel_capacity: usize,
    /// Maximum time to wait when the outbound channel is full.
    pub send_timeout: Duration,
    /// WebSocket write buffer size in bytes.
    pub ws_write_buffer_size: usize,
    /// Maximum WebSocket write buffer size in bytes.
    pub ws_max_write_buffer_size: usize,
    /// How long a socket may take to answer our close frame.
    pub close_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: 256,
            send_timeout: Duration::from_secs(5),
            ws_write_buffer_size: 131_072,     // 128 KB
            ws_max_write_buffer_size: 524_288, // 512 KB
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// What a full poll queue does with a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest queued entry to make room.
    #[default]
    DropOldest,
    /// Refuse the new entry; the send reports `SendError::Full`.
    Reject,
}

/// Outbound queue configuration for poll clients.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Maximum number of undelivered messages held per client.
    pub queue_capacity: usize,
    /// Behaviour when `queue_capacity` is reached.
    pub overflow: OverflowPolicy,
    /// Upper bound on messages returned by a single poll.
    pub max_batch: usize,
    /// Upper bound on how long a poll may wait for the first message.
    pub max_wait: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            overflow: OverflowPolicy::DropOldest,
            max_batch: 100,
            max_wait: Duration::from_secs(25),
        }
    }
}
