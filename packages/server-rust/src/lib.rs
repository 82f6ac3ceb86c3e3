//! Switchboard Server -- transport-agnostic message routing over WebSocket
//! push and HTTP polling.

pub mod network;
pub mod service;
pub mod telemetry;
pub mod traits;

pub use network::{ClientId, HttpPollTransport, NetworkConfig, WebSocketTransport};
pub use service::{Server, ServerConfig, ShutdownOutcome};
pub use traits::TransportAdapter;
