//! Transport adapters: configuration, connections, listeners, and handlers.

pub mod callbacks;
pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod listener;
pub mod middleware;
pub mod poll_queue;
pub mod transport;

pub use callbacks::*;
pub use config::*;
pub use connection::*;
pub use error::TransportError;
pub use handlers::TransportState;
pub use listener::{HealthState, ListenerHealth, ServeHandle};
pub use poll_queue::{PollQueue, QueueFull};
pub use transport::{HttpPollTransport, WebSocketTransport};
