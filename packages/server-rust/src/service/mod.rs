//! Message routing and server lifecycle.
//!
//! 1. **Handlers** (`registry`): one handler per request type, many per event type
//! 2. **Middleware** (`middleware`): ordered stages around dispatch
//! 3. **Routing** (`router`): classification and error-envelope synthesis
//! 4. **Server** (`server`): transport ownership, lifecycle, shutdown

pub mod clients;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod middleware;
pub mod registry;
pub mod router;
pub mod server;

#[cfg(test)]
pub(crate) mod mock;

pub use clients::ClientRegistry;
pub use config::{ServerConfig, DEFAULT_SHUTDOWN_REASON};
pub use error::RouterError;
pub use lifecycle::{InFlightGuard, LifecycleController, ServerState};
pub use registry::{event_fn, request_fn, EventHandler, HandlerRegistry, RequestHandler};
pub use router::MessageRouter;
pub use server::{Server, ServerStatus, ShutdownOutcome, SHUTDOWN_NOTICE_GRACE};
