//! Message middleware.
//!
//! - [`chain`]: the `Middleware` trait, `Next`, and the snapshot chain
//! - [`auth`]: bearer-token identity
//! - [`timeout`]: per-request budget
//! - [`metrics`]: dispatch counters and spans

pub mod auth;
pub mod chain;
pub mod metrics;
pub mod timeout;

pub use auth::{AuthError, AuthMiddleware, JwtVerifier, TokenVerifier, VerifiedUser};
pub use chain::{Middleware, MiddlewareChain, Next, Terminal};
pub use metrics::MetricsMiddleware;
pub use timeout::TimeoutMiddleware;
