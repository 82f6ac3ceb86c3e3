//! Tower layers wrapped around every listener's routes.

use axum::http::header::HeaderName;
use axum::http::{Method, StatusCode};
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;

const REQUEST_ID_HEADER: &str = "x-request-id";

type Tagged = Stack<SetRequestIdLayer<MakeRequestUuid>, Identity>;
type Traced = Stack<TraceLayer<SharedClassifier<ServerErrorsAsFailures>>, Tagged>;
type Bounded = Stack<TimeoutLayer, Stack<CorsLayer, Traced>>;

/// Layer stack returned by [`build_http_layers`].
pub type TransportLayers = Stack<PropagateRequestIdLayer, Bounded>;

/// Wraps transport routes so that each request is tagged with a request id
/// before its trace span opens, CORS is answered from
/// `config.cors_origins`, and a request running past `config.request_timeout`
/// gets 408. The id is copied onto the response last.
///
/// For `/ws` only the upgrade handshake is bounded.
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> TransportLayers {
    let header = HeaderName::from_static(REQUEST_ID_HEADER);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(header.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(cors_for(&config.cors_origins))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(header))
        .into_inner()
}

/// A `"*"` entry opens CORS to every origin. Entries that are not valid
/// header values are skipped.
fn cors_for(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|origin| origin.parse().ok()))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}
