//! `GET /health` for a transport listener.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::TransportState;

/// Always 200; the `state` field tells monitors whether the listener is
/// actually accepting clients.
pub async fn health_handler(State(state): State<TransportState>) -> Json<Value> {
    Json(json!({
        "transport": state.name,
        "state": state.health.get().as_str(),
        "connections": state.registry.count(),
    }))
}
