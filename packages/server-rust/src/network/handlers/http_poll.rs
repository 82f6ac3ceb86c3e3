//! Poll transport endpoints.
//!
//! Clients connect to obtain an id, submit envelopes with `/message`, and
//! fetch replies and broadcasts from their queue with `/poll`.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use switchboard_core::Message;
use tracing::debug;

use super::TransportState;
use crate::network::ClientId;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(default)]
    pub client_id: Option<ClientId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub client_id: ClientId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectRequest {
    pub client_id: ClientId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub client_id: ClientId,
    pub message: Message,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRequest {
    pub client_id: ClientId,
    #[serde(default)]
    pub max: Option<usize>,
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollResponse {
    pub messages: Vec<Message>,
}

fn client_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Client not found" })),
    )
        .into_response()
}

/// `POST /connect`. The body is optional; an explicit `clientId` that is
/// already connected is returned unchanged without a second connect event.
pub async fn connect_handler(State(state): State<TransportState>, body: Bytes) -> Response {
    if !state.health.is_ready() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ConnectRequest::default()
    } else {
        match serde_json::from_slice::<ConnectRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": e.to_string() })),
                )
                    .into_response()
            }
        }
    };

    let (handle, created) = state
        .registry
        .register_queue(request.client_id, &state.config.poll);
    if created {
        state.record_connect(&handle.id);
    } else {
        debug!(client_id = %handle.id, "poll client reconnected");
    }

    Json(ConnectResponse {
        client_id: handle.id.clone(),
    })
    .into_response()
}

/// `POST /disconnect`. Unknown ids are a no-op.
pub async fn disconnect_handler(
    State(state): State<TransportState>,
    Json(request): Json<DisconnectRequest>,
) -> StatusCode {
    state.disconnect(&request.client_id, None);
    StatusCode::OK
}

/// `POST /message`. Accepted envelopes are dispatched asynchronously; any
/// reply arrives through `/poll`.
pub async fn message_handler(
    State(state): State<TransportState>,
    Json(request): Json<MessageRequest>,
) -> Response {
    if !state.registry.contains(&request.client_id) {
        return client_not_found();
    }
    metrics::counter!("switchboard_frames_received_total", "transport" => state.name).increment(1);
    state.callbacks.emit_message(request.message, &request.client_id);
    StatusCode::ACCEPTED.into_response()
}

/// `POST /poll`. Drains up to `max` queued messages, waiting up to `waitMs`
/// for the first one. Both are capped by the poll configuration.
pub async fn poll_handler(
    State(state): State<TransportState>,
    Json(request): Json<PollRequest>,
) -> Response {
    let Some(queue) = state
        .registry
        .get(&request.client_id)
        .and_then(|handle| handle.poll_queue().cloned())
    else {
        return client_not_found();
    };

    let poll = &state.config.poll;
    let max = request.max.unwrap_or(poll.max_batch).clamp(1, poll.max_batch.max(1));
    let wait = Duration::from_millis(request.wait_ms.unwrap_or(0)).min(poll.max_wait);

    let messages = queue.wait_drain(max, wait).await;
    Json(PollResponse { messages }).into_response()
}
