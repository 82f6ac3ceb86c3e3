//! Push transport socket session: upgrade, read loop, write loop, cleanup.

use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use switchboard_core::Message;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use super::TransportState;
use crate::network::{ClientId, OutboundMessage};

/// Upgrades to a socket session. Refused with 503 unless the listener is
/// ready.
pub async fn ws_upgrade_handler(
    State(state): State<TransportState>,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.health.is_ready() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let conn = &state.config.connection;
    ws.write_buffer_size(conn.ws_write_buffer_size)
        .max_write_buffer_size(conn.ws_max_write_buffer_size)
        .on_upgrade(move |socket| run_session(socket, state))
}

async fn run_session(socket: WebSocket, state: TransportState) {
    let (handle, outbound_rx) = state.registry.register_socket();
    let client_id = handle.id.clone();
    drop(handle);

    state.record_connect(&client_id);
    read_loop(socket, outbound_rx, &state, &client_id).await;

    // No-op if shutdown already removed and reported this client.
    state.disconnect(&client_id, None);
}

#[instrument(skip_all, fields(client_id = %client_id))]
async fn read_loop(
    socket: WebSocket,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
    state: &TransportState,
    client_id: &ClientId,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            match outbound {
                OutboundMessage::Text(frame) => {
                    if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                OutboundMessage::Close(reason) => {
                    let frame = CloseFrame {
                        code: close_code::AWAY,
                        reason: reason.unwrap_or_default().into(),
                    };
                    let _ = ws_tx.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(frame)) => {
                    if !handle_frame(frame, state, client_id) {
                        break;
                    }
                }
                _ => break,
            },
            _ = &mut writer => {
                // Nothing more goes out; give the peer a bounded window to
                // acknowledge the close.
                let close_timeout = state.config.connection.close_timeout;
                if tokio::time::timeout(close_timeout, await_close(&mut ws_rx)).await.is_err() {
                    debug!(?close_timeout, "peer did not answer close frame");
                }
                return;
            }
        }
    }

    writer.abort();
}

/// Handles one inbound frame. Returns `false` once the peer has closed.
fn handle_frame(frame: WsMessage, state: &TransportState, client_id: &ClientId) -> bool {
    let text = match frame {
        WsMessage::Text(text) => text.to_string(),
        WsMessage::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(text) => text,
            Err(_) => {
                warn!(len = data.len(), "dropping non-UTF8 binary frame");
                return true;
            }
        },
        WsMessage::Close(_) => {
            debug!("client sent close frame");
            return false;
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) => return true,
    };

    match Message::from_json(&text) {
        Ok(message) => {
            metrics::counter!("switchboard_frames_received_total", "transport" => state.name)
                .increment(1);
            state.callbacks.emit_message(message, client_id);
        }
        Err(e) => warn!(error = %e, "dropping malformed frame"),
    }
    true
}

/// Discards frames until the peer's close frame or end of stream.
async fn await_close(ws_rx: &mut SplitStream<WebSocket>) {
    while let Some(Ok(frame)) = ws_rx.next().await {
        if matches!(frame, WsMessage::Close(_)) {
            break;
        }
    }
}
