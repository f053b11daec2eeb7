//! `/ws/desktop`: the relay's end of the persistent tunnel each origin
//! opens (spec.md §4.5). One accepted socket per origin; device
//! registration, eviction, and control/binary frame demultiplexing all
//! happen in the task spawned for that socket.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use protocol::control::ControlMessage;
use protocol::frame::{decode_chunk, MAX_FRAME_SIZE};

use crate::state::{AppState, DeviceSession};

/// Depth of the per-device outgoing-frame channel; bounded so a device that
/// stops reading its socket applies back-pressure to whoever is pushing
/// control/chunk frames at it rather than growing without limit.
const OUTGOING_CHANNEL_DEPTH: usize = 64;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/desktop", get(upgrade))
        .with_state(state)
}

/// No per-message compression and a 10 MiB frame cap, per spec.md §4.5.
async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_frame_size(MAX_FRAME_SIZE)
        .max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTGOING_CHANNEL_DEPTH);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut device_id: Option<String> = None;

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match ControlMessage::from_json(&text) {
                Ok(ControlMessage::Register { device_id: id, protocol }) => {
                    device_id = Some(id.clone());
                    register_device(&state, id, protocol, tx.clone()).await;
                }
                Ok(ControlMessage::Ping) => {
                    if let Ok(json) = ControlMessage::Pong.to_json() {
                        let _ = tx.send(Message::Text(json)).await;
                    }
                }
                Ok(other) => dispatch_control(&state, other),
                Err(err) => tracing::warn!(error = %err, "malformed control frame from origin"),
            },
            Ok(Message::Binary(bytes)) => match decode_chunk(&bytes) {
                Ok((request_id, payload)) => {
                    state
                        .pending
                        .on_chunk(request_id, Bytes::copy_from_slice(payload))
                        .await;
                }
                Err(err) => tracing::warn!(error = %err, "malformed binary frame from origin"),
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                tracing::warn!(error = %err, "tunnel read error");
                break;
            }
        }
    }

    if let Some(id) = &device_id {
        state.devices.remove_if_current(id, &tx);
        state
            .pending
            .fail_all_for_device(id, 503, "Device disconnected");
    }
    writer.abort();
}

async fn register_device(
    state: &AppState,
    device_id: String,
    protocol: Option<String>,
    outgoing: mpsc::Sender<Message>,
) {
    let session = DeviceSession {
        device_id: device_id.clone(),
        outgoing: outgoing.clone(),
        protocol,
        connected_at: Utc::now(),
        connected_since: std::time::Instant::now(),
    };

    if let Some(evicted) = state.devices.register(session) {
        tracing::info!(device_id = %device_id, "evicting previous session on re-register");
        state
            .pending
            .fail_all_for_device(&evicted.device_id, 503, "Device disconnected");
        drop(evicted);
    }

    let registered = ControlMessage::Registered {
        device_id: device_id.clone(),
        timestamp: Utc::now().timestamp(),
    };
    if let Ok(json) = registered.to_json() {
        let _ = outgoing.send(Message::Text(json)).await;
    }
    tracing::info!(device_id = %device_id, "registered");
}

fn dispatch_control(state: &AppState, msg: ControlMessage) {
    match msg {
        ControlMessage::StreamResponse {
            request_id,
            status,
            headers,
            content_length,
        } => {
            state
                .pending
                .on_stream_response(&request_id, status, headers, content_length);
        }
        ControlMessage::StreamEnd { request_id, .. } => {
            state.pending.on_stream_end(&request_id);
        }
        ControlMessage::Error {
            request_id,
            status,
            error,
        } => {
            state.pending.on_error(&request_id, status, error);
        }
        ControlMessage::HttpResponse {
            request_id,
            status,
            headers,
            body,
        } => {
            let body = protocol::control::decode_body(&body);
            state.pending.on_http_response(&request_id, status, headers, body);
        }
        other => {
            tracing::debug!(?other, "unhandled control frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn dispatch_stream_response_settles_pending() {
        let state = AppState::new();
        let id = "r1".to_string();
        let mut rx = state.pending.create(id.clone(), "dev1".to_string());

        dispatch_control(
            &state,
            ControlMessage::StreamResponse {
                request_id: id.clone(),
                status: 200,
                headers: HashMap::new(),
                content_length: Some(10),
            },
        );

        let outcome = rx.try_recv().unwrap();
        assert!(matches!(
            outcome,
            crate::pending::PendingOutcome::Streaming(_)
        ));
    }

    #[tokio::test]
    async fn dispatch_error_rejects_pending() {
        let state = AppState::new();
        let id = "r1".to_string();
        let mut rx = state.pending.create(id.clone(), "dev1".to_string());

        dispatch_control(
            &state,
            ControlMessage::Error {
                request_id: id,
                status: 404,
                error: "Track not found".to_string(),
            },
        );

        let outcome = rx.try_recv().unwrap();
        assert!(matches!(
            outcome,
            crate::pending::PendingOutcome::Error { status: 404, .. }
        ));
    }
}
