//! `/ws/audio`: the origin's own WebSocket endpoint for the "bundled relay"
//! deployment mode (spec.md §6), used when a device talks to this origin
//! directly over a local/trusted network instead of through the cloud
//! relay's `/ws/desktop` tunnel. Same control-message and binary-chunk
//! framing as the relay tunnel (protocol::control, protocol::frame); the
//! only difference is there's no deviceId routing or `register` handshake
//! to speak of, since the socket already identifies a single peer.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use protocol::control::ControlMessage;
use protocol::frame::{encode_chunk, MAX_FRAME_SIZE};

use crate::library::LibraryIndex;
use crate::state::AppState;
use crate::streamer::{self, StreamError};

const OUTGOING_CHANNEL_DEPTH: usize = 64;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/audio", get(upgrade))
        .with_state(state)
}

/// No per-message compression and a 10 MiB frame cap, same as the relay's
/// `/ws/desktop` (spec.md §4.5 governs both tunnel endpoints identically).
async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_frame_size(MAX_FRAME_SIZE)
        .max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state.index))
}

#[derive(Clone)]
struct AudioHandle {
    outgoing: mpsc::Sender<Message>,
    cancelled: Arc<Mutex<HashSet<String>>>,
}

impl AudioHandle {
    async fn send_control(&self, msg: &ControlMessage) {
        let Ok(json) = msg.to_json() else {
            tracing::error!("failed to serialize control message");
            return;
        };
        if self.outgoing.send(Message::Text(json)).await.is_err() {
            tracing::warn!("audio socket closed while sending control message");
        }
    }

    fn is_cancelled(&self, request_id: &str) -> bool {
        self.cancelled.lock().unwrap().contains(request_id)
    }

    fn clear_cancelled(&self, request_id: &str) {
        self.cancelled.lock().unwrap().remove(request_id);
    }
}

async fn handle_socket(socket: WebSocket, index: Arc<LibraryIndex>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTGOING_CHANNEL_DEPTH);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let handle = AudioHandle {
        outgoing: tx,
        cancelled: Arc::new(Mutex::new(HashSet::new())),
    };

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match ControlMessage::from_json(&text) {
                Ok(ControlMessage::StreamRequest {
                    request_id,
                    track_id,
                    range,
                }) => {
                    let handle = handle.clone();
                    let index = index.clone();
                    tokio::spawn(async move {
                        serve_stream_request(handle, index, request_id, track_id, range).await;
                    });
                }
                Ok(ControlMessage::CancelStream { request_id }) => {
                    handle.cancelled.lock().unwrap().insert(request_id);
                }
                Ok(ControlMessage::Ping) => {
                    handle.send_control(&ControlMessage::Pong).await;
                }
                Ok(other) => tracing::debug!(?other, "unhandled control frame on /ws/audio"),
                Err(err) => tracing::warn!(error = %err, "malformed control frame on /ws/audio"),
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {}
            Err(err) => {
                tracing::warn!(error = %err, "audio socket read error");
                break;
            }
        }
    }

    writer.abort();
}

/// Identical in spirit to `tunnel::serve_stream_request`: resolve, stream,
/// and frame the bytes, but addressed straight at this socket rather than
/// at the relay's multiplexed tunnel.
async fn serve_stream_request(
    handle: AudioHandle,
    index: Arc<LibraryIndex>,
    request_id: String,
    track_id: String,
    range: Option<String>,
) {
    let outcome = match streamer::stream(&index, &track_id, range.as_deref(), None, None).await {
        Ok(streamer::StreamResponse::Ok(outcome)) => outcome,
        Ok(streamer::StreamResponse::NotModified { .. }) => unreachable!(),
        Err(err) => {
            let status = match err {
                StreamError::NotFound => 404,
                StreamError::BadRange => 400,
                StreamError::RangeNotSatisfiable => 416,
                StreamError::Io(_) => 500,
            };
            handle
                .send_control(&ControlMessage::Error {
                    request_id,
                    status,
                    error: err.to_string(),
                })
                .await;
            return;
        }
    };

    let mut headers = std::collections::HashMap::new();
    headers.insert("content-type".to_string(), outcome.mime.to_string());
    headers.insert("etag".to_string(), outcome.etag.clone());
    headers.insert("last-modified".to_string(), outcome.last_modified.clone());
    if let Some(range) = &outcome.content_range {
        headers.insert("content-range".to_string(), range.clone());
    }

    handle
        .send_control(&ControlMessage::StreamResponse {
            request_id: request_id.clone(),
            status: outcome.status,
            headers,
            content_length: outcome.content_length,
        })
        .await;

    let mut body = outcome.body.into_data_stream();
    let mut bytes_sent: u64 = 0;

    while let Some(chunk) = body.next().await {
        if handle.is_cancelled(&request_id) {
            tracing::info!(request_id, "audio stream cancelled, stopping chunk delivery");
            handle.clear_cancelled(&request_id);
            return;
        }
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::warn!(request_id, error = %err, "error reading stream body");
                break;
            }
        };
        let Ok(frame) = encode_chunk(&request_id, &chunk) else {
            tracing::error!(request_id, "non-ASCII request id, dropping audio chunk");
            break;
        };
        bytes_sent += chunk.len() as u64;
        if handle.outgoing.send(Message::Binary(frame)).await.is_err() {
            tracing::warn!(request_id, "audio socket closed mid-stream");
            return;
        }
    }

    handle
        .send_control(&ControlMessage::StreamEnd {
            request_id,
            bytes_sent,
        })
        .await;
}
