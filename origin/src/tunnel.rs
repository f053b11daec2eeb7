//! C5, origin half: a persistent WebSocket connection to the relay,
//! multiplexing mobile stream requests over a single socket.
//!
//! Back-pressure is expressed by a bounded `mpsc` channel rather than by
//! inspecting the socket's write-queue occupancy (spec.md §9): once the
//! channel is full, whichever task is pushing chunks simply awaits
//! `send().await`, which is the async equivalent of pausing the read side.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::http::{HeaderName, HeaderValue, Method, Request, Uri};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

use protocol::control::{self, ControlMessage};
use protocol::frame::{encode_chunk, MAX_FRAME_SIZE};

use crate::library::LibraryIndex;
use crate::streamer::{self, StreamError};

/// Bounded depth of the outgoing-message channel; this *is* the
/// back-pressure mechanism, not a tuning knob for throughput.
pub const BACKPRESSURE_DEPTH: usize = 64;

#[derive(Clone)]
pub struct TunnelHandle {
    outgoing: mpsc::Sender<Message>,
    cancelled: Arc<Mutex<HashSet<String>>>,
}

impl TunnelHandle {
    async fn send_control(&self, msg: &ControlMessage) {
        let Ok(json) = msg.to_json() else {
            tracing::error!("failed to serialize control message");
            return;
        };
        if self.outgoing.send(Message::Text(json)).await.is_err() {
            tracing::warn!("tunnel closed while sending control message");
        }
    }

    fn is_cancelled(&self, request_id: &str) -> bool {
        self.cancelled.lock().unwrap().contains(request_id)
    }

    fn clear_cancelled(&self, request_id: &str) {
        self.cancelled.lock().unwrap().remove(request_id);
    }
}

/// Connect to the relay and run the tunnel until the socket closes.
/// Returns a handle usable to send a `register` frame or otherwise poke
/// the connection; the bulk of the work happens in the spawned tasks.
pub async fn connect(
    url: &str,
    device_id: String,
    index: Arc<LibraryIndex>,
    router: axum::Router,
) -> Result<TunnelHandle, tokio_tungstenite::tungstenite::Error> {
    // No per-message compression and a 10 MiB frame cap, matching the
    // relay's `/ws/desktop` upgrade config (spec.md §4.5).
    let config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig {
        max_frame_size: Some(MAX_FRAME_SIZE),
        max_message_size: Some(MAX_FRAME_SIZE),
        ..Default::default()
    };
    let (ws_stream, _response) =
        tokio_tungstenite::connect_async_with_config(url, Some(config), false).await?;
    let (mut write, mut read) = ws_stream.split();

    let (tx, mut rx) = mpsc::channel::<Message>(BACKPRESSURE_DEPTH);

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write.send(msg).await.is_err() {
                tracing::warn!("tunnel write half closed");
                break;
            }
        }
    });

    let handle = TunnelHandle {
        outgoing: tx.clone(),
        cancelled: Arc::new(Mutex::new(HashSet::new())),
    };

    handle
        .send_control(&ControlMessage::Register {
            device_id,
            protocol: Some("1".to_string()),
        })
        .await;

    let read_handle = handle.clone();
    tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match ControlMessage::from_json(&text) {
                    Ok(msg) => dispatch(msg, &read_handle, &index, &router).await,
                    Err(err) => tracing::warn!(error = %err, "malformed control frame"),
                },
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Binary(_)) => {
                    tracing::warn!("unexpected binary frame from relay, ignoring");
                }
                Ok(Message::Frame(_)) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "tunnel read error");
                    break;
                }
            }
        }
    });

    Ok(handle)
}

async fn dispatch(
    msg: ControlMessage,
    handle: &TunnelHandle,
    index: &Arc<LibraryIndex>,
    router: &axum::Router,
) {
    match msg {
        ControlMessage::StreamRequest {
            request_id,
            track_id,
            range,
        } => {
            let handle = handle.clone();
            let index = index.clone();
            tokio::spawn(async move {
                serve_stream_request(handle, index, request_id, track_id, range).await;
            });
        }
        ControlMessage::HttpRequest {
            request_id,
            method,
            path,
            headers,
            body,
        } => {
            let handle = handle.clone();
            let router = router.clone();
            tokio::spawn(async move {
                serve_http_request(router, handle, request_id, method, path, headers, body).await;
            });
        }
        ControlMessage::CancelStream { request_id } => {
            handle.cancelled.lock().unwrap().insert(request_id);
        }
        ControlMessage::Ping => {
            handle.send_control(&ControlMessage::Pong).await;
        }
        ControlMessage::Registered { device_id, .. } => {
            tracing::info!(device_id, "registered with relay");
        }
        other => {
            tracing::debug!(?other, "unhandled control frame");
        }
    }
}

/// Service a non-streaming `http_request` fallback frame by replaying it
/// against this origin's own HTTP router in-process (no socket round
/// trip), then answering with a single `http_response` frame.
async fn serve_http_request(
    router: axum::Router,
    handle: TunnelHandle,
    request_id: String,
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Option<String>,
) {
    let uri: Uri = path.parse().unwrap_or_else(|_| Uri::from_static("/"));
    let method = Method::from_bytes(method.as_bytes()).unwrap_or(Method::GET);

    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in &headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            builder = builder.header(name, value);
        }
    }

    let request = match builder.body(axum::body::Body::from(control::decode_body(&body))) {
        Ok(request) => request,
        Err(err) => {
            handle
                .send_control(&ControlMessage::Error {
                    request_id,
                    status: 400,
                    error: err.to_string(),
                })
                .await;
            return;
        }
    };

    // `Router`'s `Service::Error` is `Infallible`: it always answers with
    // some response, even for routes that don't exist (axum's 404 handler).
    let Ok(response) = router.oneshot(request).await else {
        unreachable!("axum::Router's Service::Error is Infallible")
    };
    let status = response.status().as_u16();
    let mut response_headers = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(v) = value.to_str() {
            response_headers.insert(name.as_str().to_string(), v.to_string());
        }
    }
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_default();

    handle
        .send_control(&ControlMessage::HttpResponse {
            request_id,
            status,
            headers: response_headers,
            body: control::encode_body(&body_bytes),
        })
        .await;
}

async fn serve_stream_request(
    handle: TunnelHandle,
    index: Arc<LibraryIndex>,
    request_id: String,
    track_id: String,
    range: Option<String>,
) {
    let outcome = match streamer::stream(&index, &track_id, range.as_deref(), None, None).await {
        // The `stream_request` control message carries no conditional
        // headers, so `not_modified` never fires here.
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
            tracing::info!(request_id, "stream cancelled, stopping chunk delivery");
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
            tracing::error!(request_id, "non-ASCII request id, dropping tunnel chunk");
            break;
        };
        bytes_sent += chunk.len() as u64;
        if handle.outgoing.send(Message::Binary(frame)).await.is_err() {
            tracing::warn!(request_id, "tunnel closed mid-stream");
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
