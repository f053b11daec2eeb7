//! The relay's mobile-facing HTTP surface (spec.md §6, relay table):
//! `/health`, `/api/device/:deviceId/status`, and the `/api/:deviceId/*`
//! catch-all that turns a mobile HTTP request into a `stream_request`
//! control frame on that device's tunnel.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::Message;
use axum::extract::{OriginalUri, Path, State};
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use protocol::control::{self, ControlMessage};

use crate::error::RelayError;
use crate::pending::{ChunkEvent, PendingOutcome, PendingRequests, StreamingOutcome, REQUEST_TIMEOUT_SECS};
use crate::state::AppState;

/// Response headers the relay owns and never passes through verbatim from
/// the origin (spec.md §6: "forwards origin headers verbatim except
/// connection, transfer-encoding, date").
const SUPPRESSED_HEADERS: &[&str] = &["connection", "transfer-encoding", "date"];

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/device/:device_id/status", get(device_status))
        .route("/api/:device_id/*rest", any(catch_all))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "connectedDevices": state.devices.connected_count(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceStatusDto {
    connected: bool,
    protocol: Option<String>,
    connected_at: Option<String>,
}

async fn device_status(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    let status = state.devices.status(&device_id);
    Json(DeviceStatusDto {
        connected: status.connected,
        protocol: status.protocol,
        connected_at: status.connected_at.map(|t| t.to_rfc3339()),
    })
}

/// Turn `/api/:deviceId/*rest` into either a `stream_request` (audio
/// bytes) or an `http_request` fallback (everything else -- library,
/// crates, search, health) to that device.
///
/// Only the `stream/...` branch uses the last path segment as a track id,
/// flattening deeper hierarchies; that is a known, deliberately-kept
/// limitation of the streaming route specifically (see DESIGN.md's Open
/// Question decisions), not of the catch-all as a whole.
async fn catch_all(
    State(state): State<AppState>,
    Path((device_id, rest)): Path<(String, String)>,
    method: Method,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    let is_stream = rest.split('/').next() == Some("stream");

    let Some(outgoing) = state.devices.outgoing(&device_id) else {
        return Err(RelayError::DeviceNotConnected);
    };

    let request_id = Uuid::new_v4().to_string();
    let rx = state.pending.create(request_id.clone(), device_id.clone());

    let request_msg = if is_stream {
        let track_id = rest
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(&rest)
            .to_string();
        let range = headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        ControlMessage::StreamRequest {
            request_id: request_id.clone(),
            track_id,
            range,
        }
    } else {
        let origin_path = match uri.query() {
            Some(q) => format!("/api/{rest}?{q}"),
            None => format!("/api/{rest}"),
        };
        let mut forwarded_headers = HashMap::new();
        if let Some(ct) = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            forwarded_headers.insert("content-type".to_string(), ct.to_string());
        }
        ControlMessage::HttpRequest {
            request_id: request_id.clone(),
            method: method.as_str().to_string(),
            path: origin_path,
            headers: forwarded_headers,
            body: control::encode_body(&body),
        }
    };

    let json = request_msg
        .to_json()
        .map_err(|err| RelayError::Internal(err.to_string()))?;
    if outgoing.send(Message::Text(json)).await.is_err() {
        state.pending.cancel(&request_id);
        return Err(RelayError::DeviceNotConnected);
    }

    match tokio::time::timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS), rx).await {
        Ok(Ok(PendingOutcome::Streaming(streaming))) => {
            Ok(streaming_response(streaming, request_id, state.pending.clone(), outgoing))
        }
        Ok(Ok(PendingOutcome::Http { status, headers, body })) => {
            Ok(http_fallback_response(status, headers, body))
        }
        Ok(Ok(PendingOutcome::Error { status, message })) => Ok(error_response(status, &message)),
        Ok(Err(_)) => Err(RelayError::Internal(
            "origin dropped the request before responding".to_string(),
        )),
        Err(_) => {
            state.pending.cancel(&request_id);
            send_cancel(outgoing, request_id);
            Err(RelayError::RequestTimeout)
        }
    }
}

/// Render a settled `http_request`/`http_response` fallback as a plain,
/// fully-buffered mobile response -- no streaming involved.
fn http_fallback_response(status: u16, headers: HashMap<String, String>, body: Vec<u8>) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in &headers {
        if SUPPRESSED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        if let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) {
            builder = builder.header(header_name, value);
        }
    }
    builder.body(Body::from(body)).expect("valid http-fallback response")
}

fn error_response(status: u16, message: &str) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(protocol::dto::ErrorBody::new(message))).into_response()
}

fn send_cancel(outgoing: mpsc::Sender<Message>, request_id: String) {
    tokio::spawn(async move {
        if let Ok(json) = (ControlMessage::CancelStream { request_id }).to_json() {
            let _ = outgoing.send(Message::Text(json)).await;
        }
    });
}

fn streaming_response(
    streaming: StreamingOutcome,
    request_id: String,
    pending: std::sync::Arc<PendingRequests>,
    outgoing: mpsc::Sender<Message>,
) -> Response {
    let status = StatusCode::from_u16(streaming.status).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);
    for (name, value) in &streaming.headers {
        if SUPPRESSED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        if let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) {
            builder = builder.header(header_name, value);
        }
    }
    if let Some(len) = streaming.content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }

    let body_stream = ForwardingStream::new(streaming.chunks, request_id, pending, outgoing);
    builder
        .body(Body::from_stream(body_stream))
        .expect("valid streamed response")
}

/// Pipes a `PendingRequest`'s chunk channel into the mobile response body.
/// On early drop (mobile disconnect, per spec.md §5's cancellation rules)
/// it removes the pending-request entry and tells the origin to stop via
/// `cancel_stream`, rather than waiting for an `End`/`Aborted` event that
/// will now never arrive.
///
/// A per-chunk inactivity deadline guards the case spec.md §4.5/§5 also
/// names: metadata arrived (so the mobile response already has headers)
/// but the origin then goes quiet without `stream_end` or closing the
/// socket. The deadline resets on every chunk and fires the same
/// `TimedOut` handling `catch_all`'s initial `rx` timeout uses -- cancel
/// the pending entry, tell the origin to stop, end the body silently
/// (headers are already sent, so no JSON error can follow).
struct ForwardingStream {
    inner: mpsc::Receiver<ChunkEvent>,
    request_id: String,
    pending: std::sync::Arc<PendingRequests>,
    outgoing: mpsc::Sender<Message>,
    ended: bool,
    deadline: Pin<Box<tokio::time::Sleep>>,
}

impl ForwardingStream {
    fn new(
        inner: mpsc::Receiver<ChunkEvent>,
        request_id: String,
        pending: std::sync::Arc<PendingRequests>,
        outgoing: mpsc::Sender<Message>,
    ) -> Self {
        ForwardingStream {
            inner,
            request_id,
            pending,
            outgoing,
            ended: false,
            deadline: Box::pin(tokio::time::sleep(Duration::from_secs(REQUEST_TIMEOUT_SECS))),
        }
    }

    fn timed_out(&mut self) {
        self.ended = true;
        if self.pending.cancel(&self.request_id) {
            tracing::warn!(request_id = %self.request_id, "stream inactivity timeout, ending mobile response");
            send_cancel(self.outgoing.clone(), self.request_id.clone());
        }
    }
}

impl Stream for ForwardingStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.ended {
            return Poll::Ready(None);
        }
        match self.inner.poll_recv(cx) {
            Poll::Ready(Some(ChunkEvent::Data(bytes))) => {
                self.deadline
                    .as_mut()
                    .reset(tokio::time::Instant::now() + Duration::from_secs(REQUEST_TIMEOUT_SECS));
                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(Some(ChunkEvent::End)) | Poll::Ready(Some(ChunkEvent::Aborted)) | Poll::Ready(None) => {
                self.ended = true;
                Poll::Ready(None)
            }
            Poll::Pending => {
                if self.deadline.as_mut().poll(cx).is_ready() {
                    self.timed_out();
                    return Poll::Ready(None);
                }
                Poll::Pending
            }
        }
    }
}

impl Drop for ForwardingStream {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if self.pending.cancel(&self.request_id) {
            send_cancel(self.outgoing.clone(), self.request_id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn health_reports_connected_device_count() {
        let state = AppState::new();
        let response = health(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn catch_all_returns_503_when_device_offline() {
        let state = AppState::new();
        let result = catch_all(
            State(state),
            Path(("dev1".to_string(), "stream/track123".to_string())),
            Method::GET,
            OriginalUri(axum::http::Uri::from_static("/api/dev1/stream/track123")),
            HeaderMap::new(),
            Bytes::new(),
        )
        .await;
        assert!(matches!(result, Err(RelayError::DeviceNotConnected)));
    }

    #[test]
    fn track_id_is_the_last_path_segment() {
        let rest = "stream/deep/hierarchy/trackid".to_string();
        let track_id = rest.rsplit('/').next().unwrap_or(&rest).to_string();
        assert_eq!(track_id, "trackid");
    }

    #[tokio::test]
    async fn forwarding_stream_yields_data_then_ends() {
        let (tx, rx) = mpsc::channel(4);
        let state = AppState::new();
        let stream = ForwardingStream::new(
            rx,
            "r1".to_string(),
            state.pending.clone(),
            state.devices.outgoing("nobody").unwrap_or_else(|| {
                let (tx, _rx) = mpsc::channel(1);
                tx
            }),
        );
        tx.send(ChunkEvent::Data(Bytes::from_static(b"abc")))
            .await
            .unwrap();
        tx.send(ChunkEvent::End).await.unwrap();
        drop(tx);

        let mut collected = Vec::new();
        tokio::pin!(stream);
        while let Some(item) = futures::StreamExt::next(&mut stream).await {
            collected.push(item.unwrap());
        }
        assert_eq!(collected, vec![Bytes::from_static(b"abc")]);
    }

    #[tokio::test(start_paused = true)]
    async fn forwarding_stream_times_out_on_silent_origin() {
        let (tx, rx) = mpsc::channel(4);
        let state = AppState::new();
        let request_id = "r-silent".to_string();
        let rx_done = state.pending.create(request_id.clone(), "dev1".to_string());
        let stream = ForwardingStream::new(
            rx,
            request_id,
            state.pending.clone(),
            state.devices.outgoing("nobody").unwrap_or_else(|| {
                let (tx, _rx) = mpsc::channel(1);
                tx
            }),
        );
        tx.send(ChunkEvent::Data(Bytes::from_static(b"abc")))
            .await
            .unwrap();
        // origin goes silent: no further chunks, no `stream_end`, socket stays open.

        let mut collected = Vec::new();
        tokio::pin!(stream);
        tokio::time::timeout(Duration::from_secs(60), async {
            while let Some(item) = futures::StreamExt::next(&mut stream).await {
                collected.push(item.unwrap());
            }
        })
        .await
        .expect("stream must end once the inactivity deadline fires, not hang forever");

        assert_eq!(collected, vec![Bytes::from_static(b"abc")]);
        assert!(
            rx_done.await.is_err(),
            "timed_out() must cancel the pending entry, dropping its metadata sender"
        );
    }

    #[test]
    fn stream_response_carries_headers_minus_suppressed_ones() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "audio/mpeg".to_string());
        headers.insert("connection".to_string(), "keep-alive".to_string());
        assert!(!SUPPRESSED_HEADERS.contains(&"content-type"));
        assert!(SUPPRESSED_HEADERS.contains(&"connection"));
    }
}
