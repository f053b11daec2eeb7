//! The relay-side `PendingRequest` correlation record (spec.md §3/§8).
//!
//! Exactly one of `{resolve, reject}` ever fires for a given request, and
//! firing is expressed as a one-shot channel consumed at most once --
//! `Mutex<Option<Sender>>::take()` is the atomic "settle once" operation,
//! the same shape as `Option::take` anywhere else in the corpus, just
//! behind a lock so concurrent settlers can't both win.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

pub const CHUNK_CHANNEL_DEPTH: usize = 32;
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub enum ChunkEvent {
    Data(Bytes),
    End,
    /// The origin side failed or disconnected after headers were already
    /// sent to mobile: the body just ends early, no JSON error appended.
    Aborted,
}

#[derive(Debug)]
pub struct StreamingOutcome {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub content_length: Option<u64>,
    pub chunks: mpsc::Receiver<ChunkEvent>,
}

#[derive(Debug)]
pub enum PendingOutcome {
    Streaming(StreamingOutcome),
    Http {
        status: u16,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    },
    Error { status: u16, message: String },
}

enum RequestState {
    AwaitingMetadata { buffered_chunk: Option<Bytes> },
    Streaming { chunk_tx: mpsc::Sender<ChunkEvent> },
}

pub struct PendingRequest {
    pub device_id: String,
    metadata_tx: Mutex<Option<oneshot::Sender<PendingOutcome>>>,
    state: Mutex<RequestState>,
}

impl PendingRequest {
    fn new(device_id: String) -> (Self, oneshot::Receiver<PendingOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            PendingRequest {
                device_id,
                metadata_tx: Mutex::new(Some(tx)),
                state: Mutex::new(RequestState::AwaitingMetadata {
                    buffered_chunk: None,
                }),
            },
            rx,
        )
    }

    /// Settle with the streaming metadata (first `stream_response` control
    /// frame). Creates the chunk channel and flushes a buffered chunk if
    /// one arrived first. A no-op if already settled.
    fn settle_streaming(
        &self,
        status: u16,
        headers: HashMap<String, String>,
        content_length: Option<u64>,
    ) {
        let Some(tx) = self.metadata_tx.lock().unwrap().take() else {
            return;
        };
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_DEPTH);
        let buffered = {
            let mut state = self.state.lock().unwrap();
            let buffered = match &mut *state {
                RequestState::AwaitingMetadata { buffered_chunk } => buffered_chunk.take(),
                RequestState::Streaming { .. } => None,
            };
            *state = RequestState::Streaming {
                chunk_tx: chunk_tx.clone(),
            };
            buffered
        };
        if let Some(bytes) = buffered {
            let _ = chunk_tx.try_send(ChunkEvent::Data(bytes));
        }
        let _ = tx.send(PendingOutcome::Streaming(StreamingOutcome {
            status,
            headers,
            content_length,
            chunks: chunk_rx,
        }));
    }

    /// Settle with a non-streaming `http_response` (the small-payload
    /// fallback path): no chunk channel involved, just one shot.
    fn settle_http(&self, status: u16, headers: HashMap<String, String>, body: Vec<u8>) {
        if let Some(tx) = self.metadata_tx.lock().unwrap().take() {
            let _ = tx.send(PendingOutcome::Http { status, headers, body });
        }
    }

    /// Settle with an error. If headers were already sent (streaming
    /// state), this can't surface as a JSON body any more -- the chunk
    /// stream is simply ended, per the "no half-responses" invariant.
    fn settle_error(&self, status: u16, message: String) {
        let already_streaming = {
            let state = self.state.lock().unwrap();
            matches!(&*state, RequestState::Streaming { .. })
        };
        if already_streaming {
            self.push_chunk_event(ChunkEvent::Aborted);
            return;
        }
        if let Some(tx) = self.metadata_tx.lock().unwrap().take() {
            let _ = tx.send(PendingOutcome::Error { status, message });
        }
    }

    /// Route a binary chunk: buffered if metadata hasn't arrived yet,
    /// forwarded through the chunk channel otherwise.
    async fn push_chunk(&self, bytes: Bytes) {
        let chunk_tx = {
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                RequestState::AwaitingMetadata { buffered_chunk } => {
                    *buffered_chunk = Some(bytes);
                    None
                }
                RequestState::Streaming { chunk_tx } => Some(chunk_tx.clone()),
            }
        };
        if let Some(chunk_tx) = chunk_tx {
            let _ = chunk_tx.send(ChunkEvent::Data(bytes)).await;
        }
    }

    fn push_chunk_event(&self, event: ChunkEvent) {
        let chunk_tx = {
            let state = self.state.lock().unwrap();
            match &*state {
                RequestState::Streaming { chunk_tx } => Some(chunk_tx.clone()),
                RequestState::AwaitingMetadata { .. } => None,
            }
        };
        if let Some(chunk_tx) = chunk_tx {
            let _ = chunk_tx.try_send(event);
        }
    }

    fn end(&self) {
        self.push_chunk_event(ChunkEvent::End);
    }
}

/// All in-flight requests, keyed by request id.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<String, std::sync::Arc<PendingRequest>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &self,
        request_id: String,
        device_id: String,
    ) -> oneshot::Receiver<PendingOutcome> {
        let (pending, rx) = PendingRequest::new(device_id);
        self.inner
            .lock()
            .unwrap()
            .insert(request_id, std::sync::Arc::new(pending));
        rx
    }

    fn get(&self, request_id: &str) -> Option<std::sync::Arc<PendingRequest>> {
        self.inner.lock().unwrap().get(request_id).cloned()
    }

    pub fn on_stream_response(
        &self,
        request_id: &str,
        status: u16,
        headers: HashMap<String, String>,
        content_length: Option<u64>,
    ) {
        if let Some(pending) = self.get(request_id) {
            pending.settle_streaming(status, headers, content_length);
        }
    }

    pub async fn on_chunk(&self, request_id: &str, payload: Bytes) {
        if let Some(pending) = self.get(request_id) {
            pending.push_chunk(payload).await;
        }
    }

    /// Settle a non-streaming `http_response` fallback frame and remove
    /// the entry -- there's no further traffic expected for this id.
    pub fn on_http_response(
        &self,
        request_id: &str,
        status: u16,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    ) {
        if let Some(pending) = self.inner.lock().unwrap().remove(request_id) {
            pending.settle_http(status, headers, body);
        }
    }

    pub fn on_stream_end(&self, request_id: &str) {
        if let Some(pending) = self.inner.lock().unwrap().remove(request_id) {
            pending.end();
        }
    }

    pub fn on_error(&self, request_id: &str, status: u16, message: String) {
        if let Some(pending) = self.inner.lock().unwrap().remove(request_id) {
            pending.settle_error(status, message);
        }
    }

    /// A device disconnected or was evicted: reject every request it
    /// still owns so no mobile client hangs on a dead connection.
    pub fn fail_all_for_device(&self, device_id: &str, status: u16, message: &str) {
        let dead: Vec<String> = {
            let map = self.inner.lock().unwrap();
            map.iter()
                .filter(|(_, p)| p.device_id == device_id)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in dead {
            self.on_error(&id, status, message.to_string());
        }
    }

    /// Called when a mobile client disconnects or the timeout elapses
    /// without a response; removes the entry exactly once and returns
    /// whether this caller won the race (so the caller knows whether to
    /// send `cancel_stream` to the device).
    pub fn cancel(&self, request_id: &str) -> bool {
        self.inner.lock().unwrap().remove(request_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metadata_then_chunks_in_order() {
        let pending = PendingRequests::new();
        let id = "r1".to_string();
        let mut rx = pending.create(id.clone(), "dev1".to_string());

        pending.on_stream_response(&id, 200, HashMap::new(), Some(3));
        pending.on_chunk(&id, Bytes::from_static(b"a")).await;
        pending.on_chunk(&id, Bytes::from_static(b"b")).await;
        pending.on_stream_end(&id);

        let outcome = rx.try_recv().unwrap();
        let PendingOutcome::Streaming(mut streaming) = outcome else {
            panic!("expected streaming outcome");
        };
        assert_eq!(streaming.status, 200);
        assert!(matches!(
            streaming.chunks.recv().await,
            Some(ChunkEvent::Data(b)) if b == Bytes::from_static(b"a")
        ));
        assert!(matches!(
            streaming.chunks.recv().await,
            Some(ChunkEvent::Data(b)) if b == Bytes::from_static(b"b")
        ));
        assert!(matches!(streaming.chunks.recv().await, Some(ChunkEvent::End)));
    }

    #[tokio::test]
    async fn chunk_before_metadata_is_buffered_and_flushed() {
        let pending = PendingRequests::new();
        let id = "r1".to_string();
        let mut rx = pending.create(id.clone(), "dev1".to_string());

        pending.on_chunk(&id, Bytes::from_static(b"early")).await;
        pending.on_stream_response(&id, 200, HashMap::new(), None);

        let outcome = rx.try_recv().unwrap();
        let PendingOutcome::Streaming(mut streaming) = outcome else {
            panic!("expected streaming outcome");
        };
        assert!(matches!(
            streaming.chunks.recv().await,
            Some(ChunkEvent::Data(b)) if b == Bytes::from_static(b"early")
        ));
    }

    #[tokio::test]
    async fn error_before_metadata_rejects_cleanly() {
        let pending = PendingRequests::new();
        let id = "r1".to_string();
        let mut rx = pending.create(id.clone(), "dev1".to_string());

        pending.on_error(&id, 404, "Track not found".to_string());

        let outcome = rx.try_recv().unwrap();
        assert!(matches!(
            outcome,
            PendingOutcome::Error { status: 404, .. }
        ));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn error_after_streaming_ends_body_without_json() {
        let pending = PendingRequests::new();
        let id = "r1".to_string();
        let mut rx = pending.create(id.clone(), "dev1".to_string());
        pending.on_stream_response(&id, 200, HashMap::new(), None);
        let outcome = rx.try_recv().unwrap();
        let PendingOutcome::Streaming(mut streaming) = outcome else {
            panic!("expected streaming outcome");
        };

        pending.on_error(&id, 500, "origin crashed".to_string());
        assert!(matches!(streaming.chunks.recv().await, Some(ChunkEvent::Aborted)));
    }

    #[tokio::test]
    async fn http_response_settles_without_a_chunk_channel() {
        let pending = PendingRequests::new();
        let id = "r1".to_string();
        let mut rx = pending.create(id.clone(), "dev1".to_string());

        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        pending.on_http_response(&id, 200, headers, b"{\"ok\":true}".to_vec());

        let outcome = rx.try_recv().unwrap();
        let PendingOutcome::Http { status, body, .. } = outcome else {
            panic!("expected http outcome");
        };
        assert_eq!(status, 200);
        assert_eq!(body, b"{\"ok\":true}".to_vec());
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn fail_all_for_device_rejects_only_its_requests() {
        let pending = PendingRequests::new();
        let a = "r-a".to_string();
        let b = "r-b".to_string();
        let mut rx_a = pending.create(a, "dev1".to_string());
        let mut rx_b = pending.create(b, "dev2".to_string());

        pending.fail_all_for_device("dev1", 503, "Desktop not connected");

        assert!(matches!(
            rx_a.try_recv().unwrap(),
            PendingOutcome::Error { status: 503, .. }
        ));
        assert!(rx_b.try_recv().is_err());
        assert_eq!(pending.len(), 1);
    }
}
