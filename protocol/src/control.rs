//! JSON control messages exchanged over the tunnel's text frames.
//!
//! Every variant but `Ping`/`Pong` correlates to a particular request by
//! carrying a `request_id` (the relay-assigned UUID); `register`/`registered`
//! instead carry a `device_id`, since they are not per-request.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Base64 codec used for `http_request`/`http_response` bodies -- the only
/// place this protocol needs to carry binary data inside JSON.
pub fn encode_body(bytes: &[u8]) -> Option<String> {
    (!bytes.is_empty()).then(|| base64::engine::general_purpose::STANDARD.encode(bytes))
}

pub fn decode_body(body: &Option<String>) -> Vec<u8> {
    body.as_deref()
        .and_then(|s| base64::engine::general_purpose::STANDARD.decode(s).ok())
        .unwrap_or_default()
}

/// A single entry of the `Range` header as relayed across the tunnel
/// (`"bytes=0-1023"`, passed through verbatim rather than re-parsed twice).
pub type RangeHeader = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ControlMessage {
    /// L -> R: claim a deviceId on the relay.
    #[serde(rename_all = "camelCase")]
    Register {
        device_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol: Option<String>,
    },
    /// R -> L: registration accepted.
    #[serde(rename_all = "camelCase")]
    Registered { device_id: String, timestamp: i64 },
    /// R -> L: ask origin for a track byte-range.
    #[serde(rename_all = "camelCase")]
    StreamRequest {
        request_id: String,
        track_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<RangeHeader>,
    },
    /// L -> R: metadata, MUST precede the first binary chunk.
    #[serde(rename_all = "camelCase")]
    StreamResponse {
        request_id: String,
        status: u16,
        headers: HashMap<String, String>,
        content_length: Option<u64>,
    },
    /// L -> R: origin finished sending chunks.
    #[serde(rename_all = "camelCase")]
    StreamEnd { request_id: String, bytes_sent: u64 },
    /// R -> L: mobile disconnected, abort.
    #[serde(rename_all = "camelCase")]
    CancelStream { request_id: String },
    /// L -> R: origin failed this request.
    #[serde(rename_all = "camelCase")]
    Error {
        request_id: String,
        status: u16,
        error: String,
    },
    /// R <-> L: non-streaming small-payload fallback, request side.
    #[serde(rename_all = "camelCase")]
    HttpRequest {
        request_id: String,
        method: String,
        path: String,
        headers: HashMap<String, String>,
        /// base64-encoded body.
        #[serde(default)]
        body: Option<String>,
    },
    /// R <-> L: non-streaming small-payload fallback, response side.
    #[serde(rename_all = "camelCase")]
    HttpResponse {
        request_id: String,
        status: u16,
        headers: HashMap<String, String>,
        #[serde(default)]
        body: Option<String>,
    },
    /// Either direction: keepalive ping.
    Ping,
    /// Either direction: keepalive pong.
    Pong,
}

impl ControlMessage {
    /// The correlating request id, for variants that carry one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ControlMessage::StreamRequest { request_id, .. }
            | ControlMessage::StreamResponse { request_id, .. }
            | ControlMessage::StreamEnd { request_id, .. }
            | ControlMessage::CancelStream { request_id }
            | ControlMessage::Error { request_id, .. }
            | ControlMessage::HttpRequest { request_id, .. }
            | ControlMessage::HttpResponse { request_id, .. } => Some(request_id),
            ControlMessage::Register { .. }
            | ControlMessage::Registered { .. }
            | ControlMessage::Ping
            | ControlMessage::Pong => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_stream_request() {
        let msg = ControlMessage::StreamRequest {
            request_id: "abc-123".into(),
            track_id: "deadbeefdeadbeef".into(),
            range: Some("bytes=0-1023".into()),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"stream_request\""));
        let back = ControlMessage::from_json(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn ping_pong_have_no_extra_fields() {
        assert_eq!(ControlMessage::Ping.to_json().unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(ControlMessage::Pong.to_json().unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn body_codec_round_trips_and_treats_empty_as_none() {
        assert_eq!(encode_body(b""), None);
        let encoded = encode_body(b"hello").unwrap();
        assert_eq!(decode_body(&Some(encoded)), b"hello".to_vec());
        assert_eq!(decode_body(&None), Vec::<u8>::new());
    }

    #[test]
    fn request_id_extraction() {
        let msg = ControlMessage::StreamEnd {
            request_id: "r1".into(),
            bytes_sent: 100,
        };
        assert_eq!(msg.request_id(), Some("r1"));
        assert_eq!(ControlMessage::Register { device_id: "d".into(), protocol: None }.request_id(), None);
    }
}
