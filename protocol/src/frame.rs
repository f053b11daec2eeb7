//! Binary frame layout for audio chunks sent over the tunnel.
//!
//! `[u32 BE requestIdLen][requestIdLen bytes of ASCII requestId][payload bytes]`

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short to contain a request id length prefix")]
    Truncated,
    #[error("declared request id length {declared} exceeds remaining frame length {remaining}")]
    RequestIdOverrun { declared: usize, remaining: usize },
    #[error("request id is not ASCII")]
    NonAsciiRequestId,
}

/// Encode a chunk frame: length-prefixed ASCII request id, then the payload.
pub fn encode_chunk(request_id: &str, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if !request_id.is_ascii() {
        return Err(FrameError::NonAsciiRequestId);
    }
    let id_bytes = request_id.as_bytes();
    let mut buf = Vec::with_capacity(4 + id_bytes.len() + payload.len());
    buf.extend_from_slice(&(id_bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(id_bytes);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode a chunk frame into `(requestId, payload)`. `payload` borrows from `frame`.
pub fn decode_chunk(frame: &[u8]) -> Result<(&str, &[u8]), FrameError> {
    if frame.len() < 4 {
        return Err(FrameError::Truncated);
    }
    let (len_bytes, rest) = frame.split_at(4);
    let id_len = u32::from_be_bytes(len_bytes.try_into().expect("exactly 4 bytes")) as usize;
    if id_len > rest.len() {
        return Err(FrameError::RequestIdOverrun {
            declared: id_len,
            remaining: rest.len(),
        });
    }
    let (id_bytes, payload) = rest.split_at(id_len);
    let request_id = std::str::from_utf8(id_bytes).map_err(|_| FrameError::NonAsciiRequestId)?;
    if !request_id.is_ascii() {
        return Err(FrameError::NonAsciiRequestId);
    }
    Ok((request_id, payload))
}

/// Maximum frame size accepted on the tunnel (10 MiB, per spec).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;
