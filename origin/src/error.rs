//! Origin's error kinds and their HTTP mapping (spec.md §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::crate_writer::CrateWriterError;
use crate::streamer::StreamError;
use protocol::dto::ErrorBody;

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("library root missing: {0}")]
    LibraryRootMissing(String),
    #[error("track not found")]
    TrackNotFound,
    #[error("no artwork available")]
    ArtworkNotFound,
    #[error("crate not found")]
    CrateNotFound,
    #[error("crate already exists")]
    CrateAlreadyExists,
    #[error("range not satisfiable")]
    RangeNotSatisfiable,
    #[error("writer is read-only")]
    ReadOnlyWriter,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StreamError> for OriginError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::NotFound => OriginError::TrackNotFound,
            StreamError::BadRange => OriginError::BadRequest("missing range bounds".into()),
            StreamError::RangeNotSatisfiable => OriginError::RangeNotSatisfiable,
            StreamError::Io(err) => OriginError::Internal(err.to_string()),
        }
    }
}

impl From<CrateWriterError> for OriginError {
    fn from(err: CrateWriterError) -> Self {
        match err {
            CrateWriterError::InvalidName => OriginError::BadRequest(err.to_string()),
            CrateWriterError::ReadOnly => OriginError::ReadOnlyWriter,
            CrateWriterError::NotFound(_) => OriginError::CrateNotFound,
            CrateWriterError::Io(err) => OriginError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for OriginError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            OriginError::LibraryRootMissing(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            OriginError::TrackNotFound => (StatusCode::NOT_FOUND, "Track not found".to_string()),
            OriginError::ArtworkNotFound => {
                (StatusCode::NOT_FOUND, "No artwork available".to_string())
            }
            OriginError::CrateNotFound => (StatusCode::NOT_FOUND, "Crate not found".to_string()),
            OriginError::CrateAlreadyExists => {
                (StatusCode::CONFLICT, "Crate already exists".to_string())
            }
            OriginError::RangeNotSatisfiable => {
                (StatusCode::RANGE_NOT_SATISFIABLE, self.to_string())
            }
            OriginError::ReadOnlyWriter => (StatusCode::NOT_IMPLEMENTED, self.to_string()),
            OriginError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            OriginError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody::new(message))).into_response()
    }
}
