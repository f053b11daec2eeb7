//! Relay's error kinds and their HTTP mapping (spec.md §7, relay side).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use protocol::dto::ErrorBody;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("device not connected")]
    DeviceNotConnected,
    #[error("request timed out waiting for the desktop")]
    RequestTimeout,
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            RelayError::DeviceNotConnected => {
                (StatusCode::SERVICE_UNAVAILABLE, "Desktop not connected".to_string())
            }
            RelayError::RequestTimeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            RelayError::Internal(msg) => {
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
