//! Error types for the control API.
//!
//! [`ApiError`] is converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation, with a
//! JSON body of the form `{"error": "...", "status": 400}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors that can occur in the control API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The control request named no command or an unknown one.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The request body could not be read as a control request.
    #[error("invalid request body: {0}")]
    InvalidBody(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InvalidCommand(msg) | Self::InvalidBody(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
