//! API error response mapping

use axum::{
    response::{IntoResponse, Response},
    Json,
};

use crate::error::LogError;

/// API error response body
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,

    /// Machine-readable error code
    pub code: String,

    /// Whether the client may retry the same request
    pub recoverable: bool,
}

impl IntoResponse for LogError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.error_code().to_string(),
            recoverable: self.is_transient(),
        };
        (status, Json(body)).into_response()
    }
}
