//! # Gateway error type
//!
//! Token failures of every kind collapse to one `unauthenticated` response;
//! the detail only reaches the debug log.

use axum::http::StatusCode;
use axum::Json;
use pixur_types::ErrorResponse;

/// Gateway error type.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing, malformed, forged, expired or misused token. The detail is
    /// never sent to the client.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Syntactically bad identifier or request
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// No such file
    #[error("not found: {0}")]
    NotFound(String),
    /// Store or filesystem failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            GatewayError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            GatewayError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            GatewayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.parts();
        let message = match &self {
            GatewayError::Unauthenticated(_) => "unauthenticated".to_string(),
            GatewayError::Internal(detail) => {
                tracing::error!(%detail, "request failed");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorResponse {
            code: code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
