//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::search::SearchError;

/// Error body shape shared by every non-2xx response:
/// `{"success": false, "error": {"code", "message"}}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "invalid_input", detail.clone())
            }
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "not_found", detail.clone()),
            ApiError::UpstreamUnavailable(detail) => {
                tracing::warn!(detail = %detail, "upstream unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "upstream_unavailable",
                    "An upstream dependency is unavailable, retry shortly".to_string(),
                )
            }
            ApiError::Internal(detail) => {
                let correlation_id = uuid::Uuid::new_v4();
                tracing::error!(%correlation_id, detail = %detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    format!("An internal error occurred (correlation {correlation_id})"),
                )
            }
        };

        let body = ErrorBody {
            success: false,
            error: ErrorDetail { code, message },
        };

        let mut response = (status, Json(body)).into_response();
        if matches!(self, ApiError::UpstreamUnavailable(_)) {
            response
                .headers_mut()
                .insert("Retry-After", axum::http::HeaderValue::from_static("5"));
        }
        response
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        if err.is_upstream() {
            ApiError::UpstreamUnavailable(err.to_string())
        } else {
            match err {
                SearchError::Embedding(e) => ApiError::BadRequest(e.to_string()),
                other => ApiError::Internal(other.to_string()),
            }
        }
    }
}

impl From<crate::vector::VectorStoreError> for ApiError {
    fn from(err: crate::vector::VectorStoreError) -> Self {
        use crate::util::backoff::Transient;
        if err.is_transient() {
            ApiError::UpstreamUnavailable(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}
