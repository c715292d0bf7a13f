//! Per-request gateway errors
//!
//! Every variant maps to an HTTP status and the JSON error body
//! `{"error":{"type":...,"message":...,"request_id":...}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("upstream timeout after {0}s")]
    UpstreamTimeout(u64),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label for the upstream error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidBody(_) => "invalid_body",
            ProxyError::UpstreamTimeout(_) => "timeout",
            ProxyError::Upstream(_) => "connection",
            ProxyError::Internal(_) => "internal",
        }
    }

    pub fn into_response(self, request_id: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": "gateway_error",
                "message": self.to_string(),
                "request_id": request_id,
            }
        });
        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
