//! Error types for the Nexon server

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use nexon_core::{ErrorKind, InferenceError, StoreError};
use serde_json::json;
use thiserror::Error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("{0}")]
    Inference(#[from] InferenceError),

    #[error("Model store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::InvalidRequest(rejection.body_text())
    }
}

/// HTTP status for an orchestrator error kind, shared by both front ends
pub fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::FailedPrecondition => StatusCode::CONFLICT,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ServerError {
    /// HTTP status, wire error code and a suggestion for the client
    fn classify(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            ServerError::Inference(err) => {
                let suggestion = match err.kind() {
                    ErrorKind::InvalidArgument => "Check tensor dims, dtype and payload size against the model input",
                    ErrorKind::NotFound => "Check the model name or upload the model first",
                    ErrorKind::FailedPrecondition => "Deploy the model before running inference",
                    ErrorKind::Unavailable => "Retry the request with backoff",
                    ErrorKind::Internal => "Contact support if this error persists",
                };
                (status_for_kind(err.kind()), err.kind().as_str(), suggestion)
            }
            ServerError::Store(err) => match err {
                StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", "Check the model name and version"),
                StoreError::Conflict(_) => (
                    StatusCode::CONFLICT,
                    "FAILED_PRECONDITION",
                    "Undeploy the current version first",
                ),
                StoreError::InvalidRequest(_) => (
                    StatusCode::BAD_REQUEST,
                    "INVALID_ARGUMENT",
                    "Check the request parameters",
                ),
                StoreError::Unavailable(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "UNAVAILABLE",
                    "Retry the request with backoff",
                ),
                StoreError::Io(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "Check file system permissions and disk space",
                ),
            },
            ServerError::InvalidRequest(_) | ServerError::Json(_) => (
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                "Check the request format and required parameters",
            ),
            ServerError::Timeout(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "UNAVAILABLE",
                "Retry the request with backoff",
            ),
            ServerError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "Contact system administrator - server configuration issue",
            ),
            ServerError::Io(_) | ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "Contact support if this error persists",
            ),
        }
    }

    /// Stable code of the underlying error, if it carries one
    fn detail_code(&self) -> Option<&'static str> {
        match self {
            ServerError::Inference(err) => Some(err.code()),
            ServerError::Store(err) => Some(err.code()),
            _ => None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.classify().0
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error_type, suggestion) = self.classify();

        // Internal details are logged, not returned
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed with internal error");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let mut error_response = json!({
            "error": {
                "type": error_type,
                "message": message,
                "code": status.as_u16(),
                "suggestion": suggestion,
                "timestamp": chrono::Utc::now().timestamp(),
                "request_id": generate_request_id()
            }
        });

        if let Some(code) = self.detail_code() {
            error_response["error"]["error_code"] = json!(code);
        }

        (status, Json(error_response)).into_response()
    }
}

/// Generate a request ID for error tracking
pub(crate) fn generate_request_id() -> String {
    format!("req_{:x}", chrono::Utc::now().timestamp_millis())
}
