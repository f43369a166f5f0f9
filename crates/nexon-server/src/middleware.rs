//! Middleware components for the server

use crate::{config::RequestLimits, error::ServerError};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Request timeout middleware
pub async fn timeout_middleware(
    State(limits): State<Arc<RequestLimits>>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let timeout_duration = Duration::from_secs(limits.request_timeout);

    match tokio::time::timeout(timeout_duration, next.run(request)).await {
        Ok(response) => Ok(response),
        Err(_) => {
            warn!(timeout_secs = limits.request_timeout, "Request timed out");
            Err(ServerError::Timeout(limits.request_timeout))
        }
    }
}

/// Rejects requests whose declared content length exceeds the limit before
/// the body is read
pub async fn request_size_middleware(
    State(limits): State<Arc<RequestLimits>>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let declared = request
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());

    if let Some(length) = declared {
        if length > limits.max_body_size {
            return Err(ServerError::InvalidRequest(format!(
                "Request body too large: {} bytes (max: {})",
                length, limits.max_body_size
            )));
        }
    }

    Ok(next.run(request).await)
}

/// Logging middleware
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    debug!(method = %method, uri = %uri, "Request started");

    let response = next.run(request).await;
    let elapsed = start.elapsed();

    info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        elapsed_ms = %elapsed.as_millis(),
        "Request completed"
    );

    response
}
