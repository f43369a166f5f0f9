//! Health check handlers

use crate::server::ServerState;
use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

/// Basic health check
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "nexon-server",
        "version": crate::VERSION,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Liveness check - the process is up and serving HTTP
pub async fn liveness_check(State(state): State<ServerState>) -> Json<Value> {
    Json(json!({
        "status": "alive",
        "service": "nexon-server",
        "version": crate::VERSION,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.started_at.elapsed().as_secs()
    }))
}

/// Readiness check - the model store is reachable and the cache accepts
/// work. Nothing needs to be cached for the server to be ready.
pub async fn readiness_check(State(state): State<ServerState>) -> (StatusCode, Json<Value>) {
    let ready = state.orchestrator.is_ready().await;
    let stats = state.orchestrator.cache_stats();

    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "service": "nexon-server",
            "version": crate::VERSION,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "checks": {
                "model_store": if ready { "ok" } else { "unreachable" },
                "cached_sessions": stats.size,
                "cache_capacity": stats.capacity
            }
        })),
    )
}
