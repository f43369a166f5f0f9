//! Model registry handlers: upload, deploy, undeploy, delete and listing
//!
//! Every operation that can change which bytes a name resolves to retires
//! the cached session for that name.

use crate::{
    error::{ServerError, ServerResult},
    server::ServerState,
};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use nexon_core::{CacheStats, ModelRecord, ModelStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct DeployRequest {
    pub model_name: String,
    pub version: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UndeployRequest {
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub models: Vec<ModelRecord>,
}

fn require_body(name: &str, body: &Bytes) -> ServerResult<()> {
    if body.is_empty() {
        return Err(ServerError::InvalidRequest(format!(
            "model '{}' upload has an empty body",
            name
        )));
    }
    Ok(())
}

/// `POST /upload/{name}` - store a new version without deploying it
pub async fn upload_model(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    body: Bytes,
) -> ServerResult<(StatusCode, Json<ModelRecord>)> {
    require_body(&name, &body)?;
    let record = state.store.upload(&name, body.to_vec())?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `POST /deployment/deploy`
pub async fn deploy_model(
    State(state): State<ServerState>,
    payload: Result<Json<DeployRequest>, JsonRejection>,
) -> ServerResult<Json<ModelRecord>> {
    let Json(request) = payload?;
    let record = state.store.deploy(&request.model_name, request.version)?;
    state.orchestrator.invalidate(&request.model_name);
    Ok(Json(record))
}

/// `POST /deployment/deploy-file/{name}` - upload and deploy in one step
pub async fn deploy_file(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    body: Bytes,
) -> ServerResult<(StatusCode, Json<ModelRecord>)> {
    require_body(&name, &body)?;
    let record = state.store.upload_and_deploy(&name, body.to_vec())?;
    state.orchestrator.invalidate(&name);
    Ok((StatusCode::CREATED, Json(record)))
}

/// `PUT /deployment/undeploy/{name}`
pub async fn undeploy_model(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    payload: Result<Json<UndeployRequest>, JsonRejection>,
) -> ServerResult<Json<ModelRecord>> {
    let Json(request) = payload?;
    let record = state.store.undeploy(&name, request.version)?;
    if state.orchestrator.invalidate(&name) {
        info!(model = %name, "Retired cached session of undeployed model");
    }
    Ok(Json(record))
}

/// `DELETE /models/{name}`
pub async fn delete_model(State(state): State<ServerState>, Path(name): Path<String>) -> ServerResult<Json<Value>> {
    let versions = state.store.delete(&name)?;
    state.orchestrator.invalidate(&name);
    Ok(Json(json!({
        "model_name": name,
        "deleted_versions": versions
    })))
}

/// `GET /models`
pub async fn list_models(State(state): State<ServerState>) -> ServerResult<Json<ModelList>> {
    let models = state.store.list_models().await?;
    Ok(Json(ModelList { models }))
}

/// `GET /cache/stats`
pub async fn cache_stats(State(state): State<ServerState>) -> Json<CacheStats> {
    Json(state.orchestrator.cache_stats())
}
