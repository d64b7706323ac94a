use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::api::rest::error::{ApiError, ApiResult};
use crate::api::rest::state::AppState;
use crate::sandbox::manager::SandboxInfo;

#[derive(Debug, Serialize)]
pub struct SandboxList {
    pub items: Vec<SandboxInfo>,
    pub total: usize,
}

pub async fn create_sandbox(
    State(state): State<Arc<AppState>>,
) -> ApiResult<(StatusCode, Json<SandboxInfo>)> {
    let info = state.sandboxes.create().await?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn list_sandboxes(State(state): State<Arc<AppState>>) -> ApiResult<Json<SandboxList>> {
    let items = state.sandboxes.list().await;
    let total = items.len();
    Ok(Json(SandboxList { items, total }))
}

pub async fn get_active_sandbox(State(state): State<Arc<AppState>>) -> ApiResult<Json<SandboxInfo>> {
    state
        .sandboxes
        .active_info()
        .await
        .map(Json)
        .ok_or(ApiError::NoSandbox)
}

pub async fn get_sandbox(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<SandboxInfo>> {
    state
        .sandboxes
        .info(&id)
        .await
        .map(Json)
        .ok_or(ApiError::SandboxNotFound(id))
}

pub async fn activate_sandbox(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<SandboxInfo>> {
    Ok(Json(state.sandboxes.activate(&id).await?))
}

pub async fn delete_sandbox(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.sandboxes.terminate(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
