use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::rest::error::{ApiError, ApiResult};
use crate::api::rest::state::AppState;
use crate::apply::parser::FileCandidate;
use crate::apply::{parse_response, ApplyResult};
use crate::packages::normalize_packages;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    pub response: String,
    #[serde(default)]
    pub is_edit: bool,
    #[serde(default)]
    pub packages: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResponse {
    pub success: bool,
    pub results: ApplyResult,
    pub explanation: String,
    pub structure: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResults {
    pub files_created: Vec<String>,
    pub packages_installed: Vec<String>,
    pub commands_executed: Vec<String>,
    pub errors: Vec<String>,
}

/// Returned when no sandbox is active: what would have been applied.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub success: bool,
    pub results: PreviewResults,
    pub explanation: String,
    pub structure: Option<String>,
    pub parsed_files: Vec<FileCandidate>,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ApplyOutcome {
    Applied(ApplyResponse),
    Preview(PreviewResponse),
}

pub async fn apply_ai_code(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ApplyRequest>, JsonRejection>,
) -> ApiResult<Json<ApplyOutcome>> {
    let Json(req) = payload?;
    if req.response.is_empty() {
        return Err(ApiError::field("response", "AI response content is required"));
    }

    let parsed = parse_response(&req.response)?;

    let Some(sandbox) = state.sandboxes.active().await else {
        info!(files = parsed.files.len(), "No active sandbox found, returning parsed files only");
        let requested: Vec<&str> = req
            .packages
            .iter()
            .chain(parsed.packages.iter())
            .map(String::as_str)
            .collect();
        let message = format!(
            "Parsed {} files successfully. Create a sandbox to apply them.",
            parsed.files.len()
        );
        return Ok(Json(ApplyOutcome::Preview(PreviewResponse {
            success: true,
            results: PreviewResults {
                files_created: parsed.files.iter().map(|f| f.path.clone()).collect(),
                packages_installed: normalize_packages(&requested[..]),
                commands_executed: parsed.commands.clone(),
                errors: Vec::new(),
            },
            explanation: parsed.explanation,
            structure: parsed.structure,
            parsed_files: parsed.files,
            message,
        })));
    };

    let patching_enabled = req.is_edit && state.orchestrator.patching_available();
    let results = state
        .orchestrator
        .apply(
            sandbox.as_ref(),
            &parsed,
            req.is_edit,
            patching_enabled,
            &req.response,
        )
        .await?;

    let message = format!("Applied {} files successfully", results.files_created.len());
    Ok(Json(ApplyOutcome::Applied(ApplyResponse {
        success: true,
        results,
        explanation: parsed.explanation,
        structure: parsed.structure,
        message,
    })))
}
