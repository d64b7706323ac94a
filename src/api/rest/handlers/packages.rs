use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::sse::{Event, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use crate::api::rest::error::{ApiError, ApiResult};
use crate::api::rest::state::AppState;
use crate::packages::{normalize_packages, InstallError, InstallEvent};

#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    pub packages: Vec<String>,
}

/// Starts the install in a background task and streams its progress as SSE.
///
/// Validation and sandbox lookup happen before the stream opens, so those
/// failures come back as ordinary JSON errors.
pub async fn install_packages(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<InstallRequest>, JsonRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Json(req) = payload?;
    if req.packages.is_empty() {
        return Err(ApiError::field("packages", "At least one package must be specified"));
    }

    let packages = normalize_packages(&req.packages);
    if packages.is_empty() {
        return Err(InstallError::NoPackages.into());
    }

    let sandbox = state.sandboxes.active().await.ok_or(ApiError::NoSandbox)?;
    info!(sandbox_id = sandbox.id(), packages = ?packages, "Installing packages");

    let reconciler = state.reconciler.clone();
    let (mut emitter, rx) = reconciler.event_channel();
    tokio::spawn(async move {
        // Errors reach the client as the terminal event.
        if let Ok(outcome) = reconciler.run(sandbox.as_ref(), &packages, &mut emitter).await {
            info!(
                installed = ?outcome.installed,
                already_installed = ?outcome.already_installed,
                failed = ?outcome.failed,
                restarted = outcome.restarted,
                "Package install finished"
            );
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| Ok::<Event, Infallible>(to_sse_event(&event)));
    Ok(Sse::new(stream))
}

fn to_sse_event(event: &InstallEvent) -> Event {
    Event::default()
        .json_data(event)
        .unwrap_or_else(|_| Event::default().data("{}"))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use super::*;
    use crate::api::rest::handlers::testing::{body_json, body_text, test_state};
    use crate::sandbox::testing::MockSandbox;

    fn request(packages: &[&str]) -> Result<Json<InstallRequest>, JsonRejection> {
        Ok(Json(InstallRequest {
            packages: packages.iter().map(|p| p.to_string()).collect(),
        }))
    }

    #[tokio::test]
    async fn test_streams_events_as_sse_frames() {
        let (_dir, state) = test_state();
        let sandbox = Arc::new(
            MockSandbox::new().with_file("package.json", r#"{"dependencies": {"react": "^18"}}"#),
        );
        state.sandboxes.register(sandbox.clone()).await.unwrap();

        let response = install_packages(State(state), request(&["react", "axios"]))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );

        let text = body_text(response).await;
        let frames: Vec<serde_json::Value> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();

        assert_eq!(frames.first().unwrap()["type"], "start");
        assert_eq!(frames.first().unwrap()["packages"], serde_json::json!(["react", "axios"]));
        assert!(frames
            .iter()
            .any(|f| f["type"] == "info" && f["message"] == "Already installed: react"));
        let last = frames.last().unwrap();
        assert_eq!(last["type"], "complete");
        assert_eq!(last["installedPackages"], serde_json::json!(["axios"]));
        assert_eq!(sandbox.installs(), vec![vec!["axios".to_string()]]);
    }

    #[tokio::test]
    async fn test_requires_active_sandbox() {
        let (_dir, state) = test_state();
        let response = install_packages(State(state), request(&["react"]))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "NO_SANDBOX_PROVIDER");
    }

    #[tokio::test]
    async fn test_rejects_empty_package_lists() {
        for packages in [&[][..], &["  ", ""][..]] {
            let (_dir, state) = test_state();
            state
                .sandboxes
                .register(Arc::new(MockSandbox::new()))
                .await
                .unwrap();
            let response = install_packages(State(state), request(packages))
                .await
                .into_response();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = body_json(response).await;
            assert_eq!(body["code"], "VALIDATION_ERROR");
            assert_eq!(body["details"]["packages"]["_errors"].as_array().unwrap().len(), 1);
        }
    }
}
