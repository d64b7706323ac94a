use axum::{
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api::rest::{handlers, logging_middleware::request_logging_middleware, state::AppState};

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/version", get(version))
        .route("/apply-ai-code", post(handlers::apply::apply_ai_code))
        .route("/install-packages", post(handlers::packages::install_packages))
        // Sandbox lifecycle
        .route(
            "/sandboxes",
            get(handlers::sandboxes::list_sandboxes).post(handlers::sandboxes::create_sandbox),
        )
        .route("/sandboxes/active", get(handlers::sandboxes::get_active_sandbox))
        .route(
            "/sandboxes/{id}",
            get(handlers::sandboxes::get_sandbox).delete(handlers::sandboxes::delete_sandbox),
        )
        .route(
            "/sandboxes/{id}/activate",
            post(handlers::sandboxes::activate_sandbox),
        )
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
