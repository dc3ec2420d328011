use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::alerting::evaluation_service::ActivityMonitor;
use crate::alerting::models::CheckResult;

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<ActivityMonitor>,
}

pub fn create_axum_router(monitor: Arc<ActivityMonitor>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/check-now", get(check_now_handler))
        .with_state(Arc::new(AppState { monitor }))
        .layer(cors)
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn check_now_handler(State(app_state): State<Arc<AppState>>) -> Json<CheckResult> {
    // Detached so a client disconnect cannot abort the check mid-dispatch.
    let monitor = app_state.monitor.clone();
    let result = tokio::spawn(async move { monitor.check_and_alert().await })
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "Manual check task failed.");
            CheckResult::Error {
                error: format!("check task failed: {e}"),
            }
        });
    Json(result)
}
