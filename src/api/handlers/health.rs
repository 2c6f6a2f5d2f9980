//! Liveness and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::api::server::AppState;
use crate::error::RotatorError;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "time": Utc::now(),
        })),
    )
}

/// Pool and health report queue status
pub async fn status(State(state): State<AppState>) -> Result<impl IntoResponse, RotatorError> {
    let stats = state.manager.stats().await?;

    Ok(Json(json!({
        "status": "running",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "backend": state.manager.backend_name(),
        "selection": state.manager.selector().strategy_name(),
        "stats": stats,
        "health_reports": state.reporter.stats(),
    })))
}
