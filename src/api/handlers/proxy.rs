//! Proxy management handlers

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::api::server::AppState;
use crate::error::RotatorError;
use crate::models::{CreateProxyRequest, NewProxy, Proxy};
use crate::pool::IngestSummary;
use crate::proxy::HealthCheckSummary;

#[derive(Debug, Serialize)]
struct IngestResponse {
    message: &'static str,
    #[serde(flatten)]
    summary: IngestSummary,
}

#[derive(Debug, Serialize)]
struct ProxyListResponse {
    proxies: Vec<Proxy>,
    count: usize,
}

impl From<Vec<Proxy>> for ProxyListResponse {
    fn from(proxies: Vec<Proxy>) -> Self {
        Self {
            count: proxies.len(),
            proxies,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthCheckResponse {
    message: &'static str,
    url: String,
    #[serde(flatten)]
    summary: HealthCheckSummary,
}

/// Query parameters for a batch health check
#[derive(Debug, Deserialize, Default)]
pub struct HealthCheckQuery {
    pub url: Option<String>,
}

/// Ingest a `.txt` descriptor file sent as multipart field `file`
pub async fn upload_proxies(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, RotatorError> {
    let mut text = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RotatorError::InvalidRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        if !is_text_file(field.file_name(), field.content_type()) {
            return Err(RotatorError::InvalidRequest(
                "Only .txt files are allowed".to_string(),
            ));
        }

        text = Some(
            field
                .text()
                .await
                .map_err(|e| RotatorError::InvalidRequest(format!("Failed to read file: {}", e)))?,
        );
        break;
    }

    let text = text.ok_or_else(|| RotatorError::InvalidRequest("No file uploaded".to_string()))?;
    let summary = state.manager.ingest(&text).await?;

    Ok(Json(IngestResponse {
        message: "Proxies uploaded successfully",
        summary,
    }))
}

/// Ingest descriptor text sent as the raw request body
pub async fn import_proxies(
    State(state): State<AppState>,
    body: String,
) -> Result<impl IntoResponse, RotatorError> {
    let summary = state.manager.ingest(&body).await?;

    Ok(Json(IngestResponse {
        message: "Proxies imported successfully",
        summary,
    }))
}

/// List all proxies
pub async fn list_proxies(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, RotatorError> {
    let proxies = state.manager.list_all().await?;
    Ok(Json(ProxyListResponse::from(proxies)))
}

/// List only proxies eligible for selection
pub async fn list_active_proxies(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, RotatorError> {
    let proxies = state.manager.list_candidates().await?;
    Ok(Json(ProxyListResponse::from(proxies)))
}

/// Manually add a proxy
pub async fn create_proxy(
    State(state): State<AppState>,
    Json(req): Json<CreateProxyRequest>,
) -> Result<impl IntoResponse, RotatorError> {
    let proxy = state.manager.add(NewProxy::try_from(req)?).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Proxy added successfully",
            "proxy": proxy,
        })),
    ))
}

/// Delete a proxy
pub async fn delete_proxy(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, RotatorError> {
    state.manager.delete(id).await?;

    Ok(Json(json!({
        "message": "Proxy deleted successfully",
    })))
}

/// Remove every proxy
pub async fn clear_proxies(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, RotatorError> {
    let removed = state.manager.clear().await?;

    Ok(Json(json!({
        "message": "All proxies cleared successfully",
        "removed": removed,
    })))
}

/// Aggregate pool statistics
pub async fn proxy_stats(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, RotatorError> {
    Ok(Json(state.manager.stats().await?))
}

/// Probe every candidate against `?url=` or the configured default
pub async fn health_check_proxies(
    State(state): State<AppState>,
    Query(query): Query<HealthCheckQuery>,
) -> Result<impl IntoResponse, RotatorError> {
    let url = query
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| state.manager.default_check_url().to_string());

    info!(url = %url, "Starting batch health check");
    let summary = state.manager.health_check(Some(&url)).await?;

    Ok(Json(HealthCheckResponse {
        message: "Health check completed",
        url,
        summary,
    }))
}

fn is_text_file(file_name: Option<&str>, content_type: Option<&str>) -> bool {
    let plain = content_type
        .map(|ct| ct.split(';').next().unwrap_or_default().trim())
        .is_some_and(|ct| ct.eq_ignore_ascii_case("text/plain"));
    let txt = file_name.is_some_and(|name| name.to_ascii_lowercase().ends_with(".txt"));
    plain || txt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_text_file() {
        assert!(is_text_file(Some("proxies.txt"), None));
        assert!(is_text_file(Some("PROXIES.TXT"), Some("application/octet-stream")));
        assert!(is_text_file(Some("list"), Some("text/plain; charset=utf-8")));
        assert!(!is_text_file(Some("proxies.csv"), Some("text/csv")));
        assert!(!is_text_file(None, None));
    }
}
