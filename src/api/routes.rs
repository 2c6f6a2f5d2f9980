//! API route definitions

use axum::middleware::from_fn;
use axum::routing::{delete, get, post};
use axum::Router;

use super::handlers;
use super::middleware::RequestLogging;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_routes())
        .layer(from_fn(RequestLogging::log_request))
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(handlers::health::status))
        .route(
            "/proxies",
            get(handlers::proxy::list_proxies)
                .post(handlers::proxy::create_proxy)
                .delete(handlers::proxy::clear_proxies),
        )
        .route("/proxies/active", get(handlers::proxy::list_active_proxies))
        .route("/proxies/stats", get(handlers::proxy::proxy_stats))
        .route("/proxies/upload", post(handlers::proxy::upload_proxies))
        .route("/proxies/import", post(handlers::proxy::import_proxies))
        .route(
            "/proxies/health-check",
            post(handlers::proxy::health_check_proxies),
        )
        .route("/proxies/:id", delete(handlers::proxy::delete_proxy))
}
