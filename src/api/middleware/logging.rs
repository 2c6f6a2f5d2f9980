//! Request logging middleware

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Request logging middleware
pub struct RequestLogging;

impl RequestLogging {
    /// Log method, path, status and latency of every API call
    pub async fn log_request(req: Request<Body>, next: Next) -> Response {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let start = Instant::now();

        debug!(method = %method, uri = %uri, "API request started");

        let response = next.run(req).await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        if status.is_server_error() {
            warn!(method = %method, uri = %uri, status = status.as_u16(), elapsed_ms, "API request failed");
        } else {
            info!(method = %method, uri = %uri, status = status.as_u16(), elapsed_ms, "API request");
        }

        response
    }
}
