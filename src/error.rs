use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the proxy rotator
#[derive(Error, Debug)]
pub enum RotatorError {
    // Descriptor errors
    #[error("Invalid proxy descriptor: {0}")]
    InvalidDescriptor(String),

    // Pool store errors
    #[error("Proxy {host}:{port} already exists")]
    DuplicateKey { host: String, port: u16 },

    #[error("Proxy not found: {id}")]
    ProxyNotFound { id: i32 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // Selection and forwarding errors
    #[error("No proxies available")]
    PoolExhausted,

    #[error("Upstream proxy failed: {0}")]
    UpstreamFailed(String),

    #[error("Probe failed: {0}")]
    ProbeFailure(String),

    #[error("Operation timed out")]
    Timeout,

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for rotator operations
pub type Result<T> = std::result::Result<T, RotatorError>;

impl RotatorError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RotatorError::InvalidDescriptor(_)
            | RotatorError::InvalidRequest(_)
            | RotatorError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 413 Payload Too Large
            RotatorError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 404 Not Found
            RotatorError::ProxyNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            RotatorError::DuplicateKey { .. } => StatusCode::CONFLICT,

            // 502 Bad Gateway
            RotatorError::UpstreamFailed(_) | RotatorError::ProbeFailure(_) => {
                StatusCode::BAD_GATEWAY
            }

            // 503 Service Unavailable
            RotatorError::PoolExhausted | RotatorError::DatabaseConnection(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 504 Gateway Timeout
            RotatorError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            RotatorError::Database(_)
            | RotatorError::Io(_)
            | RotatorError::Http(_)
            | RotatorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for RotatorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<hyper::Error> for RotatorError {
    fn from(err: hyper::Error) -> Self {
        RotatorError::Http(err.to_string())
    }
}

impl From<url::ParseError> for RotatorError {
    fn from(err: url::ParseError) -> Self {
        RotatorError::InvalidDescriptor(err.to_string())
    }
}

impl From<reqwest::Error> for RotatorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            // The request itself could not be built, e.g. an unparseable URL
            RotatorError::InvalidRequest(err.to_string())
        } else if err.is_timeout() {
            RotatorError::Timeout
        } else {
            RotatorError::UpstreamFailed(err.to_string())
        }
    }
}
