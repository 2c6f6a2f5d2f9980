//! API server using Axum
//!
//! Serves the pool management endpoints.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ApiServerConfig;
use crate::error::{Result, RotatorError};
use crate::pool::PoolManager;
use crate::services::HealthReporter;

use super::middleware::cors_layer;
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: PoolManager,
    pub reporter: HealthReporter,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(manager: PoolManager, reporter: HealthReporter) -> Self {
        Self {
            manager,
            reporter,
            started_at: Instant::now(),
        }
    }
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, manager: PoolManager, reporter: HealthReporter) -> Self {
        Self {
            config,
            state: AppState::new(manager, reporter),
        }
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.max_upload_size))
            .layer(cors_layer(&self.config.cors_origins))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| RotatorError::InvalidConfig(format!("Invalid API server address: {}", e)))?;

        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            })
            .await?;

        info!("API server shut down");
        Ok(())
    }
}
