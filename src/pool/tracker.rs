//! Health outcome bookkeeping

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::repository::{HealthOutcome, ProxyStore};

/// Applies relay and probe outcomes to the pool store
#[derive(Clone)]
pub struct HealthTracker {
    store: Arc<dyn ProxyStore>,
}

impl HealthTracker {
    pub fn new(store: Arc<dyn ProxyStore>) -> Self {
        Self { store }
    }

    /// Reset the fail count and record the latency
    pub async fn report_success(&self, id: i32, response_time_ms: u32) -> Result<()> {
        debug!(id = id, response_time_ms = response_time_ms, "Proxy succeeded");
        self.store
            .update_health(id, HealthOutcome::Success { response_time_ms })
            .await
    }

    /// Count one more failure against the proxy
    pub async fn report_failure(&self, id: i32) -> Result<()> {
        debug!(id = id, "Proxy failed");
        self.store.update_health(id, HealthOutcome::Failure).await
    }

    pub async fn report(&self, id: i32, outcome: HealthOutcome) -> Result<()> {
        match outcome {
            HealthOutcome::Success { response_time_ms } => {
                self.report_success(id, response_time_ms).await
            }
            HealthOutcome::Failure => self.report_failure(id).await,
        }
    }
}
