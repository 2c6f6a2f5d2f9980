//! Pool management surface
//!
//! `PoolManager` ties the store, parser, selector and health checker
//! together and exposes the operations the management API and the forwarder
//! need.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, RotatorError};
use crate::models::{NewProxy, Proxy, ProxyStats};
use crate::pool::descriptor::parse_batch;
use crate::pool::selector::{CandidateSelector, ProxySelector};
use crate::proxy::health::{HealthCheckSummary, HealthChecker};
use crate::repository::ProxyStore;

/// Counts reported after ingesting a block of descriptor text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Non-blank, non-comment lines
    pub total_lines: usize,
    /// Lines that parsed into a proxy
    pub total_parsed: usize,
    /// Proxies inserted
    pub total_added: usize,
    /// Parsed proxies that already existed
    pub total_skipped: usize,
    /// Lines that failed to parse
    pub total_rejected: usize,
}

#[derive(Clone)]
pub struct PoolManager {
    store: Arc<dyn ProxyStore>,
    selector: Arc<dyn ProxySelector>,
    checker: Arc<HealthChecker>,
    default_check_url: String,
}

impl PoolManager {
    pub fn new(
        store: Arc<dyn ProxyStore>,
        checker: HealthChecker,
        default_check_url: impl Into<String>,
    ) -> Self {
        let selector = Arc::new(CandidateSelector::new(store.clone()));
        Self::with_selector(store, selector, checker, default_check_url)
    }

    pub fn with_selector(
        store: Arc<dyn ProxyStore>,
        selector: Arc<dyn ProxySelector>,
        checker: HealthChecker,
        default_check_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            selector,
            checker: Arc::new(checker),
            default_check_url: default_check_url.into(),
        }
    }

    pub fn selector(&self) -> &Arc<dyn ProxySelector> {
        &self.selector
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Parse `text` and insert every valid descriptor.
    ///
    /// Invalid lines and duplicates are counted, never fatal. Any other store
    /// error aborts the batch. A batch without a single valid descriptor is
    /// rejected.
    pub async fn ingest(&self, text: &str) -> Result<IngestSummary> {
        let batch = parse_batch(text);
        if batch.proxies.is_empty() {
            return Err(RotatorError::InvalidRequest(
                "No valid proxies found".to_string(),
            ));
        }

        let mut summary = IngestSummary {
            total_lines: batch.considered,
            total_parsed: batch.accepted(),
            total_rejected: batch.rejected.len(),
            ..Default::default()
        };

        for proxy in &batch.proxies {
            match self.store.insert(proxy).await {
                Ok(_) => summary.total_added += 1,
                Err(RotatorError::DuplicateKey { host, port }) => {
                    debug!(host = %host, port = port, "Skipping duplicate proxy");
                    summary.total_skipped += 1;
                }
                Err(e) => {
                    warn!(error = %e, added = summary.total_added, "Ingest aborted");
                    return Err(e);
                }
            }
        }

        info!(
            parsed = summary.total_parsed,
            added = summary.total_added,
            skipped = summary.total_skipped,
            rejected = summary.total_rejected,
            "Ingested proxies"
        );

        Ok(summary)
    }

    /// Add a single proxy. A duplicate is an error here.
    pub async fn add(&self, proxy: NewProxy) -> Result<Proxy> {
        self.store.insert(&proxy).await
    }

    pub async fn list_all(&self) -> Result<Vec<Proxy>> {
        self.store.list_all().await
    }

    pub async fn list_candidates(&self) -> Result<Vec<Proxy>> {
        self.store.list_candidates().await
    }

    pub async fn delete(&self, id: i32) -> Result<()> {
        self.store.delete(id).await
    }

    pub async fn clear(&self) -> Result<u64> {
        self.store.clear_all().await
    }

    pub async fn stats(&self) -> Result<ProxyStats> {
        self.store.stats().await
    }

    /// Pick the upstream proxy for one request
    pub async fn select(&self) -> Result<Proxy> {
        self.selector.select().await
    }

    /// Probe every candidate against `url`, or the configured default
    pub async fn health_check(&self, url: Option<&str>) -> Result<HealthCheckSummary> {
        let url = url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.default_check_url);
        self.checker.check_all(url).await
    }

    pub fn default_check_url(&self) -> &str {
        &self.default_check_url
    }
}
