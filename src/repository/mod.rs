//! Pool store implementations
//!
//! `ProxyStore` is the durable keyed collection behind the pool. Every
//! implementation must keep (host, port) unique and apply health updates
//! atomically per record without serializing unrelated records.

pub mod memory;
pub mod proxy;

pub use memory::MemoryProxyRepository;
pub use proxy::ProxyRepository;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{NewProxy, Proxy, ProxyStats};

/// Outcome of one relay attempt or probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    /// Resets the fail count and records the response time
    Success { response_time_ms: u32 },
    /// Increments the fail count, deactivating at the threshold
    Failure,
}

impl HealthOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, HealthOutcome::Success { .. })
    }
}

#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Insert a new record, failing with `DuplicateKey` on a (host, port) collision
    async fn insert(&self, proxy: &NewProxy) -> Result<Proxy>;

    /// Active records with fail count below the threshold, best first
    /// (response time ascending, then fail count ascending)
    async fn list_candidates(&self) -> Result<Vec<Proxy>>;

    /// Every record, newest first
    async fn list_all(&self) -> Result<Vec<Proxy>>;

    /// Apply a health outcome. Unknown ids are a silent no-op.
    async fn update_health(&self, id: i32, outcome: HealthOutcome) -> Result<()>;

    /// Remove a record, failing with `ProxyNotFound` if absent
    async fn delete(&self, id: i32) -> Result<()>;

    /// Remove every record, returning how many were removed
    async fn clear_all(&self) -> Result<u64>;

    /// Aggregate counters from a single consistent read
    async fn stats(&self) -> Result<ProxyStats>;

    /// Backend name for status reporting
    fn backend_name(&self) -> &'static str;
}
