//! Candidate selection
//!
//! Reads the candidate list from the store on every call, prefers the healthy
//! tier and picks uniformly at random within the chosen tier.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::{Result, RotatorError};
use crate::models::Proxy;
use crate::repository::ProxyStore;

/// Source of uniform indices, injectable so selection can be made deterministic
pub trait RandomSource: Send + Sync {
    /// Uniform index in `0..len`. Callers never pass `len == 0`.
    fn pick(&self, len: usize) -> usize;
}

/// Thread-local OS-seeded generator
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn pick(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// Reproducible generator for tests and replay
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn pick(&self, len: usize) -> usize {
        self.rng.lock().gen_range(0..len)
    }
}

/// Trait for choosing the upstream proxy of one request
#[async_trait]
pub trait ProxySelector: Send + Sync {
    /// Select a proxy, failing with `PoolExhausted` when no candidate exists
    async fn select(&self) -> Result<Proxy>;

    /// Get the strategy name
    fn strategy_name(&self) -> &'static str;
}

/// Healthy-first random selector over the store's candidate list
pub struct CandidateSelector {
    store: Arc<dyn ProxyStore>,
    random: Arc<dyn RandomSource>,
}

impl CandidateSelector {
    pub fn new(store: Arc<dyn ProxyStore>) -> Self {
        Self::with_random(store, Arc::new(ThreadRandom))
    }

    pub fn with_random(store: Arc<dyn ProxyStore>, random: Arc<dyn RandomSource>) -> Self {
        Self { store, random }
    }

    /// Choose from an already loaded best-first candidate list
    pub fn choose(&self, candidates: Vec<Proxy>) -> Result<Proxy> {
        if candidates.is_empty() {
            return Err(RotatorError::PoolExhausted);
        }

        let (healthy, rest): (Vec<Proxy>, Vec<Proxy>) =
            candidates.into_iter().partition(Proxy::is_healthy);

        let mut tier = if healthy.is_empty() { rest } else { healthy };
        let index = self.random.pick(tier.len()).min(tier.len() - 1);
        Ok(tier.swap_remove(index))
    }
}

#[async_trait]
impl ProxySelector for CandidateSelector {
    async fn select(&self) -> Result<Proxy> {
        let candidates = self.store.list_candidates().await?;
        let proxy = self.choose(candidates)?;

        debug!(id = proxy.id, address = %proxy.address(), "Selected proxy");
        Ok(proxy)
    }

    fn strategy_name(&self) -> &'static str {
        "healthy_first_random"
    }
}
