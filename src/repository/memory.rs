//! In-process pool store
//!
//! Records live in a `DashMap` keyed by id, with a second `DashMap` acting as
//! the (host, port) uniqueness index. Each mutation runs under the guard of
//! the entry it touches, so reports for the same id serialize while other ids
//! proceed independently.

use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use super::{HealthOutcome, ProxyStore};
use crate::error::{Result, RotatorError};
use crate::models::{NewProxy, Proxy, ProxyStats, MAX_FAIL_COUNT};

/// Non-durable pool store for tests and `STORE_BACKEND=memory`
#[derive(Debug, Default)]
pub struct MemoryProxyRepository {
    records: DashMap<i32, Proxy>,
    addresses: DashMap<(String, u16), i32>,
    next_id: AtomicI32,
}

impl MemoryProxyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a proxy by ID
    pub fn get(&self, id: i32) -> Option<Proxy> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn snapshot(&self) -> Vec<Proxy> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }
}

#[async_trait]
impl ProxyStore for MemoryProxyRepository {
    async fn insert(&self, proxy: &NewProxy) -> Result<Proxy> {
        let key = (proxy.host.clone(), proxy.port);

        // Holding the vacant entry keeps concurrent inserts of the same
        // address out until the record exists.
        match self.addresses.entry(key) {
            Entry::Occupied(_) => Err(RotatorError::DuplicateKey {
                host: proxy.host.clone(),
                port: proxy.port,
            }),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                let now = Utc::now();
                let created = Proxy {
                    id,
                    host: proxy.host.clone(),
                    port: proxy.port,
                    username: proxy.username.clone(),
                    password: proxy.password.clone(),
                    protocol: proxy.protocol,
                    is_active: proxy.is_active,
                    last_checked: None,
                    response_time: 0,
                    fail_count: 0,
                    created_at: now,
                    updated_at: now,
                };
                self.records.insert(id, created.clone());
                slot.insert(id);

                info!(id = created.id, address = %created.address(), "Created proxy");
                Ok(created)
            }
        }
    }

    async fn list_candidates(&self) -> Result<Vec<Proxy>> {
        let mut candidates: Vec<Proxy> = self
            .snapshot()
            .into_iter()
            .filter(Proxy::is_candidate)
            .collect();
        candidates.sort_by_key(|p| (p.response_time, p.fail_count, p.id));
        Ok(candidates)
    }

    async fn list_all(&self) -> Result<Vec<Proxy>> {
        let mut all = self.snapshot();
        all.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(all)
    }

    async fn update_health(&self, id: i32, outcome: HealthOutcome) -> Result<()> {
        let Some(mut record) = self.records.get_mut(&id) else {
            debug!(id = id, "Health update for missing proxy ignored");
            return Ok(());
        };

        let now = Utc::now();
        match outcome {
            HealthOutcome::Success { response_time_ms } => {
                record.fail_count = 0;
                record.response_time = response_time_ms;
            }
            HealthOutcome::Failure => {
                record.fail_count = record.fail_count.saturating_add(1);
                if record.fail_count >= MAX_FAIL_COUNT {
                    record.is_active = false;
                }
            }
        }
        record.last_checked = Some(now);
        record.updated_at = now;

        Ok(())
    }

    async fn delete(&self, id: i32) -> Result<()> {
        let (_, removed) = self
            .records
            .remove(&id)
            .ok_or(RotatorError::ProxyNotFound { id })?;
        self.addresses
            .remove_if(&(removed.host, removed.port), |_, owner| *owner == id);

        info!(id = id, "Deleted proxy");
        Ok(())
    }

    async fn clear_all(&self) -> Result<u64> {
        // Remove record by record so an insert racing the clear keeps its
        // record and its index entry together.
        let ids: Vec<i32> = self.records.iter().map(|entry| *entry.key()).collect();
        let mut removed = 0u64;
        for id in ids {
            let Some((_, proxy)) = self.records.remove(&id) else {
                continue;
            };
            self.addresses
                .remove_if(&(proxy.host, proxy.port), |_, owner| *owner == id);
            removed += 1;
        }

        info!(count = removed, "Cleared proxy pool");
        Ok(removed)
    }

    async fn stats(&self) -> Result<ProxyStats> {
        let mut stats = ProxyStats::default();
        for proxy in self.snapshot() {
            stats.total_proxies += 1;
            if proxy.is_active {
                stats.active_proxies += 1;
            }
            if proxy.is_healthy() {
                stats.healthy_proxies += 1;
            }
            if !proxy.is_candidate() {
                stats.failed_proxies += 1;
            }
        }
        Ok(stats)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyProtocol;
    use std::sync::Arc;

    fn new_proxy(host: &str, port: u16) -> NewProxy {
        NewProxy::new(host, port, ProxyProtocol::Http)
    }

    async fn set_response_time(repo: &MemoryProxyRepository, id: i32, ms: u32) {
        repo.update_health(id, HealthOutcome::Success { response_time_ms: ms })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_defaults() {
        let repo = MemoryProxyRepository::new();
        let a = repo.insert(&new_proxy("10.0.0.1", 8080)).await.unwrap();
        let b = repo.insert(&new_proxy("10.0.0.2", 8080)).await.unwrap();

        assert_ne!(a.id, b.id);
        assert!(a.is_active);
        assert_eq!(a.fail_count, 0);
        assert_eq!(a.response_time, 0);
        assert!(a.last_checked.is_none());
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_address() {
        let repo = MemoryProxyRepository::new();
        repo.insert(&new_proxy("10.0.0.1", 8080)).await.unwrap();

        let err = repo.insert(&new_proxy("10.0.0.1", 8080)).await.unwrap_err();
        assert!(matches!(
            err,
            RotatorError::DuplicateKey { ref host, port: 8080 } if host == "10.0.0.1"
        ));

        // Same host on another port is a different proxy
        repo.insert(&new_proxy("10.0.0.1", 8081)).await.unwrap();
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn test_candidates_are_ordered_best_first() {
        let repo = MemoryProxyRepository::new();
        let slow = repo.insert(&new_proxy("10.0.0.1", 1)).await.unwrap();
        let fast = repo.insert(&new_proxy("10.0.0.2", 2)).await.unwrap();
        let flaky = repo.insert(&new_proxy("10.0.0.3", 3)).await.unwrap();

        set_response_time(&repo, slow.id, 900).await;
        set_response_time(&repo, fast.id, 40).await;
        set_response_time(&repo, flaky.id, 40).await;
        repo.update_health(flaky.id, HealthOutcome::Failure).await.unwrap();

        let ids: Vec<i32> = repo
            .list_candidates()
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![fast.id, flaky.id, slow.id]);
    }

    #[tokio::test]
    async fn test_list_all_is_newest_first() {
        let repo = MemoryProxyRepository::new();
        let first = repo.insert(&new_proxy("10.0.0.1", 1)).await.unwrap();
        let second = repo.insert(&new_proxy("10.0.0.2", 2)).await.unwrap();

        let all = repo.list_all().await.unwrap();
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);
    }

    #[tokio::test]
    async fn test_success_resets_fail_count() {
        let repo = MemoryProxyRepository::new();
        let p = repo.insert(&new_proxy("10.0.0.1", 1)).await.unwrap();

        for _ in 0..3 {
            repo.update_health(p.id, HealthOutcome::Failure).await.unwrap();
        }
        assert_eq!(repo.get(p.id).unwrap().fail_count, 3);

        set_response_time(&repo, p.id, 250).await;
        let updated = repo.get(p.id).unwrap();
        assert_eq!(updated.fail_count, 0);
        assert_eq!(updated.response_time, 250);
        assert!(updated.last_checked.is_some());
    }

    #[tokio::test]
    async fn test_fifth_failure_deactivates_and_success_does_not_reactivate() {
        let repo = MemoryProxyRepository::new();
        let p = repo.insert(&new_proxy("10.0.0.1", 1)).await.unwrap();

        for expected in 1..=4 {
            repo.update_health(p.id, HealthOutcome::Failure).await.unwrap();
            let current = repo.get(p.id).unwrap();
            assert_eq!(current.fail_count, expected);
            assert!(current.is_active);
        }

        repo.update_health(p.id, HealthOutcome::Failure).await.unwrap();
        let current = repo.get(p.id).unwrap();
        assert_eq!(current.fail_count, 5);
        assert!(!current.is_active);

        set_response_time(&repo, p.id, 10).await;
        let current = repo.get(p.id).unwrap();
        assert_eq!(current.fail_count, 0);
        assert!(!current.is_active);
        assert!(repo.list_candidates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_for_missing_id_is_noop() {
        let repo = MemoryProxyRepository::new();
        repo.update_health(42, HealthOutcome::Failure).await.unwrap();
        repo.update_health(42, HealthOutcome::Success { response_time_ms: 1 })
            .await
            .unwrap();
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_not_found() {
        let repo = MemoryProxyRepository::new();
        let p = repo.insert(&new_proxy("10.0.0.1", 1)).await.unwrap();

        assert!(matches!(
            repo.delete(p.id + 100).await,
            Err(RotatorError::ProxyNotFound { .. })
        ));

        repo.delete(p.id).await.unwrap();
        assert!(repo.list_all().await.unwrap().is_empty());

        // Address is free again after delete
        repo.insert(&new_proxy("10.0.0.1", 1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_all_and_stats() {
        let repo = MemoryProxyRepository::new();
        let healthy = repo.insert(&new_proxy("10.0.0.1", 1)).await.unwrap();
        let slow = repo.insert(&new_proxy("10.0.0.2", 2)).await.unwrap();
        let dead = repo.insert(&new_proxy("10.0.0.3", 3)).await.unwrap();

        set_response_time(&repo, healthy.id, 100).await;
        set_response_time(&repo, slow.id, 20_000).await;
        for _ in 0..5 {
            repo.update_health(dead.id, HealthOutcome::Failure).await.unwrap();
        }

        let stats = repo.stats().await.unwrap();
        assert_eq!(
            stats,
            ProxyStats {
                total_proxies: 3,
                active_proxies: 2,
                healthy_proxies: 1,
                failed_proxies: 1,
            }
        );

        assert_eq!(repo.clear_all().await.unwrap(), 3);
        assert_eq!(repo.stats().await.unwrap(), ProxyStats::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_never_lose_increments() {
        let repo = Arc::new(MemoryProxyRepository::new());
        let p = repo.insert(&new_proxy("10.0.0.1", 1)).await.unwrap();

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    repo.update_health(p.id, HealthOutcome::Failure).await.unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let current = repo.get(p.id).unwrap();
        assert_eq!(current.fail_count, 64);
        assert!(!current.is_active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_of_same_address_keep_one() {
        let repo = Arc::new(MemoryProxyRepository::new());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.insert(&new_proxy("10.0.0.9", 9)).await.is_ok() })
            })
            .collect();

        let mut inserted = 0;
        for task in tasks {
            if task.await.unwrap() {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clear_racing_inserts_keeps_index_consistent() {
        let repo = Arc::new(MemoryProxyRepository::new());

        let mut tasks = Vec::new();
        for round in 0..8u16 {
            let inserter = repo.clone();
            tasks.push(tokio::spawn(async move {
                for port in 1..=64u16 {
                    let _ = inserter
                        .insert(&new_proxy(&format!("10.0.{}.1", round), port))
                        .await;
                }
            }));
            let clearer = repo.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..8 {
                    clearer.clear_all().await.unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for entry in repo.records.iter() {
            let proxy = entry.value();
            let owner = repo.addresses.get(&(proxy.host.clone(), proxy.port));
            assert_eq!(owner.map(|o| *o), Some(proxy.id));
        }
        for entry in repo.addresses.iter() {
            let (host, port) = entry.key();
            let proxy = repo.get(*entry.value()).unwrap();
            assert_eq!((&proxy.host, proxy.port), (host, *port));
        }
        assert_eq!(repo.records.len(), repo.addresses.len());

        repo.clear_all().await.unwrap();
        assert!(repo.addresses.is_empty());
        repo.insert(&new_proxy("10.0.0.1", 1)).await.unwrap();
        assert!(matches!(
            repo.insert(&new_proxy("10.0.0.1", 1)).await,
            Err(RotatorError::DuplicateKey { .. })
        ));
    }
}
