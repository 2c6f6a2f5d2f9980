//! Batch health checking for upstream proxies
//!
//! Probes every candidate once through the proxy itself and feeds the outcome
//! to the health tracker. A failing probe is recorded, never propagated.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, RotatorError};
use crate::models::Proxy;
use crate::pool::HealthTracker;
use crate::repository::ProxyStore;

/// Default probe timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome counts of one batch health check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthCheckSummary {
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
}

/// Issues one test request through a proxy
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns the elapsed time on a 2xx response, `ProbeFailure` otherwise
    async fn probe(&self, proxy: &Proxy, url: &str) -> Result<Duration>;
}

/// Prober backed by a reqwest client routed through the proxy under test
#[derive(Debug, Clone)]
pub struct HttpProber {
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client_for(&self, proxy: &Proxy) -> Result<reqwest::Client> {
        let upstream = reqwest::Proxy::all(proxy.upstream_url()?)
            .map_err(|e| RotatorError::ProbeFailure(e.to_string()))?;

        reqwest::Client::builder()
            .proxy(upstream)
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| RotatorError::ProbeFailure(e.to_string()))
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, proxy: &Proxy, url: &str) -> Result<Duration> {
        let client = self.client_for(proxy)?;
        let started = Instant::now();

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| RotatorError::ProbeFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RotatorError::ProbeFailure(format!(
                "unexpected status {}",
                status
            )));
        }

        Ok(started.elapsed())
    }
}

/// Runs probes over the candidate list with bounded concurrency
pub struct HealthChecker {
    store: Arc<dyn ProxyStore>,
    tracker: HealthTracker,
    prober: Arc<dyn Prober>,
    workers: usize,
    probe_timeout: Duration,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn ProxyStore>,
        tracker: HealthTracker,
        prober: Arc<dyn Prober>,
        workers: usize,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            store,
            tracker,
            prober,
            workers: workers.max(1),
            probe_timeout,
        }
    }

    /// Probe every current candidate once against `url`
    #[instrument(skip(self))]
    pub async fn check_all(&self, url: &str) -> Result<HealthCheckSummary> {
        let candidates = self.store.list_candidates().await?;
        info!("Checking health of {} proxies", candidates.len());

        let results = futures::stream::iter(candidates)
            .map(|proxy| async move { self.check_proxy(&proxy, url).await })
            .buffer_unordered(self.workers)
            .collect::<Vec<bool>>()
            .await;

        let healthy = results.iter().filter(|&&ok| ok).count();
        let summary = HealthCheckSummary {
            checked: results.len(),
            healthy,
            unhealthy: results.len() - healthy,
        };

        info!(
            checked = summary.checked,
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            "Health check complete"
        );

        Ok(summary)
    }

    /// Probe a single proxy and record the outcome. Returns whether it passed.
    async fn check_proxy(&self, proxy: &Proxy, url: &str) -> bool {
        let outcome = match timeout(self.probe_timeout, self.prober.probe(proxy, url)).await {
            Ok(result) => result,
            Err(_) => Err(RotatorError::ProbeFailure("probe timed out".into())),
        };

        let (passed, recorded) = match outcome {
            Ok(elapsed) => {
                let ms = u32::try_from(elapsed.as_millis()).unwrap_or(u32::MAX);
                debug!(id = proxy.id, address = %proxy.address(), response_time_ms = ms, "Proxy is healthy");
                (true, self.tracker.report_success(proxy.id, ms).await)
            }
            Err(e) => {
                warn!(id = proxy.id, address = %proxy.address(), error = %e, "Proxy is unhealthy");
                (false, self.tracker.report_failure(proxy.id).await)
            }
        };

        if let Err(e) = recorded {
            warn!(id = proxy.id, error = %e, "Failed to record health check");
        }

        passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewProxy, ProxyProtocol};
    use crate::repository::{HealthOutcome, MemoryProxyRepository};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Passes on even ports, fails on odd ports, hangs on port 9999
    struct FakeProber {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, proxy: &Proxy, _url: &str) -> Result<Duration> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if proxy.port == 9999 {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if proxy.port % 2 == 0 {
                Ok(Duration::from_millis(proxy.port as u64))
            } else {
                Err(RotatorError::ProbeFailure("connection refused".into()))
            }
        }
    }

    fn checker(repo: Arc<MemoryProxyRepository>, prober: Arc<FakeProber>) -> HealthChecker {
        HealthChecker::new(
            repo.clone(),
            HealthTracker::new(repo),
            prober,
            4,
            Duration::from_millis(200),
        )
    }

    async fn add(repo: &MemoryProxyRepository, port: u16) -> Proxy {
        repo.insert(&NewProxy::new("10.0.0.1", port, ProxyProtocol::Http))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_check_all_records_each_outcome() {
        let repo = Arc::new(MemoryProxyRepository::new());
        let good = add(&repo, 8080).await;
        let bad = add(&repo, 8081).await;
        let prober = Arc::new(FakeProber {
            calls: AtomicUsize::new(0),
        });

        let summary = checker(repo.clone(), prober.clone())
            .check_all("http://echo.test/ip")
            .await
            .unwrap();

        assert_eq!(
            summary,
            HealthCheckSummary {
                checked: 2,
                healthy: 1,
                unhealthy: 1
            }
        );
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);

        let good = repo.get(good.id).unwrap();
        assert_eq!(good.fail_count, 0);
        assert_eq!(good.response_time, 8080);
        assert!(good.last_checked.is_some());

        let bad = repo.get(bad.id).unwrap();
        assert_eq!(bad.fail_count, 1);
        assert!(bad.is_active);
    }

    #[tokio::test]
    async fn test_hung_probe_times_out_without_blocking_others() {
        let repo = Arc::new(MemoryProxyRepository::new());
        let hung = add(&repo, 9999).await;
        for port in [8000, 8002, 8004] {
            add(&repo, port).await;
        }
        let prober = Arc::new(FakeProber {
            calls: AtomicUsize::new(0),
        });

        let summary = checker(repo.clone(), prober)
            .check_all("http://echo.test/ip")
            .await
            .unwrap();

        assert_eq!(summary.checked, 4);
        assert_eq!(summary.healthy, 3);
        assert_eq!(repo.get(hung.id).unwrap().fail_count, 1);
    }

    #[tokio::test]
    async fn test_only_candidates_are_probed() {
        let repo = Arc::new(MemoryProxyRepository::new());
        let retired = add(&repo, 8001).await;
        for _ in 0..5 {
            repo.update_health(retired.id, HealthOutcome::Failure)
                .await
                .unwrap();
        }
        add(&repo, 8002).await;
        let prober = Arc::new(FakeProber {
            calls: AtomicUsize::new(0),
        });

        let summary = checker(repo.clone(), prober.clone())
            .check_all("http://echo.test/ip")
            .await
            .unwrap();

        assert_eq!(summary.checked, 1);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
        assert_eq!(repo.get(retired.id).unwrap().fail_count, 5);
    }

    #[tokio::test]
    async fn test_empty_pool_checks_nothing() {
        let repo = Arc::new(MemoryProxyRepository::new());
        let prober = Arc::new(FakeProber {
            calls: AtomicUsize::new(0),
        });

        let summary = checker(repo, prober)
            .check_all("http://echo.test/ip")
            .await
            .unwrap();
        assert_eq!(summary, HealthCheckSummary::default());
    }

    #[test]
    fn test_http_prober_builds_client_for_each_protocol() {
        let prober = HttpProber::default();
        for protocol in [ProxyProtocol::Http, ProxyProtocol::Https, ProxyProtocol::Socks5] {
            let mut proxy = Proxy {
                id: 1,
                host: "198.51.100.7".into(),
                port: 1080,
                username: Some("alice".into()),
                password: Some("secret".into()),
                protocol,
                is_active: true,
                last_checked: None,
                response_time: 0,
                fail_count: 0,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            };
            assert!(prober.client_for(&proxy).is_ok());
            proxy.username = None;
            assert!(prober.client_for(&proxy).is_ok());
        }
    }
}
