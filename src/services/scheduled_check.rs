//! Scheduled batch health check
//!
//! Re-probes the candidate list on a fixed interval so unmeasured and slow
//! proxies get fresh latency numbers without waiting for live traffic.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, instrument};

use crate::pool::PoolManager;

/// Scheduled health check configuration
#[derive(Clone)]
pub struct ScheduledCheckConfig {
    /// Interval between checks
    pub check_interval: Duration,
    /// Probe target
    pub check_url: String,
}

/// Periodic batch health check
pub struct ScheduledHealthCheck {
    manager: PoolManager,
    config: ScheduledCheckConfig,
}

impl ScheduledHealthCheck {
    pub fn new(manager: PoolManager, config: ScheduledCheckConfig) -> Self {
        Self { manager, config }
    }

    /// Run the scheduled check (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting scheduled health check with {}s interval",
            self.config.check_interval.as_secs()
        );

        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.manager.health_check(Some(&self.config.check_url)).await {
                        error!("Scheduled health check failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scheduled health check shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewProxy, ProxyProtocol};
    use crate::pool::manager::tests::memory_manager;

    #[tokio::test]
    async fn test_runs_on_interval_until_shutdown() {
        let (manager, repo) = memory_manager();
        let proxy = manager
            .add(NewProxy::new("10.0.0.1", 8080, ProxyProtocol::Http))
            .await
            .unwrap();

        let service = ScheduledHealthCheck::new(
            manager,
            ScheduledCheckConfig {
                check_interval: Duration::from_millis(20),
                check_url: "http://echo.test/ip".into(),
            },
        );
        let (handle, shutdown) = crate::services::ShutdownHandle::new();
        let task = tokio::spawn(async move { service.run(shutdown).await });

        for _ in 0..100 {
            if repo.get(proxy.id).and_then(|p| p.last_checked).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(repo.get(proxy.id).unwrap().response_time, 42);

        handle.shutdown();
        task.await.unwrap();
    }
}
