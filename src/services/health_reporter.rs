//! Health report queue
//!
//! The forwarder hands relay outcomes to a bounded channel and returns to its
//! client immediately. A single worker drains the channel into the health
//! tracker. On shutdown the channel is closed and the backlog is applied
//! before the worker exits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::pool::HealthTracker;
use crate::repository::HealthOutcome;

/// One relay outcome waiting to be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub id: i32,
    pub outcome: HealthOutcome,
}

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of the queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReporterStats {
    pub capacity: usize,
    pub pending: usize,
    pub enqueued: u64,
    pub dropped: u64,
    pub applied: u64,
    pub failed: u64,
}

/// Sending half of the health report queue
#[derive(Clone)]
pub struct HealthReporter {
    tx: mpsc::Sender<HealthReport>,
    counters: Arc<QueueCounters>,
    capacity: usize,
}

impl HealthReporter {
    /// Create the queue and the worker that drains it
    pub fn channel(capacity: usize) -> (Self, HealthReportWorker) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let counters = Arc::new(QueueCounters::default());

        (
            Self {
                tx,
                counters: counters.clone(),
                capacity,
            },
            HealthReportWorker { rx, counters },
        )
    }

    pub fn report_success(&self, id: i32, response_time_ms: u32) {
        self.submit(HealthReport {
            id,
            outcome: HealthOutcome::Success { response_time_ms },
        });
    }

    pub fn report_failure(&self, id: i32) {
        self.submit(HealthReport {
            id,
            outcome: HealthOutcome::Failure,
        });
    }

    /// Enqueue without waiting. A full or closed queue drops the report.
    pub fn submit(&self, report: HealthReport) {
        match self.tx.try_send(report) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(report)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(id = report.id, "Health report queue full, dropping report");
            }
            Err(mpsc::error::TrySendError::Closed(report)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(id = report.id, "Health report queue closed, dropping report");
            }
        }
    }

    pub fn stats(&self) -> ReporterStats {
        ReporterStats {
            capacity: self.capacity,
            pending: self.capacity - self.tx.capacity(),
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

/// Receiving half of the health report queue
pub struct HealthReportWorker {
    rx: mpsc::Receiver<HealthReport>,
    counters: Arc<QueueCounters>,
}

impl HealthReportWorker {
    /// Apply reports until shutdown, then drain whatever is still queued
    #[instrument(skip_all)]
    pub async fn run(mut self, tracker: HealthTracker, mut shutdown: watch::Receiver<bool>) {
        info!("Starting health report worker");

        loop {
            tokio::select! {
                report = self.rx.recv() => match report {
                    Some(report) => self.apply(&tracker, report).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.rx.close();
        let mut drained = 0u64;
        while let Some(report) = self.rx.recv().await {
            self.apply(&tracker, report).await;
            drained += 1;
        }

        info!(drained = drained, "Health report worker stopped");
    }

    async fn apply(&self, tracker: &HealthTracker, report: HealthReport) {
        match tracker.report(report.id, report.outcome).await {
            Ok(()) => {
                self.counters.applied.fetch_add(1, Ordering::Relaxed);
                debug!(id = report.id, success = report.outcome.is_success(), "Applied health report");
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(id = report.id, error = %e, "Failed to apply health report");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewProxy, ProxyProtocol};
    use crate::repository::{MemoryProxyRepository, ProxyStore};

    async fn setup() -> (Arc<MemoryProxyRepository>, HealthTracker, i32) {
        let repo = Arc::new(MemoryProxyRepository::new());
        let proxy = repo
            .insert(&NewProxy::new("10.0.0.1", 8080, ProxyProtocol::Http))
            .await
            .unwrap();
        let tracker = HealthTracker::new(repo.clone());
        (repo, tracker, proxy.id)
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let (_repo, _tracker, id) = setup().await;
        let (reporter, _worker) = HealthReporter::channel(2);

        reporter.report_failure(id);
        reporter.report_failure(id);
        reporter.report_failure(id);

        let stats = reporter.stats();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.pending, 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_backlog() {
        let (repo, tracker, id) = setup().await;
        let (reporter, worker) = HealthReporter::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        for _ in 0..3 {
            reporter.report_failure(id);
        }
        reporter.report_success(id, 120);
        reporter.report_failure(id);
        shutdown_tx.send(true).unwrap();

        worker.run(tracker, shutdown_rx).await;

        let stats = reporter.stats();
        assert_eq!(stats.applied, 5);
        assert_eq!(stats.pending, 0);

        let proxy = repo.get(id).unwrap();
        assert_eq!(proxy.fail_count, 1);
        assert_eq!(proxy.response_time, 120);

        // The queue is closed after shutdown
        reporter.report_failure(id);
        assert_eq!(reporter.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_worker_applies_while_running() {
        let (repo, tracker, id) = setup().await;
        let (reporter, worker) = HealthReporter::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(tracker, shutdown_rx));

        reporter.report_success(id, 80);
        for _ in 0..50 {
            if reporter.stats().applied == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(reporter.stats().applied, 1);
        assert_eq!(repo.get(id).unwrap().response_time, 80);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_report_for_deleted_proxy_is_applied_silently() {
        let (repo, tracker, id) = setup().await;
        let (reporter, worker) = HealthReporter::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        repo.delete(id).await.unwrap();
        reporter.report_failure(id);
        shutdown_tx.send(true).unwrap();
        worker.run(tracker, shutdown_rx).await;

        let stats = reporter.stats();
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.failed, 0);
    }
}
