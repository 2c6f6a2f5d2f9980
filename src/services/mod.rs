//! Background services

pub mod health_reporter;
pub mod scheduled_check;

pub use health_reporter::{HealthReport, HealthReportWorker, HealthReporter, ReporterStats};
pub use scheduled_check::{ScheduledCheckConfig, ScheduledHealthCheck};

use tokio::sync::watch;

/// Shutdown signal shared by the background services
pub struct ShutdownHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new().0
    }
}
