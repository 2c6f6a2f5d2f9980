//! Proxy Rotator - Entry Point
//!
//! Starts the forwarding server, the management API and the background
//! services, and shuts them down in order on Ctrl+C or SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use proxy_rotator::api::ApiServer;
use proxy_rotator::config::{Config, LogConfig, StoreBackend};
use proxy_rotator::database::Database;
use proxy_rotator::pool::{CandidateSelector, HealthTracker, PoolManager};
use proxy_rotator::proxy::{HealthChecker, HttpProber, ProxyServer};
use proxy_rotator::repository::{MemoryProxyRepository, ProxyRepository, ProxyStore};
use proxy_rotator::services::{
    HealthReporter, ScheduledCheckConfig, ScheduledHealthCheck, ShutdownHandle,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(&config.log);

    info!("Starting Proxy Rotator");

    let (store, db): (Arc<dyn ProxyStore>, Option<Database>) = match config.database.backend {
        StoreBackend::Postgres => {
            let db = Database::new(&config.database).await?;
            info!("Connected to database");

            db.run_migrations().await?;
            info!("Database migrations complete");

            (Arc::new(ProxyRepository::new(db.pool().clone())), Some(db))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory pool store, proxies are lost on restart");
            (Arc::new(MemoryProxyRepository::new()), None)
        }
    };

    let tracker = HealthTracker::new(store.clone());
    let checker = HealthChecker::new(
        store.clone(),
        tracker.clone(),
        Arc::new(HttpProber::new(config.health.timeout())),
        config.health.workers,
        config.health.timeout(),
    );
    let selector = Arc::new(CandidateSelector::new(store.clone()));
    let manager = PoolManager::with_selector(
        store.clone(),
        selector.clone(),
        checker,
        config.health.url.clone(),
    );

    if let Some(path) = &config.seed_file {
        seed_pool(&manager, path).await;
    }

    let stats = manager.stats().await?;
    info!(
        total = stats.total_proxies,
        active = stats.active_proxies,
        healthy = stats.healthy_proxies,
        "Proxy pool loaded"
    );

    // Servers and the scheduled check stop first, the report worker last so
    // it can drain what the forwarder queued.
    let (services_handle, _) = ShutdownHandle::new();
    let (reporter_handle, reporter_shutdown) = ShutdownHandle::new();

    let (reporter, worker) = HealthReporter::channel(config.proxy.report_queue_capacity);
    let worker_task = tokio::spawn(worker.run(tracker, reporter_shutdown));

    let scheduled_task = config.health.interval().map(|interval| {
        let service = ScheduledHealthCheck::new(
            manager.clone(),
            ScheduledCheckConfig {
                check_interval: interval,
                check_url: config.health.url.clone(),
            },
        );
        let shutdown = services_handle.subscribe();
        tokio::spawn(async move { service.run(shutdown).await })
    });

    let proxy_server = ProxyServer::new(config.proxy.clone(), selector, reporter.clone());
    let api_server = ApiServer::new(config.api.clone(), manager, reporter);

    let proxy_shutdown = services_handle.subscribe();
    let proxy_task = tokio::spawn(async move {
        if let Err(e) = proxy_server.run(proxy_shutdown).await {
            error!("Forwarding server error: {}", e);
        }
    });

    let api_shutdown = services_handle.subscribe();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!(
        "Servers started - Proxy: {}, API: {}",
        config.proxy_addr(),
        config.api_addr()
    );

    shutdown_signal().await;
    info!("Shutdown signal received");

    services_handle.shutdown();
    let _ = tokio::join!(proxy_task, api_task);
    if let Some(task) = scheduled_task {
        let _ = task.await;
    }

    reporter_handle.shutdown();
    let _ = worker_task.await;

    if let Some(db) = db {
        db.close().await;
    }

    info!("Proxy Rotator stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "proxy_rotator={level},tower_http={level}",
            level = log.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("pretty") {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}

/// Ingest the seed file when the pool is still empty
async fn seed_pool(manager: &PoolManager, path: &str) {
    match manager.stats().await {
        Ok(stats) if stats.total_proxies > 0 => {
            info!(path = %path, "Pool already populated, skipping seed file");
            return;
        }
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "Could not read pool stats, skipping seed file");
            return;
        }
    }

    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path, error = %e, "Failed to read seed file");
            return;
        }
    };

    match manager.ingest(&text).await {
        Ok(summary) => info!(
            path = %path,
            added = summary.total_added,
            rejected = summary.total_rejected,
            "Seeded proxy pool"
        ),
        Err(e) => warn!(path = %path, error = %e, "Failed to seed proxy pool"),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
