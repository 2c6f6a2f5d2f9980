//! Proxy Rotator - upstream proxy pool manager
//!
//! Keeps a pool of upstream forward proxies, picks one per inbound request
//! and tracks each proxy's health from relay outcomes and probes.
//!
//! ## Features
//!
//! - Descriptor ingestion (`host:port`, `host:port:user:pass`, `scheme://...`)
//! - Healthy-first random selection over active proxies
//! - Per-record atomic health bookkeeping with automatic deactivation
//! - Batch and scheduled health checks through each proxy
//! - HTTP, HTTPS and SOCKS5 upstreams
//! - PostgreSQL or in-memory pool store

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod pool;
pub mod proxy;
pub mod repository;
pub mod services;

pub use config::Config;
pub use database::Database;
pub use error::{Result, RotatorError};
pub use pool::PoolManager;
