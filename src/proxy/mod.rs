//! Forwarding side of the rotator
//!
//! - Batch health checking through each upstream proxy
//! - Request forwarding through the selected upstream
//! - The hyper server accepting proxy clients

pub mod handler;
pub mod health;
pub mod server;

pub use handler::{OutboundRequest, ProxyHandler, ReqwestUpstream, UpstreamClient, UpstreamResponse};
pub use health::{HealthCheckSummary, HealthChecker, HttpProber, Prober};
pub use server::ProxyServer;
