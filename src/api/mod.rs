//! Management API
//!
//! REST endpoints for ingesting, listing, deleting and health checking the
//! proxy pool.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
