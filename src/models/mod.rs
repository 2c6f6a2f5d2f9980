//! Data models for the proxy pool

mod proxy;

pub use proxy::*;
